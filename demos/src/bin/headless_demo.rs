//! # Headless Demo
//!
//! Demonstrates:
//! - Building a render graph from a TOML config
//! - Compute, fixed-size and viewport-sized passes in one frame
//! - Per-slot uniform buffers and descriptor sets across frames in flight
//! - View resizes recreating only viewport-sized framebuffers
//!
//! Everything runs on the dummy backend, so no GPU or window is needed.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use inflight_demos::{build_graph, DemoArgs, DemoScene};
use inflight_graphics::{FrameStats, GraphicsDevice, GraphicsError, RenderView, Renderer};

fn run(args: &DemoArgs) -> Result<(), GraphicsError> {
    let config = args.graph_config()?;
    let device = GraphicsDevice::new(config.device.clone())?;
    let mut scene = DemoScene::new(&device)?;
    let mut graph = build_graph(&device, &config)?;
    log::info!("Graph passes: {:?}", graph.pass_names());

    let mut view = RenderView::new("demo", args.view_size());
    let mut renderer = Renderer::new(Arc::clone(&device));
    let mut totals = FrameStats::default();

    for frame in 0..args.frames {
        view.resize(&device, args.view_size_at(frame))?;

        let camera = scene.camera;
        let stats = renderer.render(&mut graph, &mut view, &camera, &scene);
        totals.passes += stats.passes;
        totals.draws += stats.draws;
        totals.dispatches += stats.dispatches;
        totals.commands += stats.commands;
        scene.advance(1.0 / 60.0);
    }

    log::info!(
        "Rendered {} frames with {} frames in flight: {} passes, {} draws, {} dispatches, {} commands, {} resizes",
        renderer.frames_rendered(),
        device.frames_in_flight(),
        totals.passes,
        totals.draws,
        totals.dispatches,
        totals.commands,
        view.resize_count()
    );

    drop(graph);
    drop(view);
    device.shutdown()
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    inflight_graphics::init();

    let args = DemoArgs::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Demo failed: {e}");
            ExitCode::FAILURE
        }
    }
}
