//! Render graph execution tests.
//!
//! Whole frames are driven through [`Renderer::render`] on the dummy backend;
//! the backend's command log shows what each frame recorded.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use rstest::rstest;

use common::TestContext;
use inflight_graphics::backend::Command;
use inflight_graphics::shader::{ShaderSource, ShaderStage};
use inflight_graphics::types::{Extent2d, TextureFormat};
use inflight_graphics::{
    AttachmentDescription, Buffer, BufferCreateInfo, BufferUsage, Camera, FnPass, GraphConfig,
    Mesh, PassContext, PassNode, PassSize, PipelineDescriptor, RenderGraph, RenderPassDescriptor,
    RenderView, Renderer, Texture,
};

const MESH_WGSL: &str = r#"
    struct Globals {
        view_proj: mat4x4<f32>,
        tint: vec4<f32>,
    };
    @group(0) @binding(0) var<uniform> globals: Globals;
    @group(1) @binding(0) var albedo: texture_2d<f32>;
    @group(1) @binding(1) var albedo_sampler: sampler;

    struct VertexOutput {
        @builtin(position) clip: vec4<f32>,
        @location(0) uv: vec2<f32>,
    };

    @vertex
    fn vs_main(@location(0) position: vec3<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {
        var out: VertexOutput;
        out.clip = globals.view_proj * vec4<f32>(position, 1.0);
        out.uv = uv;
        return out;
    }

    @fragment
    fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
        return textureSample(albedo, albedo_sampler, in.uv) * globals.tint;
    }
"#;

/// Names of the passes in the order their callbacks ran.
type CallLog = Arc<Mutex<Vec<String>>>;

fn logging_pass(name: &'static str, log: &CallLog) -> FnPass<()> {
    let log = Arc::clone(log);
    FnPass::new(move |ctx: &mut PassContext<'_, ()>| {
        log.lock().push(name.to_string());
        ctx.begin_render_pass();
        ctx.end_render_pass();
    })
}

fn begun_passes(commands: &[Command]) -> Vec<String> {
    commands
        .iter()
        .filter_map(|command| match command {
            Command::BeginPass { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_passes_run_in_declared_order_every_frame() {
    let ctx = TestContext::new(2);
    let log = CallLog::default();
    let mut graph = RenderGraph::new(&ctx.device);
    graph
        .add_pass(RenderPassDescriptor::compute("simulate"), logging_pass("simulate", &log))
        .unwrap();
    graph
        .add_pass(
            RenderPassDescriptor::graphics("shadow")
                .with_attachment(AttachmentDescription::depth("depth", TextureFormat::Depth32Float))
                .with_size(PassSize::Fixed(Extent2d::new(256, 256))),
            logging_pass("shadow", &log),
        )
        .unwrap();
    graph
        .add_pass(
            RenderPassDescriptor::graphics("main")
                .with_attachment(AttachmentDescription::color("color", TextureFormat::Rgba8Unorm)),
            logging_pass("main", &log),
        )
        .unwrap();

    let mut view = RenderView::new("main", Extent2d::new(320, 240));
    let mut renderer = Renderer::new(Arc::clone(&ctx.device));
    let camera = Camera::default();

    let first = renderer.render(&mut graph, &mut view, &camera, &());
    let second = renderer.render(&mut graph, &mut view, &camera, &());

    assert_eq!(first, second);
    assert_eq!(first.passes, 3);
    assert_eq!(
        *log.lock(),
        ["simulate", "shadow", "main", "simulate", "shadow", "main"]
    );
    let frames = ctx.backend.submitted_frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(begun_passes(&frames[0]), begun_passes(&frames[1]));
    assert_eq!(renderer.frames_rendered(), 2);
    assert_eq!(ctx.device.frame_index(), 2);
}

#[rstest]
#[case::full(1.0, Extent2d::new(1000, 500))]
#[case::half(0.5, Extent2d::new(500, 250))]
#[case::third(0.33, Extent2d::new(330, 165))]
fn test_resize_recreates_viewport_framebuffers(#[case] scale: f32, #[case] expected: Extent2d) {
    let ctx = TestContext::new(2);
    let log = CallLog::default();
    let mut graph = RenderGraph::new(&ctx.device);
    graph
        .add_pass(
            RenderPassDescriptor::graphics("bloom")
                .with_attachment(AttachmentDescription::color("bright", TextureFormat::Rgba16Float))
                .with_size(PassSize::Viewport { scale }),
            logging_pass("bloom", &log),
        )
        .unwrap();
    graph
        .add_pass(
            RenderPassDescriptor::graphics("shadow")
                .with_attachment(AttachmentDescription::depth("depth", TextureFormat::Depth32Float))
                .with_size(PassSize::Fixed(Extent2d::new(512, 512))),
            logging_pass("shadow", &log),
        )
        .unwrap();

    let mut view = RenderView::new("main", Extent2d::new(640, 480));
    let mut renderer = Renderer::new(Arc::clone(&ctx.device));
    renderer.render(&mut graph, &mut view, &Camera::default(), &());

    view.resize(&ctx.device, Extent2d::new(1000, 500)).unwrap();
    renderer.render(&mut graph, &mut view, &Camera::default(), &());

    let bloom = view.framebuffer("bloom").unwrap();
    assert_eq!(bloom.extent(), expected);
    assert_eq!(bloom.generation(), 1);
    let shadow = view.framebuffer("shadow").unwrap();
    assert_eq!(shadow.extent(), Extent2d::new(512, 512));
    assert_eq!(shadow.generation(), 0);

    match &ctx.backend.last_frame()[0] {
        Command::BeginPass { extent, .. } => assert_eq!(*extent, expected),
        other => panic!("expected the bloom pass first, got {other:?}"),
    }
}

struct Scene {
    mesh: Mesh,
    albedo: Arc<Texture>,
    tint: [f32; 4],
}

fn draw_scene(ctx: &mut PassContext<'_, Scene>) {
    let Some(pipeline) = ctx.pipeline.cloned() else {
        return;
    };
    let device = Arc::clone(ctx.device);

    let globals = ctx
        .resources
        .buffer_or_insert_with("globals", || {
            Buffer::with_info(
                &device,
                BufferCreateInfo::new(80, 1, BufferUsage::UNIFORM)
                    .with_label("globals")
                    .multi_buffered(),
            )
        })
        .unwrap()
        .clone();
    globals.write_pod(&ctx.view_projection().to_cols_array(), 0);
    globals.write_pod(&ctx.scene.tint, 64);
    globals.flush();

    if ctx.resources.writer("globals").is_none() {
        let mut set0 = pipeline.create_writer(0).unwrap();
        set0.write_buffer(0u32, &globals, 80, 0);
        let mut set1 = pipeline.create_writer(1).unwrap();
        set1.write_texture(0u32, &ctx.scene.albedo)
            .write_texture(1u32, &ctx.scene.albedo);
        ctx.resources.insert_writer("globals", set0);
        ctx.resources.insert_writer("material", set1);
    }
    for name in ["globals", "material"] {
        if let Some(writer) = ctx.resources.writer_mut(name) {
            writer.flush();
        }
    }

    ctx.begin_render_pass();
    if let (Some(set0), Some(set1)) = (
        ctx.resources.writer("globals"),
        ctx.resources.writer("material"),
    ) {
        ctx.frame.render(&ctx.scene.mesh, &pipeline, None, 1, &[set0, set1]);
    }
    ctx.end_render_pass();
}

#[test]
fn test_pipeline_pass_draws_with_reflected_sets() {
    let ctx = TestContext::new(2);
    let pipeline = PipelineDescriptor::graphics(
        "mesh",
        ShaderSource::wgsl(ShaderStage::Vertex, "mesh.wgsl", MESH_WGSL).with_entry_point("vs_main"),
        ShaderSource::wgsl(ShaderStage::Fragment, "mesh.wgsl", MESH_WGSL)
            .with_entry_point("fs_main"),
    )
    .with_color_formats(vec![TextureFormat::Rgba8Unorm]);

    let mut graph = RenderGraph::new(&ctx.device);
    graph
        .add_pass(
            RenderPassDescriptor::graphics("main")
                .with_attachment(AttachmentDescription::color("color", TextureFormat::Rgba8Unorm))
                .with_pipeline(pipeline),
            FnPass::new(draw_scene),
        )
        .unwrap();

    let vertices = Arc::new(
        Buffer::with_info(
            &ctx.device,
            BufferCreateInfo::new(20, 3, BufferUsage::VERTEX).with_label("triangle"),
        )
        .unwrap(),
    );
    let scene = Scene {
        mesh: Mesh::new("triangle", 3).with_vertex_buffer(0, vertices),
        albedo: ctx.sampled_texture("albedo"),
        tint: [1.0, 0.5, 0.25, 1.0],
    };

    let mut view = RenderView::new("main", Extent2d::new(640, 360));
    let mut renderer = Renderer::new(Arc::clone(&ctx.device));
    let camera = Camera::default();
    let stats = renderer.render(&mut graph, &mut view, &camera, &scene);
    assert_eq!(stats.draws, 1);

    let commands = ctx.backend.last_frame();
    assert!(commands.contains(&Command::Draw {
        vertex_count: 3,
        instance_count: 1
    }));
    let bound_sets: Vec<u32> = commands
        .iter()
        .filter_map(|command| match command {
            Command::BindDescriptorSet { set, .. } => Some(*set),
            _ => None,
        })
        .collect();
    assert_eq!(bound_sets, [0, 1]);

    // The second frame records into slot 1 and binds slot 1's sets.
    let before = ctx.backend.stats().descriptor_updates;
    renderer.render(&mut graph, &mut view, &camera, &scene);
    assert_eq!(ctx.backend.stats().descriptor_updates, before);

    let globals = view.resources("main").unwrap().buffer("globals").unwrap();
    let tint = globals.read_slot(1, 64, 16).unwrap();
    assert_eq!(tint, bytemuck::cast_slice::<f32, u8>(&scene.tint));
}

#[test]
fn test_graph_from_config_shares_device_parameters() {
    let config = GraphConfig::from_toml_str(
        r#"
        [device]
        frames_in_flight = 3

        [[passes]]
        name = "simulate"
        kind = "compute"

        [[passes]]
        name = "main"
        size = { mode = "viewport", scale = 0.5 }

        [[passes.attachments]]
        name = "color"
        format = "rgba8_unorm"
        "#,
    )
    .unwrap();

    let ctx = TestContext::new(config.device.frames_in_flight);
    let log = CallLog::default();
    let mut graph = RenderGraph::from_config(&ctx.device, &config, |descriptor| {
        let name: &'static str = if descriptor.name == "main" { "main" } else { "simulate" };
        Box::new(logging_pass(name, &log)) as Box<dyn PassNode<()>>
    })
    .unwrap();

    let mut view = RenderView::new("main", Extent2d::new(200, 100));
    let mut renderer = Renderer::new(Arc::clone(&ctx.device));
    for _ in 0..3 {
        renderer.render(&mut graph, &mut view, &Camera::default(), &());
    }

    let main = view.framebuffer("main").unwrap();
    assert_eq!(main.slot_count(), 3);
    assert_eq!(main.extent(), Extent2d::new(100, 50));
    assert_eq!(log.lock().len(), 6);
}

#[test]
#[should_panic(expected = "render pass 'main' is still open")]
fn test_pass_left_open_is_fatal() {
    let ctx = TestContext::new(2);
    let mut graph = RenderGraph::new(&ctx.device);
    graph
        .add_pass(
            RenderPassDescriptor::graphics("main")
                .with_attachment(AttachmentDescription::color("color", TextureFormat::Rgba8Unorm)),
            FnPass::new(|ctx: &mut PassContext<'_, ()>| ctx.begin_render_pass()),
        )
        .unwrap();

    let mut view = RenderView::new("main", Extent2d::new(64, 64));
    Renderer::new(Arc::clone(&ctx.device)).render(&mut graph, &mut view, &Camera::default(), &());
}
