//! Command line arguments for the demos.

use std::path::PathBuf;

use clap::Parser;
use inflight_graphics::{DeviceParameters, Extent2d, GraphConfig, GraphicsError};

use crate::scene::DEFAULT_GRAPH;

/// Headless render graph demo.
///
/// ```bash
/// # Render 300 frames with three frames in flight
/// ./headless_demo --frames 300 --frames-in-flight 3
///
/// # Use a custom pass layout and halve the view every 50 frames
/// ./headless_demo --config graph.toml --resize-every 50
/// ```
#[derive(Parser, Debug, Clone)]
#[command(name = "headless_demo", version, about = "Drive a render graph on the dummy backend")]
pub struct DemoArgs {
    /// TOML graph config. The built-in graph is used when omitted.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Number of frames to render before exiting.
    #[arg(long, default_value_t = 120)]
    pub frames: u64,

    /// Override the config's frames in flight.
    #[arg(long)]
    pub frames_in_flight: Option<usize>,

    /// Initial view width.
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// Initial view height.
    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// Alternate the view between full and half size every N frames.
    #[arg(long)]
    pub resize_every: Option<u64>,
}

impl DemoArgs {
    /// Load the graph config named by `--config`, applying overrides.
    pub fn graph_config(&self) -> Result<GraphConfig, GraphicsError> {
        let mut config = match &self.config {
            Some(path) => GraphConfig::from_path(path)?,
            None => GraphConfig::from_toml_str(DEFAULT_GRAPH)?,
        };
        if let Some(frames_in_flight) = self.frames_in_flight {
            config.device = config.device.with_frames_in_flight(frames_in_flight);
        }
        Ok(config)
    }

    pub fn device_parameters(&self) -> Result<DeviceParameters, GraphicsError> {
        Ok(self.graph_config()?.device)
    }

    pub fn view_size(&self) -> Extent2d {
        Extent2d::new(self.width, self.height)
    }

    /// View size to use for `frame`, following `--resize-every`.
    pub fn view_size_at(&self, frame: u64) -> Extent2d {
        match self.resize_every {
            Some(every) if every > 0 && (frame / every) % 2 == 1 => self.view_size().scaled(0.5),
            _ => self.view_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = DemoArgs::parse_from(["headless_demo"]);
        assert_eq!(args.frames, 120);
        assert_eq!(args.view_size(), Extent2d::new(1280, 720));
        assert_eq!(args.view_size_at(1000), Extent2d::new(1280, 720));
        assert_eq!(args.device_parameters().unwrap().frames_in_flight, 2);
    }

    #[test]
    fn test_overrides() {
        let args = DemoArgs::parse_from([
            "headless_demo",
            "--frames-in-flight",
            "3",
            "--resize-every",
            "10",
        ]);
        assert_eq!(args.graph_config().unwrap().device.frames_in_flight, 3);
        assert_eq!(args.view_size_at(9), Extent2d::new(1280, 720));
        assert_eq!(args.view_size_at(10), Extent2d::new(640, 360));
        assert_eq!(args.view_size_at(20), Extent2d::new(1280, 720));
    }
}
