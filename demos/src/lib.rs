//! # Inflight Demos
//!
//! Headless scenes that drive the render graph on the dummy backend.
//!
//! ## Available Demos
//!
//! - `headless_demo` - A compute pass, a shadow pass and a textured mesh pass,
//!   rendered for a fixed number of frames with optional resizes

pub mod args;
pub mod scene;

pub use args::DemoArgs;
pub use scene::{build_graph, DemoScene, DEFAULT_GRAPH};

/// Demos library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
