//! # Inflight Graphics
//!
//! Frame-in-flight resource management and a reflection-driven binding layer,
//! driven by an ordered render graph.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GraphicsDevice`] - Frame counter, frames in flight and deferred deletion
//! - [`Buffer`] / [`Texture`] - GPU resources, optionally one copy per frame slot
//! - [`Pipeline`] - Pipelines whose descriptor-set layouts come from shader reflection
//! - [`UniformWriter`] - Per-slot descriptor sets filled from staged writes
//! - [`RenderGraph`] - Named passes run in declaration order by a [`Renderer`]
//! - A `Dummy` backend that records everything in memory, for headless runs and tests
//!
//! ## Example
//!
//! ```ignore
//! use inflight_graphics::{DeviceParameters, GraphicsDevice, RenderGraph, RenderView, Renderer};
//!
//! let device = GraphicsDevice::new(DeviceParameters::default().with_frames_in_flight(3))?;
//! let mut graph = RenderGraph::new(&device);
//! // add passes...
//! let mut view = RenderView::new("main", Extent2d::new(1280, 720));
//! let mut renderer = Renderer::new(device.clone());
//! renderer.render(&mut graph, &mut view, &Camera::default(), &scene);
//! device.shutdown()?;
//! ```

pub mod backend;
pub mod cache;
pub mod deletion;
pub mod device;
pub mod error;
pub mod frame;
pub mod graph;
pub mod pipeline;
pub mod profiling;
pub mod resources;
pub mod shader;
pub mod types;
pub mod uniform;

// Re-export main types for convenience
pub use backend::{BackendType, DummyBackend, GpuBackend};
pub use deletion::{DeferredResource, DeletionQueue};
pub use device::{DeviceParameters, GraphicsDevice, DEFAULT_FRAMES_IN_FLIGHT};
pub use error::{fatal, GraphicsError};
pub use frame::{Frame, FrameStats};
pub use graph::{
    AttachmentDescription, Camera, FnPass, FrameBuffer, GraphConfig, PassContext, PassHandle,
    PassKind, PassNode, PassSize, RenderGraph, RenderPass, RenderPassDescriptor, RenderView,
    Renderer,
};
pub use pipeline::{Pipeline, PipelineCache, PipelineDescriptor, PipelineLayoutBuilder};
pub use resources::{Buffer, BufferCreateInfo, Mesh, Texture};
pub use shader::{ShaderCache, ShaderReflection, ShaderSource, ShaderStage};
pub use types::{
    BufferUsage, ClearValue, Extent2d, MemoryResidency, SamplerDescriptor, TextureDescriptor,
    TextureFormat, TextureUsage,
};
pub use uniform::{BindingRef, UniformLayout, UniformWriter};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging-side state such as the profiler client.
///
/// Call once before creating a device.
pub fn init() {
    profiling::init();
    log::info!("Inflight Graphics v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_device() {
        let device = GraphicsDevice::new(DeviceParameters::default()).unwrap();
        assert_eq!(device.frames_in_flight(), DEFAULT_FRAMES_IN_FLIGHT);
        assert_eq!(device.backend().name(), "Dummy");
    }
}
