//! Render graph infrastructure.
//!
//! A [`RenderGraph`] is an ordered list of named [`RenderPass`]es. Passes run
//! in the order they were added; there is no dependency sorting. Each pass
//! owns a [`PassNode`] that records its work, and optionally a pipeline built
//! from its [`RenderPassDescriptor`] when the graph initializes.
//!
//! # Architecture
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Driver | [`Renderer`] | Begin frame, run passes, end frame |
//! | **Graph** | [`RenderGraph`] | Ordered passes (this module) |
//! | View | [`RenderView`] | Output size, framebuffers, per-pass resources |
//! | Pass | [`RenderPass`] | Descriptor + node + pipeline |
//!
//! # Example
//!
//! ```ignore
//! use inflight_graphics::graph::{FnPass, RenderGraph, RenderPassDescriptor, RenderView, Renderer};
//!
//! let mut graph = RenderGraph::new(&device);
//! graph.add_pass(
//!     RenderPassDescriptor::graphics("main")
//!         .with_attachment(AttachmentDescription::color("color", TextureFormat::Rgba8Unorm)),
//!     FnPass::new(|ctx| {
//!         ctx.begin_render_pass();
//!         // draw the scene...
//!         ctx.end_render_pass();
//!     }),
//! )?;
//!
//! let mut view = RenderView::new("main", Extent2d::new(1280, 720));
//! let mut renderer = Renderer::new(device.clone());
//! renderer.render(&mut graph, &mut view, &Camera::default(), &scene);
//! ```

mod config;
mod framebuffer;
mod pass;
mod renderer;
mod view;

use std::sync::Arc;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::pipeline::PipelineCache;

pub use config::GraphConfig;
pub use framebuffer::FrameBuffer;
pub use pass::{
    AttachmentDescription, FnPass, PassKind, PassNode, PassSetup, PassSize, PassState,
    RenderPass, RenderPassDescriptor,
};
pub use renderer::{Camera, PassContext, Renderer};
pub use view::{PassResources, RenderView};

/// Handle to a pass in the render graph.
///
/// `PassHandle` is `Copy` and cheap to pass around. It is only valid within
/// the `RenderGraph` that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassHandle(u32);

impl PassHandle {
    fn new(index: u32) -> Self {
        Self(index)
    }

    /// Position of the pass in execution order.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An ordered set of render passes sharing one device and pipeline cache.
///
/// `S` is the scene type handed to every pass while recording.
pub struct RenderGraph<S> {
    device: Arc<GraphicsDevice>,
    pipelines: Arc<PipelineCache>,
    passes: Vec<RenderPass<S>>,
}

impl<S> RenderGraph<S> {
    /// Create an empty graph with its own pipeline cache.
    pub fn new(device: &Arc<GraphicsDevice>) -> Self {
        Self::with_pipeline_cache(device, Arc::new(PipelineCache::new(device)))
    }

    /// Create an empty graph sharing `pipelines` with other graphs.
    pub fn with_pipeline_cache(device: &Arc<GraphicsDevice>, pipelines: Arc<PipelineCache>) -> Self {
        Self {
            device: Arc::clone(device),
            pipelines,
            passes: Vec::new(),
        }
    }

    /// Build a graph from a config, asking `node_for` for each pass's node.
    pub fn from_config(
        device: &Arc<GraphicsDevice>,
        config: &GraphConfig,
        mut node_for: impl FnMut(&RenderPassDescriptor) -> Box<dyn PassNode<S>>,
    ) -> Result<Self, GraphicsError> {
        let mut graph = Self::new(device);
        for descriptor in &config.passes {
            let node = node_for(descriptor);
            graph.add_boxed_pass(descriptor.clone(), node)?;
        }
        Ok(graph)
    }

    /// Append a pass. It runs after every pass added before it.
    pub fn add_pass(
        &mut self,
        descriptor: RenderPassDescriptor,
        node: impl PassNode<S> + 'static,
    ) -> Result<PassHandle, GraphicsError> {
        self.add_boxed_pass(descriptor, Box::new(node))
    }

    pub fn add_boxed_pass(
        &mut self,
        descriptor: RenderPassDescriptor,
        node: Box<dyn PassNode<S>>,
    ) -> Result<PassHandle, GraphicsError> {
        if self.handle(&descriptor.name).is_some() {
            return Err(GraphicsError::DuplicatePass(descriptor.name));
        }
        if let Some(pipeline) = &descriptor.pipeline {
            if pipeline.kind != descriptor.kind {
                return Err(GraphicsError::InvalidParameter(format!(
                    "pass '{}' is {:?} but its pipeline '{}' is {:?}",
                    descriptor.name, descriptor.kind, pipeline.label, pipeline.kind
                )));
            }
        }

        let handle = PassHandle::new(self.passes.len() as u32);
        log::debug!("Added {:?} pass '{}' at {}", descriptor.kind, descriptor.name, handle.index());
        self.passes.push(RenderPass::new(descriptor, node));
        Ok(handle)
    }

    pub fn handle(&self, name: &str) -> Option<PassHandle> {
        self.passes
            .iter()
            .position(|pass| pass.name() == name)
            .map(|index| PassHandle::new(index as u32))
    }

    pub fn pass(&self, name: &str) -> Option<&RenderPass<S>> {
        self.passes.iter().find(|pass| pass.name() == name)
    }

    pub fn get(&self, handle: PassHandle) -> Option<&RenderPass<S>> {
        self.passes.get(handle.index())
    }

    /// Passes in execution order.
    pub fn passes(&self) -> &[RenderPass<S>] {
        &self.passes
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(RenderPass::name).collect()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn pipelines(&self) -> &Arc<PipelineCache> {
        &self.pipelines
    }

    /// Create pipelines and run create callbacks of passes not yet
    /// initialized. Cheap once every pass is initialized.
    pub fn initialize(&mut self) -> Result<(), GraphicsError> {
        for pass in &mut self.passes {
            pass.initialize(&self.device, &self.pipelines)?;
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.passes.iter().all(RenderPass::is_initialized)
    }

    pub(crate) fn split_mut(&mut self) -> (&PipelineCache, &mut [RenderPass<S>]) {
        (&self.pipelines, &mut self.passes)
    }
}

impl<S> std::fmt::Debug for RenderGraph<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraph")
            .field("device", &self.device.label())
            .field("passes", &self.passes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::device::DeviceParameters;
    use crate::pipeline::PipelineDescriptor;
    use crate::shader::{ShaderSource, ShaderStage};

    const COMPUTE_WGSL: &str = r#"
        @group(0) @binding(0) var<storage, read_write> values: array<f32>;

        @compute @workgroup_size(64)
        fn main(@builtin(global_invocation_id) id: vec3<u32>) {
            values[id.x] = values[id.x] * 2.0;
        }
    "#;

    fn create_test_device() -> Arc<GraphicsDevice> {
        GraphicsDevice::with_backend(Arc::new(DummyBackend::new()), DeviceParameters::default())
            .unwrap()
    }

    fn noop() -> FnPass<()> {
        FnPass::new(|_ctx| {})
    }

    #[test]
    fn test_passes_keep_insertion_order() {
        let device = create_test_device();
        let mut graph = RenderGraph::new(&device);
        let shadow = graph.add_pass(RenderPassDescriptor::graphics("shadow"), noop()).unwrap();
        let cull = graph.add_pass(RenderPassDescriptor::compute("cull"), noop()).unwrap();
        let main = graph.add_pass(RenderPassDescriptor::graphics("main"), noop()).unwrap();

        assert_eq!([shadow.index(), cull.index(), main.index()], [0, 1, 2]);
        assert_eq!(graph.pass_names(), ["shadow", "cull", "main"]);
        assert_eq!(graph.handle("cull"), Some(cull));
        assert_eq!(graph.get(main).unwrap().kind(), PassKind::Graphics);
        assert!(graph.pass("missing").is_none());
    }

    #[test]
    fn test_duplicate_pass_name_rejected() {
        let device = create_test_device();
        let mut graph = RenderGraph::new(&device);
        graph.add_pass(RenderPassDescriptor::graphics("main"), noop()).unwrap();
        let err = graph
            .add_pass(RenderPassDescriptor::compute("main"), noop())
            .unwrap_err();
        assert!(matches!(err, GraphicsError::DuplicatePass(name) if name == "main"));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_pipeline_kind_must_match_pass() {
        let device = create_test_device();
        let mut graph = RenderGraph::new(&device);
        let pipeline = PipelineDescriptor::compute(
            "double",
            ShaderSource::wgsl(ShaderStage::Compute, "double", COMPUTE_WGSL),
        );
        let err = graph
            .add_pass(RenderPassDescriptor::graphics("main").with_pipeline(pipeline), noop())
            .unwrap_err();
        assert!(matches!(err, GraphicsError::InvalidParameter(_)));
    }

    #[test]
    fn test_initialize_creates_pipeline_once() {
        let device = create_test_device();
        let mut graph = RenderGraph::new(&device);
        let pipeline = PipelineDescriptor::compute(
            "double",
            ShaderSource::wgsl(ShaderStage::Compute, "double", COMPUTE_WGSL),
        );
        let created = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = created.clone();
        graph
            .add_pass(
                RenderPassDescriptor::compute("simulate").with_pipeline(pipeline),
                noop().with_create(move |setup| {
                    assert!(setup.pipeline.is_some());
                    counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    Ok(())
                }),
            )
            .unwrap();

        assert!(!graph.is_initialized());
        graph.initialize().unwrap();
        graph.initialize().unwrap();
        assert!(graph.is_initialized());
        assert_eq!(created.load(std::sync::atomic::Ordering::Relaxed), 1);

        let pass = graph.pass("simulate").unwrap();
        assert_eq!(pass.state(), PassState::Initialized);
        assert_eq!(pass.pipeline().unwrap().label(), "double");
        assert_eq!(pass.uniform_layout().unwrap().set(), 0);
        assert_eq!(graph.pipelines().len(), 1);
    }

    #[test]
    fn test_from_config() {
        let device = create_test_device();
        let config = GraphConfig::from_toml_str(
            r#"
            [[passes]]
            name = "simulate"
            kind = "compute"

            [[passes]]
            name = "main"
            "#,
        )
        .unwrap();
        let mut kinds = Vec::new();
        let graph: RenderGraph<()> = RenderGraph::from_config(&device, &config, |descriptor| {
            kinds.push(descriptor.kind);
            Box::new(noop())
        })
        .unwrap();
        assert_eq!(graph.pass_names(), ["simulate", "main"]);
        assert_eq!(kinds, [PassKind::Compute, PassKind::Graphics]);
    }
}
