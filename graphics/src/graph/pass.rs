//! Render pass types.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::pipeline::{Pipeline, PipelineCache, PipelineDescriptor};
use crate::types::{ClearValue, Extent2d, ImageLayout, LoadOp, StoreOp, TextureFormat};
use crate::uniform::UniformLayout;

use super::PassContext;

/// Kind of work a pass records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    /// Rasterization into color/depth attachments.
    #[default]
    Graphics,
    /// Compute dispatches.
    Compute,
}

/// One attachment of a pass: format plus load/store policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentDescription {
    pub name: String,
    pub format: TextureFormat,
    #[serde(default)]
    pub load_op: LoadOp,
    #[serde(default)]
    pub store_op: StoreOp,
    #[serde(default)]
    pub final_layout: ImageLayout,
}

impl AttachmentDescription {
    /// A color attachment cleared to black and left readable by shaders.
    pub fn color(name: impl Into<String>, format: TextureFormat) -> Self {
        Self {
            name: name.into(),
            format,
            load_op: LoadOp::Clear(ClearValue::BLACK),
            store_op: StoreOp::Store,
            final_layout: ImageLayout::ShaderReadOnly,
        }
    }

    /// A depth attachment cleared to 1.0.
    pub fn depth(name: impl Into<String>, format: TextureFormat) -> Self {
        Self {
            name: name.into(),
            format,
            load_op: LoadOp::Clear(ClearValue::depth(1.0)),
            store_op: StoreOp::Store,
            final_layout: ImageLayout::DepthStencilAttachment,
        }
    }

    pub fn with_load_op(mut self, load_op: LoadOp) -> Self {
        self.load_op = load_op;
        self
    }

    pub fn with_store_op(mut self, store_op: StoreOp) -> Self {
        self.store_op = store_op;
        self
    }

    pub fn with_final_layout(mut self, layout: ImageLayout) -> Self {
        self.final_layout = layout;
        self
    }

    pub fn clear_value(&self) -> Option<ClearValue> {
        match self.load_op {
            LoadOp::Clear(value) => Some(value),
            _ => None,
        }
    }
}

fn default_scale() -> f32 {
    1.0
}

/// How a pass's framebuffer is sized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PassSize {
    /// `floor(view size * scale)`, recreated whenever the view resizes.
    Viewport {
        #[serde(default = "default_scale")]
        scale: f32,
    },
    /// Fixed dimensions, independent of the view.
    Fixed(Extent2d),
}

impl Default for PassSize {
    fn default() -> Self {
        Self::Viewport { scale: 1.0 }
    }
}

impl PassSize {
    /// Framebuffer extent for a view of `view_size`.
    pub fn resolve(self, view_size: Extent2d) -> Extent2d {
        match self {
            Self::Viewport { scale } => view_size.scaled(scale),
            Self::Fixed(extent) => extent,
        }
    }

    pub fn resizes_with_viewport(self) -> bool {
        matches!(self, Self::Viewport { .. })
    }
}

/// Configuration of one pass in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderPassDescriptor {
    pub name: String,
    #[serde(default)]
    pub kind: PassKind,
    /// Attachments in binding order.
    #[serde(default)]
    pub attachments: Vec<AttachmentDescription>,
    #[serde(default)]
    pub size: PassSize,
    /// Pipeline created for the pass when the graph initializes.
    #[serde(default)]
    pub pipeline: Option<PipelineDescriptor>,
}

impl RenderPassDescriptor {
    pub fn new(name: impl Into<String>, kind: PassKind) -> Self {
        Self {
            name: name.into(),
            kind,
            attachments: Vec::new(),
            size: PassSize::default(),
            pipeline: None,
        }
    }

    pub fn graphics(name: impl Into<String>) -> Self {
        Self::new(name, PassKind::Graphics)
    }

    pub fn compute(name: impl Into<String>) -> Self {
        Self::new(name, PassKind::Compute)
    }

    pub fn with_attachment(mut self, attachment: AttachmentDescription) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_size(mut self, size: PassSize) -> Self {
        self.size = size;
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineDescriptor) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Clear values of cleared attachments, in attachment order.
    pub fn clear_values(&self) -> Vec<ClearValue> {
        self.attachments
            .iter()
            .filter_map(AttachmentDescription::clear_value)
            .collect()
    }
}

/// What a pass may touch during its one-time creation.
pub struct PassSetup<'a> {
    pub device: &'a Arc<GraphicsDevice>,
    pub pipelines: &'a PipelineCache,
    pub descriptor: &'a RenderPassDescriptor,
    /// The pass's own pipeline, when its descriptor names one.
    pub pipeline: Option<&'a Arc<Pipeline>>,
}

/// The behavior of a pass.
///
/// The graph only sequences passes and plumbs resources; what a pass draws
/// is entirely up to its node.
pub trait PassNode<S>: Send {
    /// Runs once, the first time the graph initializes the pass.
    fn create(&mut self, _setup: &mut PassSetup<'_>) -> Result<(), GraphicsError> {
        Ok(())
    }

    /// Record the pass into the current frame.
    fn render(&mut self, ctx: &mut PassContext<'_, S>);
}

type CreateFn = Box<dyn FnMut(&mut PassSetup<'_>) -> Result<(), GraphicsError> + Send>;
type RenderFn<S> = Box<dyn FnMut(&mut PassContext<'_, S>) + Send>;

/// A [`PassNode`] made of closures.
pub struct FnPass<S> {
    create: Option<CreateFn>,
    render: RenderFn<S>,
}

impl<S: 'static> FnPass<S> {
    pub fn new(render: impl FnMut(&mut PassContext<'_, S>) + Send + 'static) -> Self {
        Self {
            create: None,
            render: Box::new(render),
        }
    }

    pub fn with_create(
        mut self,
        create: impl FnMut(&mut PassSetup<'_>) -> Result<(), GraphicsError> + Send + 'static,
    ) -> Self {
        self.create = Some(Box::new(create));
        self
    }
}

impl<S: 'static> PassNode<S> for FnPass<S> {
    fn create(&mut self, setup: &mut PassSetup<'_>) -> Result<(), GraphicsError> {
        match &mut self.create {
            Some(create) => create(setup),
            None => Ok(()),
        }
    }

    fn render(&mut self, ctx: &mut PassContext<'_, S>) {
        (self.render)(ctx)
    }
}

/// Lifecycle of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassState {
    #[default]
    Uninitialized,
    Initialized,
}

/// A named stage of the render graph.
pub struct RenderPass<S> {
    descriptor: RenderPassDescriptor,
    node: Box<dyn PassNode<S>>,
    state: PassState,
    pipeline: Option<Arc<Pipeline>>,
    uniform_layout: Option<Arc<UniformLayout>>,
}

impl<S> RenderPass<S> {
    pub fn new(descriptor: RenderPassDescriptor, node: Box<dyn PassNode<S>>) -> Self {
        Self {
            descriptor,
            node,
            state: PassState::Uninitialized,
            pipeline: None,
            uniform_layout: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn kind(&self) -> PassKind {
        self.descriptor.kind
    }

    pub fn descriptor(&self) -> &RenderPassDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == PassState::Initialized
    }

    pub fn pipeline(&self) -> Option<&Arc<Pipeline>> {
        self.pipeline.as_ref()
    }

    /// Per-pass uniform layout: set 0 of the pass's pipeline.
    pub fn uniform_layout(&self) -> Option<&Arc<UniformLayout>> {
        self.uniform_layout.as_ref()
    }

    /// Create the pass's pipeline and run its create callback, once.
    pub(crate) fn initialize(
        &mut self,
        device: &Arc<GraphicsDevice>,
        pipelines: &PipelineCache,
    ) -> Result<(), GraphicsError> {
        if self.is_initialized() {
            return Ok(());
        }

        if let Some(descriptor) = &self.descriptor.pipeline {
            let pipeline = pipelines.get_or_create(descriptor)?;
            self.uniform_layout = pipeline.layout(0).cloned();
            self.pipeline = Some(pipeline);
        }

        let mut setup = PassSetup {
            device,
            pipelines,
            descriptor: &self.descriptor,
            pipeline: self.pipeline.as_ref(),
        };
        self.node.create(&mut setup)?;

        self.state = PassState::Initialized;
        log::debug!("Initialized {:?} pass '{}'", self.descriptor.kind, self.descriptor.name);
        Ok(())
    }

    pub(crate) fn parts_mut(
        &mut self,
    ) -> (
        &RenderPassDescriptor,
        Option<&Arc<Pipeline>>,
        Option<&Arc<UniformLayout>>,
        &mut dyn PassNode<S>,
    ) {
        (
            &self.descriptor,
            self.pipeline.as_ref(),
            self.uniform_layout.as_ref(),
            self.node.as_mut(),
        )
    }
}

impl<S> std::fmt::Debug for RenderPass<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("name", &self.descriptor.name)
            .field("kind", &self.descriptor.kind)
            .field("state", &self.state)
            .field("pipeline", &self.pipeline.as_ref().map(|p| p.label()))
            .finish()
    }
}
