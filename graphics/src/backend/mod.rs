//! GPU backend abstraction layer.
//!
//! Exactly one backend is selected at device creation ([`BackendType`]) and
//! every layer above talks to it through the [`GpuBackend`] trait. GPU objects
//! are referred to by generation-checked handles from a slot map: once an
//! object is destroyed its handle stops resolving, so a late use or a double
//! destroy is reported as [`GraphicsError::InvalidHandle`] instead of touching
//! freed memory.
//!
//! # Available Backends
//!
//! - `Dummy`: in-memory backend with byte-accurate buffer storage, used for
//!   headless runs and tests.

mod dummy;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::GraphicsError;
use crate::graph::PassKind;
use crate::shader::{ResourceKind, ShaderStage, ShaderStageFlags, VertexAttribute};
use crate::types::{
    BlendState, BufferDescriptor, ClearValue, CullMode, DepthState, Extent2d, ImageLayout, LoadOp,
    PrimitiveTopology, SamplerDescriptor, ScissorRect, StoreOp, TextureDescriptor, TextureFormat,
    Viewport,
};

pub use dummy::{DummyBackend, DummyStats};

slotmap::new_key_type! {
    /// Handle to a backend buffer.
    pub struct BufferHandle;
    /// Handle to a backend texture.
    pub struct TextureHandle;
    /// Handle to a backend sampler.
    pub struct SamplerHandle;
    /// Handle to a backend descriptor-set layout.
    pub struct SetLayoutHandle;
    /// Handle to a backend descriptor set.
    pub struct DescriptorSetHandle;
    /// Handle to a backend pipeline.
    pub struct PipelineHandle;
}

/// Backend selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    #[default]
    Dummy,
}

/// Create the backend for `backend_type`.
pub fn create_backend(backend_type: BackendType) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    match backend_type {
        BackendType::Dummy => {
            log::info!("Using dummy backend");
            Ok(Arc::new(DummyBackend::new()))
        }
    }
}

// ============================================================================
// Descriptor sets
// ============================================================================

/// One binding slot of a descriptor-set layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetLayoutEntry {
    pub binding: u32,
    pub kind: ResourceKind,
    pub count: u32,
    pub stages: ShaderStageFlags,
}

/// What a descriptor binding points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorResource {
    /// A byte range of a buffer.
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    /// One texture per array element, each with an optional sampler.
    Textures(Vec<(TextureHandle, Option<SamplerHandle>)>),
}

/// A single binding update applied to a descriptor set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub resource: DescriptorResource,
}

// ============================================================================
// Pipelines
// ============================================================================

/// Vertex buffer binding slot with its attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexBufferLayout {
    pub binding: u32,
    pub stride: u32,
    /// Advances per instance instead of per vertex.
    pub per_instance: bool,
    pub attributes: Vec<VertexAttributeLayout>,
}

/// A reflected attribute placed in a vertex buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttributeLayout {
    pub attribute: VertexAttribute,
    pub offset: u32,
}

/// Everything the backend needs to build a pipeline object.
#[derive(Debug, Clone)]
pub struct PipelineCreateInfo {
    pub label: String,
    pub kind: PassKind,
    pub stages: Vec<(ShaderStage, String, Arc<[u32]>)>,
    /// Set layouts by set index, ordered.
    pub set_layouts: Vec<(u32, SetLayoutHandle)>,
    pub vertex_buffers: Vec<VertexBufferLayout>,
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub blend: Option<BlendState>,
    pub depth: DepthState,
    pub cull_mode: CullMode,
    pub topology: PrimitiveTopology,
}

// ============================================================================
// Commands
// ============================================================================

/// Attachment bound when a pass begins.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentBinding {
    pub texture: TextureHandle,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub final_layout: ImageLayout,
}

/// A recorded GPU command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginPass {
        name: String,
        kind: PassKind,
        attachments: Vec<AttachmentBinding>,
        extent: Extent2d,
    },
    EndPass,
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    BindPipeline(PipelineHandle),
    BindDescriptorSet {
        set: u32,
        descriptor_set: DescriptorSetHandle,
    },
    BindVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
}

impl Command {
    /// Clear values carried by a `BeginPass`, in attachment order.
    pub fn clear_values(&self) -> Vec<ClearValue> {
        match self {
            Self::BeginPass { attachments, .. } => attachments
                .iter()
                .filter_map(|a| match a.load_op {
                    LoadOp::Clear(value) => Some(value),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

// ============================================================================
// GpuBackend Trait
// ============================================================================

/// The single device interface every backend implements.
///
/// Frame slots are numbered `0..frames_in_flight`. `begin_frame` blocks until
/// the work last submitted on that slot has completed; `submit_frame` hands
/// the recorded commands to the GPU and arms the slot's completion fence.
pub trait GpuBackend: Send + Sync + 'static {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    // Buffers
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle, GraphicsError>;
    fn destroy_buffer(&self, buffer: BufferHandle) -> Result<(), GraphicsError>;
    /// Write host-visible memory.
    fn write_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError>;
    fn read_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError>;
    /// Device-side copy between buffers.
    fn copy_buffer(
        &self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), GraphicsError>;

    // Textures and samplers
    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureHandle, GraphicsError>;
    fn destroy_texture(&self, texture: TextureHandle) -> Result<(), GraphicsError>;
    fn create_sampler(
        &self,
        descriptor: &SamplerDescriptor,
    ) -> Result<SamplerHandle, GraphicsError>;
    fn destroy_sampler(&self, sampler: SamplerHandle) -> Result<(), GraphicsError>;

    // Descriptor sets
    fn create_set_layout(
        &self,
        entries: &[SetLayoutEntry],
    ) -> Result<SetLayoutHandle, GraphicsError>;
    fn destroy_set_layout(&self, layout: SetLayoutHandle) -> Result<(), GraphicsError>;
    fn allocate_descriptor_set(
        &self,
        layout: SetLayoutHandle,
    ) -> Result<DescriptorSetHandle, GraphicsError>;
    fn update_descriptor_set(
        &self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> Result<(), GraphicsError>;
    fn free_descriptor_set(&self, set: DescriptorSetHandle) -> Result<(), GraphicsError>;

    // Pipelines
    fn create_pipeline(&self, info: &PipelineCreateInfo) -> Result<PipelineHandle, GraphicsError>;
    fn destroy_pipeline(&self, pipeline: PipelineHandle) -> Result<(), GraphicsError>;

    // Frames
    fn begin_frame(&self, slot: usize) -> Result<(), GraphicsError>;
    fn record(&self, slot: usize, command: Command) -> Result<(), GraphicsError>;
    fn submit_frame(&self, slot: usize) -> Result<(), GraphicsError>;
    fn wait_idle(&self) -> Result<(), GraphicsError>;
}
