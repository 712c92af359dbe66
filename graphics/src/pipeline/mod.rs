//! Pipelines built from shader reflection.
//!
//! A [`PipelineDescriptor`] names the shader sources and fixed-function state
//! of one pipeline. [`Pipeline::create`] turns it into a backend pipeline:
//!
//! ```text
//!  ShaderSource ──ShaderCache──► SPIR-V + ShaderReflection   (per stage)
//!                                        │
//!                         PipelineLayoutBuilder::add_stage
//!                                        ▼
//!                     set → DescriptorSetLayout → UniformLayout
//!                                        │
//!  vertex attributes + vertex_bindings ──┼──► VertexBufferLayout
//!                                        ▼
//!                            GpuBackend::create_pipeline
//! ```
//!
//! No binding table is ever written by hand: every descriptor-set layout and
//! vertex layout comes from the compiled shaders.

mod layout;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{
    Command, PipelineCreateInfo, PipelineHandle, VertexAttributeLayout, VertexBufferLayout,
};
use crate::cache::CompileCache;
use crate::deletion::DeferredResource;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::frame::Frame;
use crate::graph::PassKind;
use crate::shader::{CompiledShader, ShaderSource, ShaderStage, VertexAttribute};
use crate::types::{BlendState, CullMode, DepthState, PrimitiveTopology, TextureFormat};
use crate::uniform::{UniformLayout, UniformWriter};

pub use layout::{DescriptorSetLayout, PipelineLayoutBuilder};

/// Configuration of one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineDescriptor {
    pub label: String,
    pub kind: PassKind,
    pub shaders: Vec<ShaderSource>,
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub blend: Option<BlendState>,
    pub depth: DepthState,
    pub cull_mode: CullMode,
    pub topology: PrimitiveTopology,
    /// Vertex attribute name → vertex buffer binding slot. When empty, every
    /// attribute is read from slot 0.
    pub vertex_bindings: BTreeMap<String, u32>,
    /// Binding slots that advance per instance.
    pub instance_bindings: BTreeSet<u32>,
}

impl PipelineDescriptor {
    /// A graphics pipeline from a vertex and a fragment stage.
    pub fn graphics(label: impl Into<String>, vertex: ShaderSource, fragment: ShaderSource) -> Self {
        Self {
            label: label.into(),
            kind: PassKind::Graphics,
            shaders: vec![vertex, fragment],
            color_formats: vec![TextureFormat::Rgba8Unorm],
            ..Default::default()
        }
    }

    /// A compute pipeline from one compute stage.
    pub fn compute(label: impl Into<String>, compute: ShaderSource) -> Self {
        Self {
            label: label.into(),
            kind: PassKind::Compute,
            shaders: vec![compute],
            depth: DepthState::DISABLED,
            ..Default::default()
        }
    }

    pub fn with_color_formats(mut self, formats: Vec<TextureFormat>) -> Self {
        self.color_formats = formats;
        self
    }

    pub fn with_depth_format(mut self, format: TextureFormat) -> Self {
        self.depth_format = Some(format);
        self
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = Some(blend);
        self
    }

    pub fn with_depth(mut self, depth: DepthState) -> Self {
        self.depth = depth;
        self
    }

    /// Read attribute `name` from vertex buffer `slot`.
    pub fn with_vertex_binding(mut self, name: impl Into<String>, slot: u32) -> Self {
        self.vertex_bindings.insert(name.into(), slot);
        self
    }

    /// Advance vertex buffer `slot` per instance.
    pub fn with_instance_binding(mut self, slot: u32) -> Self {
        self.instance_bindings.insert(slot);
        self
    }

    fn stage(&self, stage: ShaderStage) -> impl Iterator<Item = &ShaderSource> {
        self.shaders.iter().filter(move |s| s.stage == stage)
    }

    fn validate_stages(&self) -> Result<(), GraphicsError> {
        let count = |stage| self.stage(stage).count();
        let (vertex, fragment, compute) = (
            count(ShaderStage::Vertex),
            count(ShaderStage::Fragment),
            count(ShaderStage::Compute),
        );
        let valid = match self.kind {
            PassKind::Graphics => vertex == 1 && fragment <= 1 && compute == 0,
            PassKind::Compute => vertex == 0 && fragment == 0 && compute == 1,
        };
        if valid {
            Ok(())
        } else {
            Err(GraphicsError::InvalidParameter(format!(
                "{:?} pipeline '{}' has {vertex} vertex, {fragment} fragment and {compute} compute stages",
                self.kind, self.label
            )))
        }
    }
}

/// A backend pipeline with the uniform layouts reflected from its shaders.
pub struct Pipeline {
    device: Arc<GraphicsDevice>,
    descriptor: PipelineDescriptor,
    handle: PipelineHandle,
    layouts: BTreeMap<u32, Arc<UniformLayout>>,
    vertex_buffers: Vec<VertexBufferLayout>,
    shaders: Vec<Arc<CompiledShader>>,
}

impl Pipeline {
    /// Compile, reflect and create the pipeline described by `descriptor`.
    pub fn create(
        device: &Arc<GraphicsDevice>,
        descriptor: &PipelineDescriptor,
    ) -> Result<Arc<Self>, GraphicsError> {
        descriptor.validate_stages()?;

        let shaders = descriptor
            .shaders
            .iter()
            .map(|source| device.shader_cache().load(source))
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = PipelineLayoutBuilder::new();
        for shader in &shaders {
            builder.add_stage(&shader.reflection).map_err(|e| {
                GraphicsError::InvalidParameter(format!(
                    "pipeline '{}', shader '{}': {e}",
                    descriptor.label, shader.key
                ))
            })?;
        }
        let layouts = builder.build_uniform_layouts(device)?;

        let vertex_buffers = match shaders.iter().find(|s| s.stage == ShaderStage::Vertex) {
            Some(vertex) => vertex_buffer_layouts(descriptor, &vertex.reflection.attributes)?,
            None => Vec::new(),
        };

        let info = PipelineCreateInfo {
            label: descriptor.label.clone(),
            kind: descriptor.kind,
            stages: shaders
                .iter()
                .map(|s| {
                    (
                        s.stage,
                        s.reflection.entry_point.clone(),
                        Arc::from(s.spirv.as_slice()),
                    )
                })
                .collect(),
            set_layouts: layouts.iter().map(|(set, l)| (*set, l.handle())).collect(),
            vertex_buffers: vertex_buffers.clone(),
            color_formats: descriptor.color_formats.clone(),
            depth_format: descriptor.depth_format,
            blend: descriptor.blend,
            depth: descriptor.depth,
            cull_mode: descriptor.cull_mode,
            topology: descriptor.topology,
        };
        let handle = device.backend().create_pipeline(&info)?;
        log::debug!(
            "Created {:?} pipeline '{}' with sets {:?}",
            descriptor.kind,
            descriptor.label,
            layouts.keys().collect::<Vec<_>>()
        );

        Ok(Arc::new(Self {
            device: Arc::clone(device),
            descriptor: descriptor.clone(),
            handle,
            layouts,
            vertex_buffers,
            shaders,
        }))
    }

    pub fn label(&self) -> &str {
        &self.descriptor.label
    }

    pub fn kind(&self) -> PassKind {
        self.descriptor.kind
    }

    pub fn descriptor(&self) -> &PipelineDescriptor {
        &self.descriptor
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle
    }

    /// Uniform layout of descriptor set `set`, if the shaders declare it.
    pub fn layout(&self, set: u32) -> Option<&Arc<UniformLayout>> {
        self.layouts.get(&set)
    }

    pub fn layouts(&self) -> &BTreeMap<u32, Arc<UniformLayout>> {
        &self.layouts
    }

    /// A fresh writer for descriptor set `set`.
    pub fn create_writer(&self, set: u32) -> Option<UniformWriter> {
        self.layout(set).map(|layout| {
            UniformWriter::with_label(Arc::clone(layout), format!("{}/set{set}", self.label()))
        })
    }

    pub fn vertex_buffers(&self) -> &[VertexBufferLayout] {
        &self.vertex_buffers
    }

    pub fn shaders(&self) -> &[Arc<CompiledShader>] {
        &self.shaders
    }

    /// Bind the pipeline for the commands that follow.
    pub fn bind(&self, frame: &mut Frame) {
        frame.record(Command::BindPipeline(self.handle));
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.device
            .defer_destroy(DeferredResource::Pipeline(self.handle));
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("label", &self.descriptor.label)
            .field("kind", &self.descriptor.kind)
            .field("sets", &self.layouts.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Group reflected vertex attributes into buffer bindings.
///
/// Attributes are packed in location order within their slot. Matrix inputs
/// occupy one location per row.
pub(crate) fn vertex_buffer_layouts(
    descriptor: &PipelineDescriptor,
    attributes: &[VertexAttribute],
) -> Result<Vec<VertexBufferLayout>, GraphicsError> {
    let mut sorted: Vec<&VertexAttribute> = attributes.iter().collect();
    sorted.sort_by_key(|a| a.location);

    let mut slots: BTreeMap<u32, VertexBufferLayout> = BTreeMap::new();
    for attribute in sorted {
        let slot = if descriptor.vertex_bindings.is_empty() {
            0
        } else {
            *descriptor
                .vertex_bindings
                .get(&attribute.name)
                .ok_or_else(|| {
                    GraphicsError::MissingBinding(format!(
                        "vertex attribute '{}' (location {}) of pipeline '{}' has no binding slot",
                        attribute.name, attribute.location, descriptor.label
                    ))
                })?
        };

        let layout = slots.entry(slot).or_insert_with(|| VertexBufferLayout {
            binding: slot,
            stride: 0,
            per_instance: descriptor.instance_bindings.contains(&slot),
            attributes: Vec::new(),
        });
        layout.attributes.push(VertexAttributeLayout {
            attribute: attribute.clone(),
            offset: layout.stride,
        });
        layout.stride += attribute.format.size() * attribute.rows.max(1);
    }
    Ok(slots.into_values().collect())
}

/// Pipelines created once per descriptor.
///
/// Owned by the render graph and shared by its passes.
pub struct PipelineCache {
    device: Arc<GraphicsDevice>,
    pipelines: CompileCache<PipelineDescriptor, Arc<Pipeline>>,
}

impl PipelineCache {
    pub fn new(device: &Arc<GraphicsDevice>) -> Self {
        Self {
            device: Arc::clone(device),
            pipelines: CompileCache::new(),
        }
    }

    /// The pipeline for `descriptor`, created on first request.
    pub fn get_or_create(
        &self,
        descriptor: &PipelineDescriptor,
    ) -> Result<Arc<Pipeline>, GraphicsError> {
        self.pipelines.get_or_compile(descriptor, || {
            log::debug!("Pipeline cache miss for '{}'", descriptor.label);
            Pipeline::create(&self.device, descriptor)
        })
    }

    pub fn get(&self, descriptor: &PipelineDescriptor) -> Option<Arc<Pipeline>> {
        self.pipelines.get(descriptor)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Drop every cached pipeline.
    pub fn clear(&self) {
        self.pipelines.drain();
    }
}
