//! Mesh: vertex buffers by binding slot plus an optional index buffer.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::Buffer;

/// Geometry drawn by [`Frame::render`](crate::Frame::render).
///
/// Vertex buffers are keyed by the binding slot the pipeline's vertex layout
/// assigns to them. Instance buffers are supplied at draw time instead.
#[derive(Debug, Clone)]
pub struct Mesh {
    label: String,
    vertex_buffers: BTreeMap<u32, Arc<Buffer>>,
    index_buffer: Option<Arc<Buffer>>,
    vertex_count: u32,
    index_count: u32,
}

impl Mesh {
    pub fn new(label: impl Into<String>, vertex_count: u32) -> Self {
        Self {
            label: label.into(),
            vertex_buffers: BTreeMap::new(),
            index_buffer: None,
            vertex_count,
            index_count: 0,
        }
    }

    pub fn with_vertex_buffer(mut self, slot: u32, buffer: Arc<Buffer>) -> Self {
        self.vertex_buffers.insert(slot, buffer);
        self
    }

    /// Draw indexed with `index_count` indices from `buffer`.
    pub fn with_index_buffer(mut self, buffer: Arc<Buffer>, index_count: u32) -> Self {
        self.index_buffer = Some(buffer);
        self.index_count = index_count;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn vertex_buffer(&self, slot: u32) -> Option<&Arc<Buffer>> {
        self.vertex_buffers.get(&slot)
    }

    pub fn vertex_buffers(&self) -> impl Iterator<Item = (u32, &Arc<Buffer>)> {
        self.vertex_buffers.iter().map(|(slot, buffer)| (*slot, buffer))
    }

    pub fn index_buffer(&self) -> Option<&Arc<Buffer>> {
        self.index_buffer.as_ref()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn is_indexed(&self) -> bool {
        self.index_buffer.is_some()
    }
}
