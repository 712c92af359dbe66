//! Buffer types and descriptors.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be used as a uniform buffer.
        const UNIFORM = 1 << 2;
        /// Buffer can be used as a storage buffer.
        const STORAGE = 1 << 3;
        /// Buffer can be used for indirect draw arguments.
        const INDIRECT = 1 << 4;
        /// Buffer can be used as a copy source.
        const COPY_SRC = 1 << 5;
        /// Buffer can be used as a copy destination.
        const COPY_DST = 1 << 6;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Where a buffer's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryResidency {
    /// Mapped memory the host writes directly.
    #[default]
    HostVisible,
    /// Device-local memory, written through a staging buffer and a copy.
    DeviceResident,
}

/// Descriptor for creating a single backend buffer allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// How the buffer will be used.
    pub usage: BufferUsage,
    /// Memory placement.
    pub residency: MemoryResidency,
}

impl BufferDescriptor {
    /// Create a host-visible buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
            residency: MemoryResidency::HostVisible,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the memory residency.
    pub fn with_residency(mut self, residency: MemoryResidency) -> Self {
        self.residency = residency;
        self
    }
}
