//! Common types and descriptors for graphics resources.
//!
//! This module contains format enums, usage flags, and descriptor structs
//! used throughout the graphics system. Everything here is plain data and
//! serde-serializable so pass configuration can be loaded from disk.

mod buffer;
mod common;
mod sampler;
mod state;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage, MemoryResidency};
pub use common::{ClearValue, Extent2d, ImageLayout, LoadOp, ScissorRect, StoreOp, Viewport};
pub use sampler::{AddressMode, CompareFunction, FilterMode, SamplerDescriptor};
pub use state::{BlendFactor, BlendState, CullMode, DepthState, PrimitiveTopology};
pub use texture::{TextureDescriptor, TextureFormat, TextureUsage, VertexFormat};
