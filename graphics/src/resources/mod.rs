//! GPU resources.
//!
//! - [`Buffer`] - GPU memory buffer, optionally duplicated per frame in flight
//! - [`Texture`] - GPU image with an optional cached sampler
//! - [`Mesh`] - vertex and index buffers drawn together
//!
//! Resources hold an `Arc` to their [`GraphicsDevice`] and release their
//! backend objects through its deletion queue when dropped.
//!
//! [`GraphicsDevice`]: crate::GraphicsDevice

mod buffer;
mod mesh;
mod texture;

pub use buffer::{Buffer, BufferCreateInfo};
pub use mesh::Mesh;
pub use texture::Texture;
