//! Descriptor-set layouts and the writers that fill them.
//!
//! A [`UniformLayout`] is the immutable schema of one descriptor set, built
//! from reflection. A [`UniformWriter`] stages buffer and texture writes
//! against a layout and flushes them into one backend descriptor set per
//! frame in flight.

mod layout;
mod writer;

pub use layout::UniformLayout;
pub use writer::{BindingRef, UniformWriter};
