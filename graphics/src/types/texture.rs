//! Texture and vertex format types.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::Extent2d;

/// Texture pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    R8Unorm,
    R16Float,
    R32Float,
    R32Uint,
    Rg16Float,
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rg32Float,
    Rgba32Float,
    Depth16Unorm,
    Depth24PlusStencil8,
    Depth32Float,
}

impl TextureFormat {
    /// Check if this is a depth or depth/stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm | Self::Depth24PlusStencil8 | Self::Depth32Float
        )
    }

    /// Bytes per texel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::R16Float | Self::Depth16Unorm => 2,
            Self::R32Float
            | Self::R32Uint
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Depth24PlusStencil8
            | Self::Depth32Float => 4,
            Self::Rgba16Float | Self::Rg32Float => 8,
            Self::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const TEXTURE_BINDING = 1 << 2;
        const STORAGE_BINDING = 1 << 3;
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating a 2D texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub size: Extent2d,
    pub mip_level_count: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// Create a single-mip 2D texture descriptor.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            size: Extent2d::new(width, height),
            mip_level_count: 1,
            format,
            usage,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_level_count = count;
        self
    }

    /// Size in bytes of the base mip level.
    pub fn byte_size(&self) -> u64 {
        self.size.width as u64 * self.size.height as u64 * self.format.block_size() as u64
    }
}

/// Format of one vertex attribute as seen by the vertex shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Sint32,
    Sint32x2,
    Sint32x3,
    Sint32x4,
    Uint32,
    Uint32x2,
    Uint32x3,
    Uint32x4,
}

impl VertexFormat {
    /// Size of the attribute in bytes.
    pub fn size(&self) -> u32 {
        match self {
            Self::Float32 | Self::Sint32 | Self::Uint32 => 4,
            Self::Float32x2 | Self::Sint32x2 | Self::Uint32x2 => 8,
            Self::Float32x3 | Self::Sint32x3 | Self::Uint32x3 => 12,
            Self::Float32x4 | Self::Sint32x4 | Self::Uint32x4 => 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_formats() {
        assert!(TextureFormat::Depth32Float.is_depth_stencil());
        assert!(!TextureFormat::Rgba16Float.is_depth_stencil());
    }

    #[test]
    fn test_texture_byte_size() {
        let desc = TextureDescriptor::new_2d(
            4,
            2,
            TextureFormat::Rgba16Float,
            TextureUsage::TEXTURE_BINDING,
        );
        assert_eq!(desc.byte_size(), 64);
    }
}
