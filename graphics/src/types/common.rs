//! Common types shared across the graphics system.

use serde::{Deserialize, Serialize};

// ============================================================================
// Extent2d
// ============================================================================

/// 2D extent in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent2d {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Extent2d {
    /// Create a new extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Scale by `factor`, rounding down and clamping each side to at least one pixel.
    pub fn scaled(self, factor: f32) -> Self {
        let scale = |v: u32| ((v as f64 * factor as f64).floor() as u32).max(1);
        Self::new(scale(self.width), scale(self.height))
    }

    /// Width divided by height, or 1.0 for a degenerate extent.
    pub fn aspect_ratio(self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

// ============================================================================
// Viewport and Scissor
// ============================================================================

/// Viewport for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Full-extent viewport with the standard 0..1 depth range.
    pub fn from_extent(extent: Extent2d) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Scissor rectangle for clipping rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    /// Create a scissor rectangle from dimensions with origin at (0, 0).
    pub fn from_extent(extent: Extent2d) -> Self {
        Self {
            x: 0,
            y: 0,
            width: extent.width,
            height: extent.height,
        }
    }
}

// ============================================================================
// Attachment policy
// ============================================================================

/// Clear value for render targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearValue {
    /// Clear a color attachment with RGBA values.
    Color([f32; 4]),
    /// Clear a depth/stencil attachment.
    DepthStencil { depth: f32, stencil: u32 },
}

impl ClearValue {
    /// Opaque black.
    pub const BLACK: Self = Self::Color([0.0, 0.0, 0.0, 1.0]);

    /// Create a color clear value.
    pub fn color(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self::Color([r, g, b, a])
    }

    /// Create a depth clear value with stencil zero.
    pub fn depth(depth: f32) -> Self {
        Self::DepthStencil { depth, stencil: 0 }
    }
}

/// What happens to attachment contents when a pass begins.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOp {
    /// Clear to the given value.
    Clear(ClearValue),
    /// Keep the previous contents.
    #[default]
    Load,
    /// Contents are undefined.
    DontCare,
}

/// What happens to attachment contents when a pass ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOp {
    /// Keep the rendered contents.
    #[default]
    Store,
    /// Contents may be discarded.
    DontCare,
}

/// Layout an attachment image is left in after its pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageLayout {
    Undefined,
    ColorAttachment,
    DepthStencilAttachment,
    #[default]
    ShaderReadOnly,
    General,
    TransferSrc,
    Present,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_scaled_floors() {
        let extent = Extent2d::new(1921, 1081);
        assert_eq!(extent.scaled(0.5), Extent2d::new(960, 540));
        assert_eq!(extent.scaled(1.0), extent);
    }

    #[test]
    fn test_extent_scaled_never_zero() {
        assert_eq!(Extent2d::new(1, 3).scaled(0.25), Extent2d::new(1, 1));
    }

    #[test]
    fn test_load_op_default_is_load() {
        assert_eq!(LoadOp::default(), LoadOp::Load);
        assert_eq!(
            LoadOp::Clear(ClearValue::depth(1.0)),
            LoadOp::Clear(ClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0
            })
        );
    }
}
