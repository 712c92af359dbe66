//! Fixed-function pipeline state.

use serde::{Deserialize, Serialize};

use super::sampler::CompareFunction;

/// Source and destination factor of a blend equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

/// Color blending for every color target of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlendState {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
}

impl BlendState {
    /// Standard `src * a + dst * (1 - a)` blending.
    pub const ALPHA: Self = Self {
        src_factor: BlendFactor::SrcAlpha,
        dst_factor: BlendFactor::OneMinusSrcAlpha,
    };

    /// Additive blending.
    pub const ADDITIVE: Self = Self {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::One,
    };
}

/// Depth testing and writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub compare: CompareFunction,
}

impl DepthState {
    /// No depth test, no depth writes.
    pub const DISABLED: Self = Self {
        test: false,
        write: false,
        compare: CompareFunction::Always,
    };
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            test: true,
            write: true,
            compare: CompareFunction::Less,
        }
    }
}

/// Face culling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

/// Primitive assembly topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    #[default]
    TriangleList,
    TriangleStrip,
}
