//! Shader sources, compilation, reflection and caching.
//!
//! Shaders enter the system as a [`ShaderSource`]: SPIR-V bytecode or WGSL/GLSL
//! text, inline or on disk. The [`ShaderCache`] turns a source into a
//! [`CompiledShader`] holding SPIR-V words plus the [`ShaderReflection`]
//! extracted by [`ShaderReflector`]. Results are cached in memory and,
//! optionally, on disk keyed by the source path.

mod cache;
mod compiler;
mod reflect;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use cache::{CompiledShader, ShaderCache};
pub use compiler::compile_to_spirv;
pub use reflect::{
    ReflectedBinding, ReflectedMember, ResourceKind, ShaderReflection, ShaderReflector,
    VertexAttribute,
};

/// Programmable pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// The stage mask containing only this stage.
    pub fn flag(self) -> ShaderStageFlags {
        match self {
            Self::Vertex => ShaderStageFlags::VERTEX,
            Self::Fragment => ShaderStageFlags::FRAGMENT,
            Self::Compute => ShaderStageFlags::COMPUTE,
        }
    }

    pub(crate) fn to_naga(self) -> naga::ShaderStage {
        match self {
            Self::Vertex => naga::ShaderStage::Vertex,
            Self::Fragment => naga::ShaderStage::Fragment,
            Self::Compute => naga::ShaderStage::Compute,
        }
    }
}

bitflags::bitflags! {
    /// Shader stages that can access a binding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ShaderStageFlags: u32 {
        /// Vertex shader stage.
        const VERTEX = 1 << 0;
        /// Fragment shader stage.
        const FRAGMENT = 1 << 1;
        /// Compute shader stage.
        const COMPUTE = 1 << 2;
    }
}

/// Where a shader's code comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderCode {
    /// A file on disk; the extension selects the language (`.spv`, `.wgsl`,
    /// `.vert`/`.frag`/`.comp`/`.glsl`).
    Path(PathBuf),
    /// Inline SPIR-V words.
    SpirV(Vec<u32>),
    /// Inline WGSL source.
    Wgsl(String),
    /// Inline GLSL source.
    Glsl(String),
}

/// One shader stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderSource {
    pub stage: ShaderStage,
    pub code: ShaderCode,
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    /// Cache key for inline code. File sources are keyed by their path.
    #[serde(default)]
    pub label: Option<String>,
}

fn default_entry_point() -> String {
    "main".to_string()
}

impl ShaderSource {
    /// Load a shader from a file.
    pub fn from_path(stage: ShaderStage, path: impl AsRef<Path>) -> Self {
        Self {
            stage,
            code: ShaderCode::Path(path.as_ref().to_path_buf()),
            entry_point: default_entry_point(),
            label: None,
        }
    }

    /// Use already compiled SPIR-V words.
    pub fn spirv(stage: ShaderStage, label: impl Into<String>, words: Vec<u32>) -> Self {
        Self {
            stage,
            code: ShaderCode::SpirV(words),
            entry_point: default_entry_point(),
            label: Some(label.into()),
        }
    }

    /// Compile inline WGSL.
    pub fn wgsl(stage: ShaderStage, label: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            stage,
            code: ShaderCode::Wgsl(source.into()),
            entry_point: default_entry_point(),
            label: Some(label.into()),
        }
    }

    /// Compile inline GLSL.
    pub fn glsl(stage: ShaderStage, label: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            stage,
            code: ShaderCode::Glsl(source.into()),
            entry_point: default_entry_point(),
            label: Some(label.into()),
        }
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    /// Key under which the compiled result is cached.
    pub fn cache_key(&self) -> String {
        let base = match (&self.code, &self.label) {
            (ShaderCode::Path(path), _) => path.to_string_lossy().into_owned(),
            (_, Some(label)) => label.clone(),
            (_, None) => "<inline>".to_string(),
        };
        format!("{base}#{}:{:?}", self.entry_point, self.stage)
    }
}
