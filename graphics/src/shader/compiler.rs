//! Shader source to SPIR-V compilation using naga.

use std::hash::{Hash, Hasher};
use std::path::Path;

use naga::back::spv;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use rustc_hash::FxHasher;

use crate::error::GraphicsError;
use crate::profile_scope;

use super::reflect::ShaderReflector;
use super::{ShaderCode, ShaderSource, ShaderStage};

/// Source code after reading it from disk, before compilation.
pub(crate) enum ResolvedCode {
    SpirV(Vec<u32>),
    Wgsl(String),
    Glsl(String),
}

impl ResolvedCode {
    /// Read a source into memory. File sources pick their language by extension.
    pub(crate) fn load(source: &ShaderSource) -> Result<Self, GraphicsError> {
        match &source.code {
            ShaderCode::Path(path) => Self::load_file(path),
            ShaderCode::SpirV(words) => Ok(Self::SpirV(words.clone())),
            ShaderCode::Wgsl(text) => Ok(Self::Wgsl(text.clone())),
            ShaderCode::Glsl(text) => Ok(Self::Glsl(text.clone())),
        }
    }

    fn load_file(path: &Path) -> Result<Self, GraphicsError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let read_text = || {
            std::fs::read_to_string(path)
                .map_err(|e| GraphicsError::Io(format!("{}: {e}", path.display())))
        };
        match extension.as_str() {
            "spv" => {
                let bytes = std::fs::read(path)
                    .map_err(|e| GraphicsError::Io(format!("{}: {e}", path.display())))?;
                Ok(Self::SpirV(ShaderReflector::words_from_bytes(&bytes)?))
            }
            "wgsl" => Ok(Self::Wgsl(read_text()?)),
            "glsl" | "vert" | "frag" | "comp" => Ok(Self::Glsl(read_text()?)),
            other => Err(GraphicsError::ShaderCompilationFailed(format!(
                "{}: unknown shader extension '{other}'",
                path.display()
            ))),
        }
    }

    /// Content hash used to detect stale disk cache entries.
    pub(crate) fn fingerprint(&self, stage: ShaderStage, entry_point: &str) -> u64 {
        let mut hasher = FxHasher::default();
        stage.hash(&mut hasher);
        entry_point.hash(&mut hasher);
        match self {
            Self::SpirV(words) => words.hash(&mut hasher),
            Self::Wgsl(text) => ("wgsl", text).hash(&mut hasher),
            Self::Glsl(text) => ("glsl", text).hash(&mut hasher),
        }
        hasher.finish()
    }

    /// Produce SPIR-V for a single entry point.
    pub(crate) fn compile(
        self,
        stage: ShaderStage,
        entry_point: &str,
        label: &str,
    ) -> Result<Vec<u32>, GraphicsError> {
        profile_scope!("shader_compile");

        let module = match self {
            Self::SpirV(words) => return Ok(words),
            Self::Wgsl(text) => naga::front::wgsl::parse_str(&text).map_err(|e| {
                GraphicsError::ShaderCompilationFailed(format!(
                    "{label}: {}",
                    e.emit_to_string(&text)
                ))
            })?,
            Self::Glsl(text) => {
                let options = naga::front::glsl::Options::from(stage.to_naga());
                naga::front::glsl::Frontend::default()
                    .parse(&options, &text)
                    .map_err(|e| {
                        GraphicsError::ShaderCompilationFailed(format!("{label}: {e:?}"))
                    })?
            }
        };

        let info = Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|e| {
                GraphicsError::ShaderCompilationFailed(format!("{label}: validation: {e:?}"))
            })?;

        let options = spv::Options {
            flags: spv::WriterFlags::DEBUG | spv::WriterFlags::LABEL_VARYINGS,
            ..Default::default()
        };
        let pipeline_options = spv::PipelineOptions {
            shader_stage: stage.to_naga(),
            entry_point: entry_point.to_string(),
        };

        spv::write_vec(&module, &info, &options, Some(&pipeline_options)).map_err(|e| {
            GraphicsError::ShaderCompilationFailed(format!("{label}: SPIR-V output: {e}"))
        })
    }
}

/// Compile a shader source to SPIR-V without caching.
pub fn compile_to_spirv(source: &ShaderSource) -> Result<Vec<u32>, GraphicsError> {
    let label = source.cache_key();
    ResolvedCode::load(source)?.compile(source.stage, &source.entry_point, &label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::reflect::SPIRV_MAGIC;

    #[test]
    fn test_compile_wgsl_produces_spirv() {
        let source = ShaderSource::wgsl(
            ShaderStage::Compute,
            "noop",
            "@compute @workgroup_size(1) fn main() {}",
        );
        let words = compile_to_spirv(&source).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn test_compile_reports_syntax_errors() {
        let source = ShaderSource::wgsl(ShaderStage::Fragment, "broken", "fn main( {");
        match compile_to_spirv(&source) {
            Err(GraphicsError::ShaderCompilationFailed(msg)) => assert!(msg.contains("broken")),
            other => panic!("expected compilation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_spirv_passes_through() {
        let words = vec![SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        let source = ShaderSource::spirv(ShaderStage::Vertex, "raw", words.clone());
        assert_eq!(compile_to_spirv(&source).unwrap(), words);
    }

    #[test]
    fn test_unknown_extension() {
        let source = ShaderSource::from_path(ShaderStage::Vertex, "shader.hlsl");
        assert!(matches!(
            compile_to_spirv(&source),
            Err(GraphicsError::ShaderCompilationFailed(_))
        ));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = ResolvedCode::Wgsl("a".to_string()).fingerprint(ShaderStage::Vertex, "main");
        let b = ResolvedCode::Wgsl("b".to_string()).fingerprint(ShaderStage::Vertex, "main");
        let a_again = ResolvedCode::Wgsl("a".to_string()).fingerprint(ShaderStage::Vertex, "main");
        assert_ne!(a, b);
        assert_eq!(a, a_again);
    }
}
