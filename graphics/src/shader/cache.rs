//! Compiled shader cache, in memory and on disk.

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::cache::CompileCache;
use crate::error::GraphicsError;

use super::compiler::ResolvedCode;
use super::reflect::{ShaderReflection, ShaderReflector};
use super::{ShaderSource, ShaderStage};

/// SPIR-V plus the reflection extracted from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledShader {
    /// Cache key of the source this was built from.
    pub key: String,
    pub stage: ShaderStage,
    pub spirv: Vec<u32>,
    pub reflection: ShaderReflection,
}

#[derive(Serialize, Deserialize)]
struct DiskEntry {
    fingerprint: u64,
    shader: CompiledShader,
}

/// Caches compiled and reflected shaders by source key.
///
/// With a cache directory configured, every compiled shader is also written
/// to disk together with a fingerprint of its source; a later run whose
/// source still matches skips both compilation and reflection.
pub struct ShaderCache {
    directory: Option<PathBuf>,
    shaders: CompileCache<String, Arc<CompiledShader>>,
}

impl ShaderCache {
    /// Create a cache, optionally persisted under `directory`.
    pub fn new(directory: Option<PathBuf>) -> Self {
        Self {
            directory,
            shaders: CompileCache::new(),
        }
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Compile and reflect `source`, or return the cached result.
    pub fn load(&self, source: &ShaderSource) -> Result<Arc<CompiledShader>, GraphicsError> {
        let key = source.cache_key();
        self.shaders
            .get_or_compile(&key, || self.build(&key, source).map(Arc::new))
    }

    /// Number of shaders held in memory.
    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }

    fn build(&self, key: &str, source: &ShaderSource) -> Result<CompiledShader, GraphicsError> {
        let code = ResolvedCode::load(source)?;
        let fingerprint = code.fingerprint(source.stage, &source.entry_point);

        if let Some(shader) = self.read_disk(key, fingerprint) {
            log::debug!("Shader cache hit on disk: {key}");
            return Ok(shader);
        }

        log::debug!("Compiling shader {key}");
        let spirv = code.compile(source.stage, &source.entry_point, key)?;
        let reflection = ShaderReflector::reflect(&spirv, source.stage, &source.entry_point)
            .map_err(|e| match e {
                GraphicsError::ShaderReflectionFailed(msg) => {
                    GraphicsError::ShaderReflectionFailed(format!("{key}: {msg}"))
                }
                other => other,
            })?;

        let shader = CompiledShader {
            key: key.to_string(),
            stage: source.stage,
            spirv,
            reflection,
        };
        self.write_disk(key, fingerprint, &shader);
        Ok(shader)
    }

    fn disk_path(&self, key: &str) -> Option<PathBuf> {
        let directory = self.directory.as_ref()?;
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        Some(directory.join(format!("{:016x}.shader", hasher.finish())))
    }

    fn read_disk(&self, key: &str, fingerprint: u64) -> Option<CompiledShader> {
        let path = self.disk_path(key)?;
        let bytes = std::fs::read(&path).ok()?;
        match bincode::deserialize::<DiskEntry>(&bytes) {
            Ok(entry) if entry.fingerprint == fingerprint && entry.shader.key == key => {
                Some(entry.shader)
            }
            Ok(_) => {
                log::debug!("Shader cache entry for {key} is stale");
                None
            }
            Err(e) => {
                log::warn!("Ignoring unreadable shader cache entry {}: {e}", path.display());
                None
            }
        }
    }

    fn write_disk(&self, key: &str, fingerprint: u64, shader: &CompiledShader) {
        let Some(path) = self.disk_path(key) else {
            return;
        };
        let entry = DiskEntry {
            fingerprint,
            shader: shader.clone(),
        };
        let result = bincode::serialize(&entry)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                std::fs::write(&path, bytes).map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            log::warn!("Failed to write shader cache entry {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ResourceKind;

    const FRAGMENT_WGSL: &str = r#"
@group(1) @binding(0) var albedo: texture_2d<f32>;
@group(1) @binding(1) var albedo_sampler: sampler;

@fragment
fn main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(albedo, albedo_sampler, uv);
}
"#;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "inflight-shader-cache-{name}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_memory_cache_returns_same_arc() {
        let cache = ShaderCache::new(None);
        let source = ShaderSource::wgsl(ShaderStage::Fragment, "albedo", FRAGMENT_WGSL);

        let first = cache.load(&source).unwrap();
        let second = cache.load(&source).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        let albedo = first.reflection.binding(1, 0).unwrap();
        assert_eq!(albedo.kind, ResourceKind::SampledImage);
        let sampler = first.reflection.binding(1, 1).unwrap();
        assert_eq!(sampler.kind, ResourceKind::Sampler);
    }

    #[test]
    fn test_disk_cache_survives_new_instance() {
        let dir = temp_dir("persist");
        let shader_path = dir.join("src").join("albedo.wgsl");
        std::fs::create_dir_all(shader_path.parent().unwrap()).unwrap();
        std::fs::write(&shader_path, FRAGMENT_WGSL).unwrap();
        let source = ShaderSource::from_path(ShaderStage::Fragment, &shader_path);

        let cache_dir = dir.join("cache");
        let compiled = ShaderCache::new(Some(cache_dir.clone())).load(&source).unwrap();
        let entries = std::fs::read_dir(&cache_dir).unwrap().count();
        assert_eq!(entries, 1);

        let reloaded = ShaderCache::new(Some(cache_dir)).load(&source).unwrap();
        assert_eq!(*compiled, *reloaded);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_disk_cache_recompiles_changed_source() {
        let dir = temp_dir("stale");
        std::fs::create_dir_all(&dir).unwrap();
        let shader_path = dir.join("shader.wgsl");
        std::fs::write(&shader_path, FRAGMENT_WGSL).unwrap();
        let source = ShaderSource::from_path(ShaderStage::Fragment, &shader_path);
        let cache_dir = dir.join("cache");

        let before = ShaderCache::new(Some(cache_dir.clone())).load(&source).unwrap();
        assert!(before.reflection.binding(1, 1).is_some());

        let edited = r#"
@group(1) @binding(0) var albedo: texture_2d<f32>;

@fragment
fn main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureLoad(albedo, vec2<i32>(uv), 0);
}
"#;
        std::fs::write(&shader_path, edited).unwrap();
        let after = ShaderCache::new(Some(cache_dir)).load(&source).unwrap();
        assert!(after.reflection.binding(1, 1).is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bad_source_is_an_error() {
        let cache = ShaderCache::new(None);
        let source = ShaderSource::spirv(ShaderStage::Vertex, "garbage", vec![1, 2, 3]);
        assert!(matches!(
            cache.load(&source),
            Err(GraphicsError::ShaderReflectionFailed(msg)) if msg.contains("garbage")
        ));
        assert!(cache.is_empty());
    }
}
