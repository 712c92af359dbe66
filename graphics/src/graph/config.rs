//! TOML description of a render graph.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::DeviceParameters;
use crate::error::GraphicsError;

use super::RenderPassDescriptor;

/// Device parameters plus the ordered list of passes.
///
/// ```toml
/// [device]
/// frames_in_flight = 3
///
/// [[passes]]
/// name = "main"
/// size = { mode = "viewport", scale = 1.0 }
///
/// [[passes.attachments]]
/// name = "color"
/// format = "rgba8_unorm"
/// load_op = { clear = { color = [0.0, 0.0, 0.0, 1.0] } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default)]
    pub device: DeviceParameters,
    #[serde(default)]
    pub passes: Vec<RenderPassDescriptor>,
}

impl GraphConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, GraphicsError> {
        let config: Self =
            toml::from_str(text).map_err(|e| GraphicsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, GraphicsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GraphicsError::Io(format!("{}: {e}", path.display())))?;
        log::info!("Loading graph config from {}", path.display());
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, GraphicsError> {
        toml::to_string(self).map_err(|e| GraphicsError::Config(e.to_string()))
    }

    /// Pass names must be unique.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        let mut seen = HashSet::new();
        for pass in &self.passes {
            if !seen.insert(pass.name.as_str()) {
                return Err(GraphicsError::DuplicatePass(pass.name.clone()));
            }
        }
        Ok(())
    }

    pub fn pass(&self, name: &str) -> Option<&RenderPassDescriptor> {
        self.passes.iter().find(|pass| pass.name == name)
    }
}
