// Adapter configuration
// Loaded from TOML, with defaults for every key

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration for failure adapters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Symbol prefixes of runtime-internal frames
    pub internal_prefixes: Vec<String>,

    /// Capture the native call stack when an adapter is created
    pub capture_native_frames: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            internal_prefixes: vec![
                "causality_runtime::".to_string(),
                "tokio::runtime::".to_string(),
                "std::rt::".to_string(),
                "std::panicking::".to_string(),
                "core::ops::function::".to_string(),
            ],
            capture_native_frames: true,
        }
    }
}

impl AdapterConfig {
    /// Parse configuration from a TOML document
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Add another internal prefix
    pub fn with_internal_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.internal_prefixes.push(prefix.into());
        self
    }

    /// Enable or disable native frame capture
    pub fn with_native_capture(mut self, enabled: bool) -> Self {
        self.capture_native_frames = enabled;
        self
    }
}
