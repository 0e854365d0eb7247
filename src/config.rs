//! nativelib Configuration
//!
//! Handles parsing and management of nativelib.toml files: where the
//! artifacts tree lives and which extra libraries to bind.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ffi::{ArtifactPathResolver, LibraryDescriptor};
use crate::libraries::ConfiguredLibrary;

/// File name searched for by [`NativeConfig::find_and_load`]
pub const CONFIG_FILE: &str = "nativelib.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Library template '{0}' has no {{name}} placeholder")]
    InvalidTemplate(String),

    #[error("Library '{0}' is not configured")]
    UnknownLibrary(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching nativelib.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NativeConfig {
    /// Artifacts tree location
    #[serde(default)]
    pub artifacts: ArtifactsConfig,

    /// Additional libraries, keyed by a short name
    #[serde(default)]
    pub libraries: BTreeMap<String, LibraryEntry>,
}

impl NativeConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: NativeConfig = toml::from_str(&content)?;

        // Relative roots are relative to the file that names them
        if let (Some(root), Some(dir)) = (config.artifacts.root.as_mut(), path.parent()) {
            if root.is_relative() {
                *root = dir.join(&*root);
            }
        }
        Ok(config)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Path resolver for the configured root, or the default root
    pub fn resolver(&self) -> ArtifactPathResolver {
        match &self.artifacts.root {
            Some(root) => ArtifactPathResolver::new(root),
            None => ArtifactPathResolver::default(),
        }
    }

    /// Configured library by key
    pub fn library(&self, key: &str) -> ConfigResult<ConfiguredLibrary> {
        self.libraries
            .get(key)
            .map(|entry| ConfiguredLibrary::new(key, entry.descriptor()))
            .ok_or_else(|| ConfigError::UnknownLibrary(key.to_string()))
    }
}

/// Artifacts tree settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArtifactsConfig {
    /// Root directory; defaults to `shared/` next to the crate manifest
    #[serde(default)]
    pub root: Option<PathBuf>,
}

/// One `[libraries.<key>]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryEntry {
    /// Header file name without `.h`
    pub header: String,

    /// Library name substituted into the platform template
    pub name: String,

    /// Library version substituted into the platform template
    pub version: String,
}

impl LibraryEntry {
    pub fn descriptor(&self) -> LibraryDescriptor {
        LibraryDescriptor::new(&self.header, &self.name, &self.version)
    }
}
