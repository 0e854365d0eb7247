//! FFI Errors
//!
//! Error taxonomy shared by platform matching, path resolution, binding and
//! the loader guard.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Error type for native library operations
#[derive(Debug, Error)]
pub enum NativeError {
    /// No platform table entry matches the running OS/architecture
    #[error("Unsupported platform: {os}-{arch}")]
    PlatformUnsupported { os: String, arch: String },

    /// Interface description or binary artifact absent or unreadable
    #[error("Missing artifact '{}': {source}", path.display())]
    MissingArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Interface/binary mismatch, unknown type or constant, invalid cast
    #[error("Binding error: {0}")]
    Binding(String),

    /// Operation requires a loaded binding
    #[error("Library '{0}' is not loaded")]
    NotLoaded(String),

    /// `load()` called on an already loaded binding
    #[error("Library '{0}' is already loaded")]
    AlreadyLoaded(String),

    /// `load()` called again after a failed load
    #[error("Library '{0}' failed to load and cannot be reloaded in place")]
    LoadFailed(String),

    /// Operation on a disposed binding
    #[error("Library '{0}' has been disposed")]
    Disposed(String),

    /// Malformed platform template or configuration file
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl NativeError {
    /// Shorthand for a [`NativeError::Binding`] with a formatted message
    pub fn binding(message: impl Into<String>) -> Self {
        NativeError::Binding(message.into())
    }

    /// Build a [`NativeError::MissingArtifact`] for `path`
    pub fn missing(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        NativeError::MissingArtifact {
            path: path.into(),
            source,
        }
    }

    /// Whether this error makes the whole binding unusable
    pub fn is_fatal(&self) -> bool {
        !matches!(self, NativeError::Binding(_))
    }
}

/// Result type for native library operations.
pub type NativeResult<T> = Result<T, NativeError>;
