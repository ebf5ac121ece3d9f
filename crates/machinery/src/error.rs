//! Errors raised while building, patching and serializing machine configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the configuration stack.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A Talos or Kubernetes version string could not be parsed.
    #[error("error parsing version {0:?}")]
    VersionParse(String),

    /// A config patch could not be decoded.
    #[error("failed to load patch: {0}")]
    PatchLoad(String),

    /// JSON6902 patches only work on single-document configurations.
    #[error("JSON6902 patches are not supported for multi-document machine configuration")]
    Json6902MultiDoc,

    /// A JSON6902 operation failed against the document.
    #[error("failed to apply JSON6902 patch: {0}")]
    Json6902(#[from] json_patch::PatchError),

    /// YAML encoding or decoding failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Certificate or key generation failed.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// Reading or writing a file failed.
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration is structurally invalid.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<rcgen::Error> for ConfigError {
    fn from(err: rcgen::Error) -> Self {
        Self::Certificate(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ConfigError>;
