//! Error taxonomy shared by every shape-sync module.

use shape_sync_path::PathError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Leaf sequence and shape disagree in arity or leaf kind.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// The referenced structure (or the prior object for a differential)
    /// is not held locally.
    #[error("unknown structure: {0}")]
    UnknownStructure(String),
    #[error("unsupported packet type: {0}")]
    UnsupportedPacketType(String),
    #[error("access tracker already disposed")]
    TrackerDisposed,
    #[error("structure nests deeper than {limit} levels at {path:?}")]
    CyclicStructure { path: String, limit: usize },
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("malformed opaque value: {0}")]
    MalformedOpaque(String),
    #[error("invalid registry snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),
    #[error("packet serialization failed: {0}")]
    Wire(#[from] serde_json::Error),
}

impl SyncError {
    pub(crate) fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        SyncError::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn from_path_error(path: &str, err: PathError) -> Self {
        Self::invalid_path(path, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
