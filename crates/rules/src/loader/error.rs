//! Loader errors and the per-file scan report.

use std::path::PathBuf;

use crate::schema::ConfigKind;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed YAML or an envelope missing `apiVersion`/`kind`/`metadata`.
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("metadata.id must not be empty")]
    MissingId,

    /// Envelope parsed but the body does not fit its kind (unknown kind,
    /// bad pattern shape, invalid step order, ...).
    #[error("invalid {kind} '{id}': {message}")]
    InvalidDocument {
        kind: String,
        id: String,
        message: String,
    },

    #[error("config watcher error: {0}")]
    Notify(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// What happened to one file during a scan.
#[derive(Debug)]
pub struct LoadResult {
    pub path: PathBuf,
    pub status: LoadStatus,
}

#[derive(Debug)]
pub enum LoadStatus {
    Loaded { id: String, kind: ConfigKind },
    Skipped { reason: String },
    /// The file keeps its previously loaded version, if any.
    Failed { error: String },
}

impl LoadResult {
    pub fn is_loaded(&self) -> bool {
        matches!(self.status, LoadStatus::Loaded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, LoadStatus::Failed { .. })
    }
}
