//! Catalog and staging error types.

use std::path::PathBuf;

/// Errors from record persistence and registration.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record already exists: {0}")]
    DuplicateId(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("source already archived with the same content: {0}")]
    AlreadyArchived(PathBuf),

    #[error("transfer error: {0}")]
    Transfer(#[from] chunkferry_transfer::TransferError),
}

/// Errors while preparing or removing a staged copy.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("source file missing: {0}")]
    SourceMissing(PathBuf),

    #[error("staged copy size {actual} does not match recorded size {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("staged copy hash {actual} does not match recorded hash {expected}")]
    HashMismatch { expected: String, actual: String },
}

impl StagingError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
