//! Failure kinds of a transfer step.

use chunkferry_catalog::{CatalogError, StagingError};

/// Why a record could not advance.
///
/// Every variant leaves the persisted record consistent: chunk progress
/// only moves on acknowledged chunks.
#[derive(Debug, thiserror::Error)]
pub enum TransferFailure {
    /// Liveness check failed or the remote resource could not be created.
    #[error("archive endpoint unreachable: {0}")]
    Connectivity(String),

    /// A chunk exhausted its retry budget.
    #[error("chunk {index} not accepted (status {status:?}): {message}")]
    ChunkTransfer {
        index: u64,
        status: Option<u16>,
        message: String,
    },

    /// Source unreadable, staging not writable, or the staged copy does not
    /// match the record.
    #[error("staging failed: {0}")]
    Staging(String),

    /// The stored record breaks its own invariants and cannot be advanced.
    #[error("inconsistent record: {0}")]
    InvalidRecord(String),

    #[error("cleanup failed: {0}")]
    Cleanup(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

impl TransferFailure {
    /// Staging failures and inconsistent records need operator attention
    /// and are not retried by the next pass on their own; everything else is.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferFailure::Staging(_) | TransferFailure::InvalidRecord(_) => false,
            TransferFailure::Connectivity(_)
            | TransferFailure::ChunkTransfer { .. }
            | TransferFailure::Cleanup(_)
            | TransferFailure::Catalog(_) => true,
        }
    }
}

impl From<StagingError> for TransferFailure {
    fn from(e: StagingError) -> Self {
        TransferFailure::Staging(e.to_string())
    }
}
