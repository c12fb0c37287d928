//! Data types for the transfer flow.

use chunkferry_transfer::TransferRecord;

use crate::error::TransferFailure;

/// How an `advance` call ended without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Every chunk is acknowledged.
    Finished,
    /// Stopped between chunks because the run was cancelled.
    Paused,
}

/// Outcome of one `advance` call: the record as last persisted plus what happened.
#[derive(Debug)]
pub struct Advance {
    pub record: TransferRecord,
    pub result: Result<Completion, TransferFailure>,
}

impl Advance {
    pub(crate) fn done(record: TransferRecord, completion: Completion) -> Self {
        Self {
            record,
            result: Ok(completion),
        }
    }

    pub(crate) fn failed(record: TransferRecord, failure: TransferFailure) -> Self {
        Self {
            record,
            result: Err(failure),
        }
    }
}

/// Event emitted while a pass runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// A chunk was acknowledged and persisted.
    Progress {
        record_id: String,
        next_chunk_index: u64,
        total_chunks: u64,
    },
    /// The last chunk of a record was acknowledged.
    Finished { record_id: String },
    /// A record stopped on a failure.
    Failed {
        record_id: String,
        error: String,
        retryable: bool,
    },
    /// A finished record was closed and removed from the catalog.
    CleanedUp { record_id: String },
}

/// Counters of one orchestrator pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub cleaned_up: usize,
    pub cleanup_failed: usize,
    /// Pending records dropped because their source disappeared.
    pub pruned: usize,
    pub finished: usize,
    pub paused: usize,
    pub failed: usize,
    /// Records skipped because another driver holds them.
    pub skipped: usize,
}

/// Settings for the orchestrator worker pool.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Records advanced in parallel.
    pub workers: usize,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            event_buffer: 256,
        }
    }
}
