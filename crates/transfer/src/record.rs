use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TransferError;
use crate::chunked::total_chunks;

/// Lifecycle of a transfer.
///
/// `Error` is not terminal: the record is picked up again and resumes at
/// `next_chunk_index`. `Finished` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    NotStarted,
    InProgress,
    Error,
    Finished,
}

impl TransferStatus {
    /// Status after a successful liveness check.
    pub fn on_start(self) -> Self {
        match self {
            TransferStatus::NotStarted => TransferStatus::InProgress,
            TransferStatus::InProgress | TransferStatus::Error | TransferStatus::Finished => self,
        }
    }

    /// Status after a chunk was accepted; `complete` is set when it was the last one.
    pub fn on_chunk_success(self, complete: bool) -> Self {
        match (self, complete) {
            (TransferStatus::Finished, _) => TransferStatus::Finished,
            (TransferStatus::NotStarted | TransferStatus::InProgress | TransferStatus::Error, true) => {
                TransferStatus::Finished
            }
            (TransferStatus::NotStarted | TransferStatus::InProgress | TransferStatus::Error, false) => {
                TransferStatus::InProgress
            }
        }
    }

    /// Status after a chunk exhausted its retry budget or the endpoint was unreachable.
    pub fn on_failure(self) -> Self {
        match self {
            TransferStatus::Finished => TransferStatus::Finished,
            TransferStatus::NotStarted | TransferStatus::InProgress | TransferStatus::Error => {
                TransferStatus::Error
            }
        }
    }

    /// Records in these states still have chunks to send.
    pub fn is_resumable(&self) -> bool {
        matches!(self, TransferStatus::InProgress | TransferStatus::Error)
    }
}

/// Content-addressed identity of the source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    /// SHA-256 hex of the file content.
    pub hash: String,
    pub size_bytes: u64,
}

/// Wall-clock milestones of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTimestamps {
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_chunk_sent: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_chunk_completed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
}

/// Persisted progress of one file's chunked transfer.
///
/// `chunk_size_bytes` and `total_chunks` are fixed at creation, so changing
/// the configured chunk size only affects records created afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: String,
    pub source_path: PathBuf,
    pub file: FileReference,
    /// Id of the backup resource on the archive endpoint, once created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    chunk_size_bytes: u64,
    total_chunks: u64,
    next_chunk_index: u64,
    pub status: TransferStatus,
    pub retry_count: u32,
    pub staged_copy_present: bool,
    pub timestamps: TransferTimestamps,
}

impl TransferRecord {
    /// Creates a `NotStarted` record for `file` split into `chunk_size_bytes` chunks.
    pub fn new(
        id: impl Into<String>,
        source_path: impl Into<PathBuf>,
        file: FileReference,
        chunk_size_bytes: u64,
    ) -> Result<Self, TransferError> {
        if chunk_size_bytes == 0 {
            return Err(TransferError::InvalidChunkSize(0));
        }
        let id = id.into();
        crate::validate_record_id(&id)?;
        let total = total_chunks(file.size_bytes, chunk_size_bytes);
        Ok(Self {
            id,
            source_path: source_path.into(),
            file,
            remote_id: None,
            chunk_size_bytes,
            total_chunks: total,
            next_chunk_index: 0,
            status: TransferStatus::NotStarted,
            retry_count: 0,
            staged_copy_present: false,
            timestamps: TransferTimestamps {
                created: Utc::now(),
                last_chunk_sent: None,
                last_chunk_completed: None,
                completed: None,
            },
        })
    }

    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_bytes
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Zero-based index of the next chunk to send.
    pub fn next_chunk_index(&self) -> u64 {
        self.next_chunk_index
    }

    pub fn is_finished(&self) -> bool {
        self.status == TransferStatus::Finished
    }

    pub fn remaining_chunks(&self) -> u64 {
        self.total_chunks.saturating_sub(self.next_chunk_index)
    }

    /// Fraction of chunks acknowledged, in `[0.0, 1.0]`.
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return if self.is_finished() { 1.0 } else { 0.0 };
        }
        self.next_chunk_index as f64 / self.total_chunks as f64
    }

    /// Checks the invariants `new` establishes and the transitions keep.
    ///
    /// Records read back from storage bypass `new`, so loaders call this
    /// before handing them out.
    pub fn validate(&self) -> Result<(), TransferError> {
        crate::validate_record_id(&self.id)?;
        let inconsistent = |reason: String| TransferError::InconsistentRecord {
            id: self.id.clone(),
            reason,
        };
        if self.chunk_size_bytes == 0 {
            return Err(inconsistent("chunk size is zero".into()));
        }
        let expected = total_chunks(self.file.size_bytes, self.chunk_size_bytes);
        if self.total_chunks != expected {
            return Err(inconsistent(format!(
                "{} chunks recorded, {} bytes in {}-byte chunks is {expected}",
                self.total_chunks, self.file.size_bytes, self.chunk_size_bytes
            )));
        }
        if self.next_chunk_index > self.total_chunks {
            return Err(inconsistent(format!(
                "next chunk {} is past the last chunk ({} total)",
                self.next_chunk_index, self.total_chunks
            )));
        }
        let all_acknowledged = self.next_chunk_index == self.total_chunks;
        if self.is_finished() != all_acknowledged && (self.is_finished() || self.total_chunks > 0) {
            return Err(inconsistent(format!(
                "status {:?} with {} of {} chunks acknowledged",
                self.status, self.next_chunk_index, self.total_chunks
            )));
        }
        Ok(())
    }

    /// Moves a fresh record to `InProgress` after a successful liveness check.
    pub fn start(&mut self) {
        self.status = self.status.on_start();
    }

    /// Stamps the send time of the chunk about to go out.
    pub fn mark_chunk_sent(&mut self, now: DateTime<Utc>) {
        self.timestamps.last_chunk_sent = Some(now);
    }

    /// Applies an acknowledged chunk: advances `next_chunk_index` by exactly one.
    ///
    /// Recovers from `Error` (resetting `retry_count`) and finishes the
    /// transfer when the last chunk is acknowledged.
    pub fn record_chunk_success(&mut self, now: DateTime<Utc>) -> Result<(), TransferError> {
        if self.next_chunk_index >= self.total_chunks || self.is_finished() {
            return Err(TransferError::AlreadyComplete(self.id.clone()));
        }
        if self.status == TransferStatus::Error {
            self.retry_count = 0;
        }
        self.next_chunk_index += 1;
        self.timestamps.last_chunk_completed = Some(now);

        let complete = self.next_chunk_index == self.total_chunks;
        self.status = self.status.on_chunk_success(complete);
        if complete {
            self.timestamps.completed = Some(now);
        }
        Ok(())
    }

    /// Applies a chunk whose retry budget ran out.
    ///
    /// The counter only moves when the record was already in `Error`; the
    /// transition into `Error` leaves it as is.
    pub fn record_chunk_failure(&mut self) {
        if self.status == TransferStatus::Error {
            self.retry_count = self.retry_count.saturating_add(1);
        }
        self.status = self.status.on_failure();
    }

    /// Marks the record `Error` when the endpoint could not be reached.
    /// Chunk progress, timestamps and `retry_count` are left untouched.
    pub fn record_connectivity_failure(&mut self) {
        self.status = self.status.on_failure();
    }

    /// Marks an empty source (zero chunks) finished without any network I/O.
    pub fn finish_empty(&mut self, now: DateTime<Utc>) {
        if self.total_chunks == 0 {
            self.status = TransferStatus::Finished;
            self.timestamps.completed = Some(now);
        }
    }
}
