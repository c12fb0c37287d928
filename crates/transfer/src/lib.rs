//! Chunk codec and persisted transfer state for resumable uploads.
//!
//! A file is partitioned into fixed-size chunks ([`chunked`]); each chunk is
//! base64-encoded and checksummed before it goes on the wire. Progress for a
//! file lives in a [`TransferRecord`] that is persisted after every chunk so
//! an interrupted transfer resumes at `next_chunk_index`.

mod chunked;
mod record;
mod validation;

pub use chunked::{
    Chunk, ChunkReader, EncodedChunk, KILOBYTE, calculate_file_checksum, checksum_bytes,
    chunk_size_bytes, decode, encode, read_chunk, total_chunks, verify,
};
pub use record::{FileReference, TransferRecord, TransferStatus, TransferTimestamps};
pub use validation::validate_record_id;

/// Default chunk size in kilobytes (1 KB = 1000 bytes).
pub const DEFAULT_CHUNK_SIZE_KB: u32 = 1000;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid chunk size: {0} KB")]
    InvalidChunkSize(u32),

    #[error("chunk payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("transfer {0} already holds every chunk")]
    AlreadyComplete(String),

    #[error("invalid record id: {0}")]
    InvalidRecordId(String),

    #[error("record {id} is inconsistent: {reason}")]
    InconsistentRecord { id: String, reason: String },
}
