use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use base64::{Engine, engine::general_purpose::STANDARD};
use chunkferry_protocol::ChunkUpload;
use sha2::{Digest, Sha256};

use crate::TransferError;

/// Bytes per configured kilobyte.
pub const KILOBYTE: u64 = 1000;

// ---------------------------------------------------------------------------
// Sizing
// ---------------------------------------------------------------------------

/// Normalizes a configured chunk size (kilobytes) to bytes.
pub fn chunk_size_bytes(chunk_size_kb: u32) -> Result<u64, TransferError> {
    if chunk_size_kb == 0 {
        return Err(TransferError::InvalidChunkSize(chunk_size_kb));
    }
    Ok(u64::from(chunk_size_kb) * KILOBYTE)
}

/// Number of chunks needed for `file_size` bytes: `ceil(file_size / chunk_size)`.
///
/// `chunk_size` must be non-zero; [`chunk_size_bytes`] guarantees that.
pub fn total_chunks(file_size: u64, chunk_size: u64) -> u64 {
    file_size.div_ceil(chunk_size)
}

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Transport-safe form of a chunk plus the checksum of that form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Standard base64 of the raw chunk bytes.
    pub payload: String,
    /// SHA-256 hex of `payload` (the encoded text, not the raw bytes).
    pub checksum: String,
}

/// Encodes chunk bytes for transport and checksums the encoded payload.
pub fn encode(data: &[u8]) -> EncodedChunk {
    let payload = STANDARD.encode(data);
    let checksum = checksum_bytes(payload.as_bytes());
    EncodedChunk { payload, checksum }
}

/// Returns `true` if the payload still matches its checksum.
pub fn verify(encoded: &EncodedChunk) -> bool {
    checksum_bytes(encoded.payload.as_bytes()) == encoded.checksum
}

/// Decodes a transport payload back into raw bytes.
pub fn decode(payload: &str) -> Result<Vec<u8>, TransferError> {
    Ok(STANDARD.decode(payload)?)
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// One contiguous byte range of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based chunk index.
    pub index: u64,
    /// Byte offset within the file (`index * chunk_size`).
    pub offset: u64,
    /// Raw chunk bytes; shorter than the chunk size only for the last chunk.
    pub data: Vec<u8>,
    /// The read reached end of file.
    pub is_last: bool,
}

impl Chunk {
    /// Size of this chunk in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Encodes the chunk and wraps it in the wire body for `PUT chunks<id>/<index>`.
    pub fn to_upload(&self) -> ChunkUpload {
        let encoded = encode(&self.data);
        ChunkUpload {
            index: self.index,
            size: self.size(),
            data: encoded.payload,
            checksum: encoded.checksum,
        }
    }
}

/// Reads chunk `index` from `source`.
///
/// Reads exactly `chunk_size` bytes starting at `index * chunk_size`; the
/// final chunk may be shorter. Reading at or past end of file yields an empty
/// chunk with `is_last` set. No padding is ever added.
pub fn read_chunk<R: Read + Seek>(
    source: &mut R,
    index: u64,
    chunk_size: u64,
) -> Result<Chunk, TransferError> {
    let end = source.seek(SeekFrom::End(0))?;
    let offset = index.saturating_mul(chunk_size);
    if offset >= end {
        return Ok(Chunk {
            index,
            offset,
            data: Vec::new(),
            is_last: true,
        });
    }

    source.seek(SeekFrom::Start(offset))?;
    let len = chunk_size.min(end - offset);
    let mut data = Vec::with_capacity(len as usize);
    source.by_ref().take(len).read_to_end(&mut data)?;

    let is_last = offset + data.len() as u64 >= end;
    Ok(Chunk {
        index,
        offset,
        data,
        is_last,
    })
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a file sequentially in fixed-size chunks, starting at any chunk index.
pub struct ChunkReader {
    file: std::fs::File,
    chunk_size: u64,
    next_index: u64,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading with a chunk size in bytes.
    pub fn new(path: &Path, chunk_size: u64) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidChunkSize(0));
        }
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(Self {
            file,
            chunk_size,
            next_index: 0,
            file_size,
        })
    }

    /// Positions the reader at chunk `index` (for resume).
    pub fn seek_to_chunk(&mut self, index: u64) -> Result<(), TransferError> {
        self.file
            .seek(SeekFrom::Start(index.saturating_mul(self.chunk_size)))?;
        self.next_index = index;
        Ok(())
    }

    /// Reads the next chunk. Returns `None` once zero bytes remain.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let chunk = read_chunk(&mut self.file, self.next_index, self.chunk_size)?;
        if chunk.data.is_empty() {
            return Ok(None);
        }
        self.next_index += 1;
        Ok(Some(chunk))
    }

    /// Index of the chunk the next call to [`next_chunk`](Self::next_chunk) returns.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes remaining from the current position.
    pub fn remaining(&self) -> u64 {
        self.file_size
            .saturating_sub(self.next_index.saturating_mul(self.chunk_size))
    }
}
