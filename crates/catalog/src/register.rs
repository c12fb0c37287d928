use std::path::Path;

use chunkferry_transfer::{FileReference, TransferRecord, calculate_file_checksum, chunk_size_bytes};
use tracing::info;

use crate::error::CatalogError;
use crate::store::BackupCatalog;

/// Registers `source_path` for transfer, returning its record.
///
/// If a record for the same source path already exists it is returned as is;
/// the file is not hashed again. Otherwise the file is hashed, a `NotStarted`
/// record with a fresh UUID is created, split in `chunk_size_kb` kilobyte chunks.
///
/// Content that was already transferred and closed is refused with
/// [`CatalogError::AlreadyArchived`]; a changed file at the same path is
/// registered again.
pub fn register_source<C: BackupCatalog + ?Sized>(
    catalog: &C,
    source_path: &Path,
    chunk_size_kb: u32,
) -> Result<TransferRecord, CatalogError> {
    if let Some(existing) = catalog.find_by_source(source_path) {
        return Ok(existing);
    }

    let chunk_size = chunk_size_bytes(chunk_size_kb)?;
    let metadata = std::fs::metadata(source_path)?;
    if !metadata.is_file() {
        return Err(CatalogError::NotAFile(source_path.to_path_buf()));
    }

    let hash = calculate_file_checksum(source_path)?;
    if catalog.is_archived(source_path, &hash) {
        return Err(CatalogError::AlreadyArchived(source_path.to_path_buf()));
    }
    let record = TransferRecord::new(
        uuid::Uuid::new_v4().to_string(),
        source_path,
        FileReference {
            hash,
            size_bytes: metadata.len(),
        },
        chunk_size,
    )?;
    catalog.create(&record)?;

    info!(
        record = %record.id,
        source = ?source_path,
        size = record.file.size_bytes,
        chunks = record.total_chunks(),
        "registered source"
    );
    Ok(record)
}
