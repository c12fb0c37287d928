//! Closing finished transfers.

use chunkferry_catalog::{BackupCatalog, StagingArea};
use chunkferry_transfer::TransferRecord;
use tracing::{info, warn};

use crate::connection::{ArchiveConnection, backup_resource};
use crate::error::TransferFailure;

/// Closes a finished transfer.
///
/// Marks the remote backup finished, confirms the endpoint holds the last
/// chunk, then removes the staged copy and finally closes the record, which
/// also remembers the source content as archived. Any step that fails leaves
/// the record in the catalog so the next pass tries again.
pub async fn cleanup_record(
    conn: &dyn ArchiveConnection,
    catalog: &dyn BackupCatalog,
    staging: &dyn StagingArea,
    record: &TransferRecord,
) -> Result<(), TransferFailure> {
    if !record.is_finished() {
        return Err(TransferFailure::Cleanup(format!(
            "record {} is not finished",
            record.id
        )));
    }

    match record.remote_id.as_deref() {
        Some(remote_id) => {
            conn.update_backup(remote_id, &backup_resource(record, true))
                .await
                .map_err(|e| {
                    TransferFailure::Cleanup(format!("marking backup {remote_id} finished: {e}"))
                })?;

            let status = conn.read_chunk_status(remote_id).await.map_err(|e| {
                TransferFailure::Cleanup(format!("reading chunk status of {remote_id}: {e}"))
            })?;
            if !status.covers(record.total_chunks()) {
                return Err(TransferFailure::Cleanup(format!(
                    "archive holds chunk {:?} of backup {remote_id}, expected {}",
                    status.index,
                    record.total_chunks().saturating_sub(1)
                )));
            }
        }
        None => warn!(record = %record.id, "finished record has no remote backup"),
    }

    staging
        .remove_staged(record)
        .map_err(|e| TransferFailure::Cleanup(e.to_string()))?;
    crate::driver::blocking(|| catalog.close(record))?;

    info!(record = %record.id, source = ?record.source_path, "transfer closed");
    Ok(())
}
