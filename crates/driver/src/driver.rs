//! Per-record chunked send loop.

use std::path::Path;

use chrono::Utc;
use chunkferry_catalog::{BackupCatalog, CatalogError};
use chunkferry_transfer::{ChunkReader, TransferError, TransferRecord};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{ArchiveConnection, backup_resource, error_status};
use crate::error::TransferFailure;
use crate::types::{Advance, Completion, TransferEvent};

/// Drives one record at a time through the send loop.
///
/// The driver never retries on its own: a chunk that exhausts the
/// connection's in-call budget stops the loop, and the next pass resumes
/// at the same index.
pub struct TransferDriver<'a> {
    conn: &'a dyn ArchiveConnection,
    catalog: &'a dyn BackupCatalog,
    cancel: CancellationToken,
    events: Option<&'a mpsc::Sender<TransferEvent>>,
}

impl<'a> TransferDriver<'a> {
    pub fn new(
        conn: &'a dyn ArchiveConnection,
        catalog: &'a dyn BackupCatalog,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            conn,
            catalog,
            cancel,
            events: None,
        }
    }

    /// Reports per-chunk progress on `events`.
    pub fn with_events(mut self, events: &'a mpsc::Sender<TransferEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Advances `record` as far as it goes in one call, reading chunks from
    /// the staged copy at `staged_path`.
    ///
    /// The record is persisted after every state change, so the returned
    /// record always matches the catalog unless the result is a
    /// [`TransferFailure::Catalog`].
    pub async fn advance(&self, mut record: TransferRecord, staged_path: &Path) -> Advance {
        if let Err(e) = record.validate() {
            error!(record = %record.id, error = %e, "refusing inconsistent record");
            return Advance::failed(record, TransferFailure::InvalidRecord(e.to_string()));
        }
        if record.is_finished() {
            debug!(record = %record.id, "already finished");
            return Advance::done(record, Completion::Finished);
        }
        if !record.staged_copy_present {
            return Advance::failed(
                record,
                TransferFailure::Staging("no staged copy present".into()),
            );
        }

        // 1. Liveness
        if let Err(e) = self.conn.check_liveness().await {
            warn!(record = %record.id, error = %e, "archive liveness check failed");
            record.record_connectivity_failure();
            return self.persist_then(record, TransferFailure::Connectivity(e.to_string()));
        }

        let before = record.status;
        record.start();
        if before != record.status {
            info!(record = %record.id, chunks = record.total_chunks(), "transfer started");
        }

        // 2. Remote resource
        let mut created = false;
        let remote_id = match record.remote_id.clone() {
            Some(id) => id,
            None => match self.conn.create_backup(&backup_resource(&record, false)).await {
                Ok(id) => {
                    info!(record = %record.id, remote = %id, "created remote backup");
                    record.remote_id = Some(id.clone());
                    created = true;
                    id
                }
                Err(e) => {
                    warn!(record = %record.id, error = %e, "creating remote backup failed");
                    record.record_connectivity_failure();
                    return self
                        .persist_then(record, TransferFailure::Connectivity(e.to_string()));
                }
            },
        };
        if let Err(e) = self.persist(&record) {
            if !created {
                return catalog_failure(record, e);
            }
            warn!(
                record = %record.id,
                remote = %remote_id,
                error = %e,
                "retrying persist of new remote id"
            );
            if let Err(e) = self.persist(&record) {
                warn!(
                    record = %record.id,
                    remote = %remote_id,
                    "remote backup is orphaned, it was never recorded"
                );
                return catalog_failure(record, e);
            }
        }

        if record.total_chunks() == 0 {
            record.finish_empty(Utc::now());
            if let Err(e) = self.persist(&record) {
                return catalog_failure(record, e);
            }
            info!(record = %record.id, "empty source, transfer finished");
            self.emit(TransferEvent::Finished {
                record_id: record.id.clone(),
            });
            return Advance::done(record, Completion::Finished);
        }

        // 3. Open the staged copy at the resume point
        let mut reader = match open_reader(staged_path, &record).await {
            Ok(r) => r,
            Err(failure) => {
                error!(record = %record.id, error = %failure, "cannot read staged copy");
                return Advance::failed(record, failure);
            }
        };

        // 4. Send loop
        while record.next_chunk_index() < record.total_chunks() {
            if self.cancel.is_cancelled() {
                info!(
                    record = %record.id,
                    next_chunk = record.next_chunk_index(),
                    remaining = record.remaining_chunks(),
                    "transfer paused"
                );
                return Advance::done(record, Completion::Paused);
            }

            let (returned, read) = match tokio::task::spawn_blocking(move || {
                let read = reader.next_chunk();
                (reader, read)
            })
            .await
            {
                Ok(pair) => pair,
                Err(e) => {
                    return Advance::failed(
                        record,
                        TransferFailure::Staging(format!("chunk read task failed: {e}")),
                    );
                }
            };
            reader = returned;

            let chunk = match read {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    let failure = TransferFailure::Staging(format!(
                        "staged copy ended before chunk {}",
                        record.next_chunk_index()
                    ));
                    error!(record = %record.id, error = %failure, "staged copy truncated");
                    return Advance::failed(record, failure);
                }
                Err(e) => {
                    error!(record = %record.id, error = %e, "reading staged copy failed");
                    return Advance::failed(record, TransferFailure::Staging(e.to_string()));
                }
            };

            let index = chunk.index;
            let upload = chunk.to_upload();
            record.mark_chunk_sent(Utc::now());
            debug!(record = %record.id, chunk = index, size = upload.size, "sending chunk");

            match self.conn.write_chunk(&remote_id, &upload).await {
                Ok(()) => {
                    if let Err(e) = record.record_chunk_success(Utc::now()) {
                        return Advance::failed(record, TransferFailure::Staging(e.to_string()));
                    }
                    if let Err(e) = self.persist(&record) {
                        return catalog_failure(record, e);
                    }
                    debug!(
                        record = %record.id,
                        chunk = index,
                        next_chunk = record.next_chunk_index(),
                        total = record.total_chunks(),
                        progress = record.progress(),
                        "chunk acknowledged"
                    );
                    self.emit(TransferEvent::Progress {
                        record_id: record.id.clone(),
                        next_chunk_index: record.next_chunk_index(),
                        total_chunks: record.total_chunks(),
                    });
                }
                Err(e) => {
                    let status = error_status(&e);
                    warn!(
                        record = %record.id,
                        chunk = index,
                        status = ?status,
                        retry_count = record.retry_count,
                        error = %e,
                        "chunk not accepted"
                    );
                    record.record_chunk_failure();
                    return self.persist_then(
                        record,
                        TransferFailure::ChunkTransfer {
                            index,
                            status,
                            message: e.to_string(),
                        },
                    );
                }
            }
        }

        if !record.is_finished() {
            let failure = TransferFailure::InvalidRecord(format!(
                "send loop ended at chunk {} of {} with status {:?}",
                record.next_chunk_index(),
                record.total_chunks(),
                record.status
            ));
            error!(record = %record.id, error = %failure, "record not finished after send loop");
            return Advance::failed(record, failure);
        }

        info!(record = %record.id, chunks = record.total_chunks(), "transfer finished");
        self.emit(TransferEvent::Finished {
            record_id: record.id.clone(),
        });
        Advance::done(record, Completion::Finished)
    }

    fn persist(&self, record: &TransferRecord) -> Result<(), CatalogError> {
        blocking(|| self.catalog.update(record))
    }

    /// Persists a failed record; a catalog error replaces the original failure.
    fn persist_then(&self, record: TransferRecord, failure: TransferFailure) -> Advance {
        match self.persist(&record) {
            Ok(()) => Advance::failed(record, failure),
            Err(e) => {
                warn!(record = %record.id, original = %failure, "could not persist failed record");
                catalog_failure(record, e)
            }
        }
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(tx) = self.events {
            let _ = tx.try_send(event);
        }
    }
}

/// Runs a synchronous catalog write without stalling other tasks on a
/// multi-threaded runtime. On a current-thread runtime `f` runs inline.
pub(crate) fn blocking<T>(f: impl FnOnce() -> T) -> T {
    use tokio::runtime::{Handle, RuntimeFlavor};
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

fn catalog_failure(record: TransferRecord, e: CatalogError) -> Advance {
    error!(record = %record.id, error = %e, "catalog update failed");
    Advance::failed(record, TransferFailure::Catalog(e))
}

/// Opens the staged copy, checks its size and seeks to the next chunk.
async fn open_reader(
    staged_path: &Path,
    record: &TransferRecord,
) -> Result<ChunkReader, TransferFailure> {
    let path = staged_path.to_path_buf();
    let chunk_size = record.chunk_size_bytes();
    let start = record.next_chunk_index();

    let reader = tokio::task::spawn_blocking(move || -> Result<ChunkReader, TransferError> {
        let mut reader = ChunkReader::new(&path, chunk_size)?;
        reader.seek_to_chunk(start)?;
        Ok(reader)
    })
    .await
    .map_err(|e| TransferFailure::Staging(format!("open task failed: {e}")))?
    .map_err(|e| TransferFailure::Staging(e.to_string()))?;

    if reader.file_size() != record.file.size_bytes {
        return Err(TransferFailure::Staging(format!(
            "staged copy is {} bytes, record expects {}",
            reader.file_size(),
            record.file.size_bytes
        )));
    }
    debug!(
        record = %record.id,
        chunk = start,
        bytes_left = reader.remaining(),
        "staged copy opened"
    );
    Ok(reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, MockArchive, source_record};
    use chunkferry_catalog::{JsonCatalog, MemoryCatalog};
    use std::path::PathBuf;
    use chunkferry_transfer::{TransferStatus, decode};
    use std::sync::Mutex;

    /// Memory catalog that remembers every persisted `(status, next_chunk_index)`
    /// and can refuse the next `fail_updates` writes.
    #[derive(Default)]
    struct RecordingCatalog {
        inner: MemoryCatalog,
        updates: Mutex<Vec<(TransferStatus, u64)>>,
        fail_updates: Mutex<u32>,
    }

    impl BackupCatalog for RecordingCatalog {
        fn list(&self) -> Vec<TransferRecord> {
            self.inner.list()
        }
        fn get(&self, id: &str) -> Option<TransferRecord> {
            self.inner.get(id)
        }
        fn create(&self, record: &TransferRecord) -> Result<(), CatalogError> {
            self.inner.create(record)
        }
        fn update(&self, record: &TransferRecord) -> Result<(), CatalogError> {
            let mut failures = self.fail_updates.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(std::io::Error::other("disk full").into());
            }
            self.updates
                .lock()
                .unwrap()
                .push((record.status, record.next_chunk_index()));
            self.inner.update(record)
        }
        fn delete(&self, id: &str) -> Result<(), CatalogError> {
            self.inner.delete(id)
        }
        fn close(&self, record: &TransferRecord) -> Result<(), CatalogError> {
            self.inner.close(record)
        }
        fn is_archived(&self, source_path: &Path, hash: &str) -> bool {
            self.inner.is_archived(source_path, hash)
        }
    }

    fn staged(
        dir: &Path,
        size: usize,
        chunk_size: u64,
        catalog: &dyn BackupCatalog,
    ) -> TransferRecord {
        let mut record = source_record(dir, "rec", size, chunk_size);
        record.staged_copy_present = true;
        catalog.create(&record).unwrap();
        record
    }

    #[tokio::test]
    async fn three_chunk_transfer() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = RecordingCatalog::default();
        let record = staged(tmp.path(), 2_500, 1_000, &catalog);
        let source = record.source_path.clone();
        let conn = MockArchive::new();
        let (tx, mut rx) = mpsc::channel(16);

        let driver =
            TransferDriver::new(&conn, &catalog, CancellationToken::new()).with_events(&tx);
        let out = driver.advance(record, &source).await;

        assert_eq!(out.result.unwrap(), Completion::Finished);
        assert_eq!(out.record.status, TransferStatus::Finished);
        assert_eq!(out.record.next_chunk_index(), 3);
        assert_eq!(out.record.remote_id.as_deref(), Some("remote-1"));
        assert!(out.record.timestamps.completed.is_some());
        assert_eq!(catalog.get("rec").unwrap(), out.record);

        assert_eq!(
            *catalog.updates.lock().unwrap(),
            vec![
                (TransferStatus::InProgress, 0),
                (TransferStatus::InProgress, 1),
                (TransferStatus::InProgress, 2),
                (TransferStatus::Finished, 3),
            ]
        );

        let uploads = conn.uploads.lock().unwrap().clone();
        let sizes: Vec<u64> = uploads.iter().map(|u| u.size).collect();
        assert_eq!(sizes, vec![1_000, 1_000, 500]);
        let mut rebuilt = Vec::new();
        for u in &uploads {
            rebuilt.extend(decode(&u.data).unwrap());
        }
        assert_eq!(rebuilt, std::fs::read(&source).unwrap());

        let mut progress = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TransferEvent::Progress {
                next_chunk_index, ..
            } = event
            {
                progress.push(next_chunk_index);
            }
        }
        assert_eq!(progress, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failed_chunk_then_resume() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = MemoryCatalog::new();
        let record = staged(tmp.path(), 2_500, 1_000, &catalog);
        let source = record.source_path.clone();

        let conn = MockArchive::new().chunk_script(&[200, 200, 500]);
        let driver = TransferDriver::new(&conn, &catalog, CancellationToken::new());
        let out = driver.advance(record, &source).await;

        match out.result {
            Err(TransferFailure::ChunkTransfer { index, status, .. }) => {
                assert_eq!(index, 2);
                assert_eq!(status, Some(500));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(out.record.status, TransferStatus::Error);
        assert_eq!(out.record.next_chunk_index(), 2);
        assert_eq!(out.record.retry_count, 0);
        assert_eq!(catalog.get("rec").unwrap().status, TransferStatus::Error);

        // Next pass: a fresh connection only ever sees chunk 2.
        let conn = MockArchive::new();
        let driver = TransferDriver::new(&conn, &catalog, CancellationToken::new());
        let persisted = catalog.get("rec").unwrap();
        let out = driver.advance(persisted, &source).await;

        assert_eq!(out.result.unwrap(), Completion::Finished);
        assert_eq!(conn.chunk_indices(), vec![2]);
        assert!(!conn.calls().contains(&Call::Create));
        assert_eq!(out.record.next_chunk_index(), 3);
        assert_eq!(out.record.retry_count, 0);
    }

    #[tokio::test]
    async fn repeated_failures_count_after_the_first() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = MemoryCatalog::new();
        let mut record = staged(tmp.path(), 20, 10, &catalog);
        let source = record.source_path.clone();

        for expected in [0, 1, 2] {
            let conn = MockArchive::new().chunk_script(&[503]);
            let driver = TransferDriver::new(&conn, &catalog, CancellationToken::new());
            let out = driver.advance(record, &source).await;
            assert!(out.result.is_err());
            assert_eq!(out.record.retry_count, expected);
            record = out.record;
        }

        let conn = MockArchive::new();
        let driver = TransferDriver::new(&conn, &catalog, CancellationToken::new());
        let out = driver.advance(record, &source).await;
        assert_eq!(out.result.unwrap(), Completion::Finished);
        assert_eq!(out.record.retry_count, 0);
    }

    #[tokio::test]
    async fn recovery_resets_retry_count() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = MemoryCatalog::new();
        let mut record = staged(tmp.path(), 30, 10, &catalog);
        record.status = TransferStatus::Error;
        record.retry_count = 4;
        record.remote_id = Some("remote-9".into());
        let source = record.source_path.clone();

        // Second chunk fails so the loop stops right after one success.
        let conn = MockArchive::new().chunk_script(&[200, 500]);
        let driver = TransferDriver::new(&conn, &catalog, CancellationToken::new());
        let out = driver.advance(record, &source).await;

        assert!(out.result.is_err());
        assert_eq!(out.record.next_chunk_index(), 1);
        assert_eq!(out.record.status, TransferStatus::Error);
        assert_eq!(out.record.retry_count, 0);
    }

    #[tokio::test]
    async fn liveness_failure_touches_nothing_else() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = MemoryCatalog::new();
        let record = staged(tmp.path(), 30, 10, &catalog);
        let source = record.source_path.clone();

        let conn = MockArchive::new().fail_liveness(&[503]);
        let driver = TransferDriver::new(&conn, &catalog, CancellationToken::new());
        let out = driver.advance(record, &source).await;

        assert!(matches!(out.result, Err(TransferFailure::Connectivity(_))));
        assert_eq!(out.record.status, TransferStatus::Error);
        assert_eq!(out.record.next_chunk_index(), 0);
        assert_eq!(out.record.retry_count, 0);
        assert!(out.record.timestamps.last_chunk_sent.is_none());
        assert!(out.record.timestamps.last_chunk_completed.is_none());
        assert_eq!(conn.calls(), vec![Call::Liveness]);
        assert_eq!(catalog.get("rec").unwrap().status, TransferStatus::Error);
    }

    #[tokio::test]
    async fn finished_record_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = MemoryCatalog::new();
        let mut record = staged(tmp.path(), 10, 10, &catalog);
        record.start();
        record.record_chunk_success(Utc::now()).unwrap();
        let source = record.source_path.clone();

        let conn = MockArchive::new();
        let driver = TransferDriver::new(&conn, &catalog, CancellationToken::new());
        let out = driver.advance(record.clone(), &source).await;

        assert_eq!(out.result.unwrap(), Completion::Finished);
        assert_eq!(out.record, record);
        assert!(conn.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_staged_copy_is_staging_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = MemoryCatalog::new();
        let mut record = staged(tmp.path(), 10, 10, &catalog);
        record.staged_copy_present = false;
        let source = record.source_path.clone();

        let conn = MockArchive::new();
        let driver = TransferDriver::new(&conn, &catalog, CancellationToken::new());
        let out = driver.advance(record.clone(), &source).await;

        let failure = out.result.unwrap_err();
        assert!(matches!(failure, TransferFailure::Staging(_)));
        assert!(!failure.is_retryable());
        assert_eq!(out.record, record);
        assert!(conn.calls().is_empty());
    }

    #[tokio::test]
    async fn truncated_staged_copy_is_staging_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = MemoryCatalog::new();
        let record = staged(tmp.path(), 30, 10, &catalog);
        let short = tmp.path().join("short.stage");
        std::fs::write(&short, vec![0u8; 15]).unwrap();

        let conn = MockArchive::new();
        let driver = TransferDriver::new(&conn, &catalog, CancellationToken::new());
        let out = driver.advance(record, &short).await;

        assert!(matches!(out.result, Err(TransferFailure::Staging(_))));
        assert_eq!(out.record.next_chunk_index(), 0);
        assert!(conn.chunk_indices().is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_pauses_before_first_chunk() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = MemoryCatalog::new();
        let record = staged(tmp.path(), 30, 10, &catalog);
        let source = record.source_path.clone();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let conn = MockArchive::new();
        let driver = TransferDriver::new(&conn, &catalog, cancel);
        let out = driver.advance(record, &source).await;

        assert_eq!(out.result.unwrap(), Completion::Paused);
        assert_eq!(out.record.status, TransferStatus::InProgress);
        assert_eq!(out.record.next_chunk_index(), 0);
        assert!(conn.chunk_indices().is_empty());
        assert_eq!(catalog.get("rec").unwrap(), out.record);
    }

    #[tokio::test]
    async fn cancel_mid_transfer_pauses_after_acknowledged_chunk() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = MemoryCatalog::new();
        let record = staged(tmp.path(), 40, 10, &catalog);
        let source = record.source_path.clone();

        let cancel = CancellationToken::new();
        let conn = MockArchive::new().cancel_after_chunk(1, cancel.clone());
        let driver = TransferDriver::new(&conn, &catalog, cancel);
        let out = driver.advance(record, &source).await;

        assert_eq!(out.result.unwrap(), Completion::Paused);
        assert_eq!(out.record.status, TransferStatus::InProgress);
        assert_eq!(out.record.next_chunk_index(), 2);
        assert_eq!(out.record.remaining_chunks(), 2);
        assert_eq!(conn.chunk_indices(), vec![0, 1]);
        assert_eq!(catalog.get("rec").unwrap(), out.record);

        let conn = MockArchive::new();
        let driver = TransferDriver::new(&conn, &catalog, CancellationToken::new());
        let out = driver.advance(catalog.get("rec").unwrap(), &source).await;

        assert_eq!(out.result.unwrap(), Completion::Finished);
        assert_eq!(conn.chunk_indices(), vec![2, 3]);
        assert!(!conn.calls().contains(&Call::Create));
        assert_eq!(out.record.next_chunk_index(), 4);
    }

    #[tokio::test]
    async fn inconsistent_record_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = MemoryCatalog::new();
        let mut record = staged(tmp.path(), 30, 10, &catalog);
        record.start();
        let mut json = serde_json::to_value(&record).unwrap();
        json["next_chunk_index"] = serde_json::json!(5);
        let broken: TransferRecord = serde_json::from_value(json).unwrap();
        let source = record.source_path.clone();

        let conn = MockArchive::new();
        let (tx, mut rx) = mpsc::channel(16);
        let driver =
            TransferDriver::new(&conn, &catalog, CancellationToken::new()).with_events(&tx);
        let out = driver.advance(broken, &source).await;

        let failure = out.result.unwrap_err();
        assert!(matches!(failure, TransferFailure::InvalidRecord(_)));
        assert!(!failure.is_retryable());
        assert_eq!(out.record.status, TransferStatus::InProgress);
        assert!(conn.calls().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn new_remote_id_survives_one_failed_write() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = RecordingCatalog::default();
        let record = staged(tmp.path(), 10, 10, &catalog);
        let source = record.source_path.clone();
        *catalog.fail_updates.lock().unwrap() = 1;

        let conn = MockArchive::new();
        let driver = TransferDriver::new(&conn, &catalog, CancellationToken::new());
        let out = driver.advance(record, &source).await;

        assert_eq!(out.result.unwrap(), Completion::Finished);
        assert_eq!(
            conn.calls().iter().filter(|c| **c == Call::Create).count(),
            1
        );
        assert_eq!(
            catalog.get("rec").unwrap().remote_id.as_deref(),
            Some("remote-1")
        );
    }

    #[tokio::test]
    async fn unrecorded_remote_id_is_catalog_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = RecordingCatalog::default();
        let record = staged(tmp.path(), 10, 10, &catalog);
        let source = record.source_path.clone();
        *catalog.fail_updates.lock().unwrap() = 2;

        let conn = MockArchive::new();
        let driver = TransferDriver::new(&conn, &catalog, CancellationToken::new());
        let out = driver.advance(record, &source).await;

        assert!(matches!(out.result, Err(TransferFailure::Catalog(_))));
        assert!(catalog.get("rec").unwrap().remote_id.is_none());
        assert!(conn.chunk_indices().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn json_catalog_on_multi_thread_runtime() {
        let tmp = tempfile::tempdir().unwrap();
        let path: PathBuf = tmp.path().join("catalog.json");
        let catalog = JsonCatalog::open(&path).unwrap();
        let record = staged(tmp.path(), 25, 10, &catalog);
        let source = record.source_path.clone();

        let conn = MockArchive::new();
        let driver = TransferDriver::new(&conn, &catalog, CancellationToken::new());
        let out = driver.advance(record, &source).await;

        assert_eq!(out.result.unwrap(), Completion::Finished);
        let reopened = JsonCatalog::open(&path).unwrap();
        assert_eq!(reopened.get("rec").unwrap(), out.record);
    }

    #[tokio::test]
    async fn empty_source_finishes_without_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = MemoryCatalog::new();
        let record = staged(tmp.path(), 0, 10, &catalog);
        let source = record.source_path.clone();

        let conn = MockArchive::new();
        let driver = TransferDriver::new(&conn, &catalog, CancellationToken::new());
        let out = driver.advance(record, &source).await;

        assert_eq!(out.result.unwrap(), Completion::Finished);
        assert!(out.record.is_finished());
        assert_eq!(conn.calls(), vec![Call::Liveness, Call::Create]);
    }

    #[tokio::test]
    async fn unpersistable_record_is_catalog_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let mut record = source_record(tmp.path(), "rec", 10, 10);
        record.staged_copy_present = true;
        let source = record.source_path.clone();
        // Never created in this catalog.
        let catalog = MemoryCatalog::new();

        let conn = MockArchive::new();
        let driver = TransferDriver::new(&conn, &catalog, CancellationToken::new());
        let out = driver.advance(record, &source).await;

        assert!(matches!(out.result, Err(TransferFailure::Catalog(_))));
        assert!(conn.chunk_indices().is_empty());
    }
}
