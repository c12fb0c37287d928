//! Orchestrator: periodic passes over the catalog with a bounded worker pool.
//!
//! Each pass closes finished transfers, prunes pending records whose source
//! disappeared, then stages and advances pending and resumable records in
//! parallel. Records are never advanced by two workers at once.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chunkferry_catalog::{BackupCatalog, StagingArea};
use chunkferry_transfer::TransferRecord;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cleanup::cleanup_record;
use crate::connection::ArchiveConnection;
use crate::driver::{TransferDriver, blocking};
use crate::error::TransferFailure;
use crate::locks::RecordLocks;
use crate::types::{Completion, OrchestratorConfig, PassSummary, TransferEvent};

/// Shared handles a worker task needs.
#[derive(Clone)]
struct Worker {
    conn: Arc<dyn ArchiveConnection>,
    catalog: Arc<dyn BackupCatalog>,
    staging: Arc<dyn StagingArea>,
    events_tx: mpsc::Sender<TransferEvent>,
    cancel: CancellationToken,
}

/// Runs transfer passes over the catalog.
pub struct Orchestrator {
    worker: Worker,
    locks: RecordLocks,
    config: OrchestratorConfig,
    /// Records whose staging failed; not attempted again until released.
    held: Mutex<HashSet<String>>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
}

impl Orchestrator {
    /// Creates a new orchestrator.
    pub fn new(
        conn: Arc<dyn ArchiveConnection>,
        catalog: Arc<dyn BackupCatalog>,
        staging: Arc<dyn StagingArea>,
        config: OrchestratorConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));
        Self {
            worker: Worker {
                conn,
                catalog,
                staging,
                events_tx,
                cancel: CancellationToken::new(),
            },
            locks: RecordLocks::new(),
            config,
            held: Mutex::new(HashSet::new()),
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.take()
    }

    /// Returns the cancellation token shared by every driver of this orchestrator.
    pub fn cancel_token(&self) -> CancellationToken {
        self.worker.cancel.clone()
    }

    /// Per-record locks; a record locked here is skipped by passes.
    pub fn locks(&self) -> &RecordLocks {
        &self.locks
    }

    /// Ids held back after a staging failure.
    pub fn held(&self) -> Vec<String> {
        self.held.lock().unwrap().iter().cloned().collect()
    }

    /// Lets a record held back after a staging failure be attempted again.
    pub fn release(&self, id: &str) -> bool {
        self.held.lock().unwrap().remove(id)
    }

    /// Runs passes every `interval` until the cancellation token fires.
    pub async fn run(&self, interval: Duration) {
        let cancel = self.cancel_token();
        loop {
            let summary = self.run_pass().await;
            info!(
                finished = summary.finished,
                failed = summary.failed,
                paused = summary.paused,
                cleaned_up = summary.cleaned_up,
                pruned = summary.pruned,
                "pass complete"
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("orchestrator stopped");
    }

    /// Runs a single pass and returns its counters.
    pub async fn run_pass(&self) -> PassSummary {
        let mut summary = PassSummary::default();
        self.cleanup_finished(&mut summary).await;
        self.prune_vanished(&mut summary);
        self.advance_eligible(&mut summary).await;
        summary
    }

    async fn cleanup_finished(&self, summary: &mut PassSummary) {
        let w = &self.worker;
        for record in w.catalog.awaiting_cleanup() {
            if w.cancel.is_cancelled() {
                return;
            }
            let Some(_guard) = self.locks.try_lock(&record.id) else {
                summary.skipped += 1;
                continue;
            };

            match cleanup_record(
                w.conn.as_ref(),
                w.catalog.as_ref(),
                w.staging.as_ref(),
                &record,
            )
            .await
            {
                Ok(()) => {
                    summary.cleaned_up += 1;
                    let _ = w.events_tx.try_send(TransferEvent::CleanedUp {
                        record_id: record.id.clone(),
                    });
                }
                Err(e) => {
                    summary.cleanup_failed += 1;
                    warn!(record = %record.id, error = %e, "cleanup failed, retrying next pass");
                }
            }
        }
    }

    fn prune_vanished(&self, summary: &mut PassSummary) {
        let w = &self.worker;
        for record in w.catalog.pending() {
            if record.staged_copy_present || record.source_path.exists() {
                continue;
            }
            let Some(_guard) = self.locks.try_lock(&record.id) else {
                continue;
            };
            match blocking(|| w.catalog.delete(&record.id)) {
                Ok(()) => {
                    summary.pruned += 1;
                    info!(record = %record.id, source = ?record.source_path, "source vanished, record dropped");
                }
                Err(e) => warn!(record = %record.id, error = %e, "could not drop record"),
            }
        }
    }

    async fn advance_eligible(&self, summary: &mut PassSummary) {
        let w = &self.worker;
        let mut work = w.catalog.pending();
        work.extend(w.catalog.resumable());

        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();

        for record in work {
            if w.cancel.is_cancelled() {
                break;
            }
            if self.held.lock().unwrap().contains(&record.id) {
                summary.skipped += 1;
                continue;
            }
            let Some(guard) = self.locks.try_lock(&record.id) else {
                debug!(record = %record.id, "record busy, skipping");
                summary.skipped += 1;
                continue;
            };
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };

            let worker = w.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let _guard = guard;
                let id = record.id.clone();
                let result = worker.process(record).await;
                (id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (id, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "transfer task failed");
                    summary.failed += 1;
                    continue;
                }
            };
            match result {
                Ok(Completion::Finished) => summary.finished += 1,
                Ok(Completion::Paused) => summary.paused += 1,
                Err(failure) => {
                    summary.failed += 1;
                    let retryable = failure.is_retryable();
                    if !retryable {
                        self.held.lock().unwrap().insert(id.clone());
                    }
                    let _ = w.events_tx.try_send(TransferEvent::Failed {
                        record_id: id,
                        error: failure.to_string(),
                        retryable,
                    });
                }
            }
        }
    }
}

impl Worker {
    /// Stages and advances one record.
    async fn process(&self, mut record: TransferRecord) -> Result<Completion, TransferFailure> {
        let staged = self.stage(&record).await?;
        if !record.staged_copy_present {
            record.staged_copy_present = true;
            blocking(|| self.catalog.update(&record))?;
        }

        let driver = TransferDriver::new(
            self.conn.as_ref(),
            self.catalog.as_ref(),
            self.cancel.clone(),
        )
        .with_events(&self.events_tx);
        driver.advance(record, &staged).await.result
    }

    async fn stage(&self, record: &TransferRecord) -> Result<PathBuf, TransferFailure> {
        let staging = Arc::clone(&self.staging);
        let snapshot = record.clone();
        let staged = tokio::task::spawn_blocking(move || staging.ensure_staged(&snapshot))
            .await
            .map_err(|e| TransferFailure::Staging(format!("staging task failed: {e}")))?;
        staged.map_err(|e| {
            error!(record = %record.id, source = ?record.source_path, error = %e, "staging failed");
            TransferFailure::from(e)
        })
    }
}
