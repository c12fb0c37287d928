//! Scripted archive connection shared by the unit tests.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chunkferry_archive_client::Error;
use chunkferry_protocol::{BackupResource, ChunkStatus, ChunkUpload};
use chunkferry_transfer::{FileReference, TransferRecord, calculate_file_checksum};
use tokio_util::sync::CancellationToken;

use crate::connection::ArchiveConnection;

/// Calls observed by [`MockArchive`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Liveness,
    Create,
    Update { id: String, finished: bool },
    ChunkStatus { id: String },
    Chunk { id: String, index: u64 },
}

/// Archive mock. Liveness and chunk writes follow per-call scripts of HTTP
/// status codes; an empty script means success.
#[derive(Default)]
pub struct MockArchive {
    pub liveness: Mutex<VecDeque<u16>>,
    pub chunk_statuses: Mutex<VecDeque<u16>>,
    pub update_status: Mutex<Option<u16>>,
    pub last_chunk: Mutex<Option<u64>>,
    pub calls: Mutex<Vec<Call>>,
    pub uploads: Mutex<Vec<ChunkUpload>>,
    /// Cancels the token once the chunk with this index is accepted.
    pub cancel_after: Mutex<Option<(u64, CancellationToken)>>,
    /// Time each chunk write spends in flight.
    pub chunk_delay: Mutex<Option<Duration>>,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

fn scripted(script: &Mutex<VecDeque<u16>>) -> Result<(), Error> {
    match script.lock().unwrap().pop_front() {
        None | Some(200) => Ok(()),
        Some(status) => Err(Error::Api {
            status,
            body: "scripted failure".into(),
        }),
    }
}

impl MockArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_liveness(self, statuses: &[u16]) -> Self {
        self.liveness.lock().unwrap().extend(statuses);
        self
    }

    /// Scripts chunk writes in order; 200 succeeds.
    pub fn chunk_script(self, statuses: &[u16]) -> Self {
        self.chunk_statuses.lock().unwrap().extend(statuses);
        self
    }

    pub fn cancel_after_chunk(self, index: u64, token: CancellationToken) -> Self {
        *self.cancel_after.lock().unwrap() = Some((index, token));
        self
    }

    pub fn slow_chunks(self, delay: Duration) -> Self {
        *self.chunk_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn chunk_indices(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Chunk { index, .. } => Some(index),
                _ => None,
            })
            .collect()
    }
}

impl ArchiveConnection for MockArchive {
    fn check_liveness(
        &self,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(Call::Liveness);
            scripted(&self.liveness)
        })
    }

    fn create_backup<'a>(
        &'a self,
        _resource: &'a BackupResource,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<String, Error>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(Call::Create);
            Ok("remote-1".to_string())
        })
    }

    fn update_backup<'a>(
        &'a self,
        id: &'a str,
        resource: &'a BackupResource,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(Call::Update {
                id: id.to_string(),
                finished: resource.finished,
            });
            match *self.update_status.lock().unwrap() {
                None | Some(200) => Ok(()),
                Some(status) => Err(Error::Api {
                    status,
                    body: String::new(),
                }),
            }
        })
    }

    fn read_chunk_status<'a>(
        &'a self,
        id: &'a str,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<ChunkStatus, Error>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(Call::ChunkStatus { id: id.to_string() });
            Ok(ChunkStatus {
                index: *self.last_chunk.lock().unwrap(),
                ..ChunkStatus::default()
            })
        })
    }

    fn write_chunk<'a>(
        &'a self,
        id: &'a str,
        chunk: &'a ChunkUpload,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(Call::Chunk {
                id: id.to_string(),
                index: chunk.index,
            });
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            let delay = *self.chunk_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            scripted(&self.chunk_statuses)?;
            self.uploads.lock().unwrap().push(chunk.clone());
            *self.last_chunk.lock().unwrap() = Some(chunk.index);
            if let Some((index, token)) = &*self.cancel_after.lock().unwrap() {
                if *index == chunk.index {
                    token.cancel();
                }
            }
            Ok(())
        })
    }
}

/// Writes `size` patterned bytes to `dir/name` and returns a matching
/// `NotStarted` record with `chunk_size`-byte chunks.
pub fn source_record(
    dir: &std::path::Path,
    name: &str,
    size: usize,
    chunk_size: u64,
) -> TransferRecord {
    let path = dir.join(name);
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, &data).unwrap();
    TransferRecord::new(
        name,
        &path,
        FileReference {
            hash: calculate_file_checksum(&path).unwrap(),
            size_bytes: size as u64,
        },
        chunk_size,
    )
    .unwrap()
}
