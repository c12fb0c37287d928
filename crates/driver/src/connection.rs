//! Archive connection trait.
//!
//! `ArchiveConnection` is the slice of the archive endpoint the driver needs.
//! The binary uses [`ArchiveClient`]; tests use scripted mocks.

use std::future::Future;
use std::pin::Pin;

use chunkferry_archive_client::{ArchiveClient, Error};
use chunkferry_protocol::{BackupResource, ChunkStatus, ChunkUpload};
use chunkferry_transfer::TransferRecord;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send + 'a>>;

/// Abstract connection to the archive endpoint.
///
/// Every call already spent its in-call retry budget when it returns an
/// error; the driver does not retry on top.
pub trait ArchiveConnection: Send + Sync {
    /// Authenticated liveness check (200 or 202).
    fn check_liveness(&self) -> BoxFuture<'_, ()>;

    /// Creates the remote backup resource and returns its id.
    fn create_backup<'a>(&'a self, resource: &'a BackupResource) -> BoxFuture<'a, String>;

    /// Replaces the remote backup resource.
    fn update_backup<'a>(&'a self, id: &'a str, resource: &'a BackupResource)
    -> BoxFuture<'a, ()>;

    /// Most recent chunk the endpoint holds for a backup.
    fn read_chunk_status<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ChunkStatus>;

    /// Sends one chunk. `Ok` is the endpoint's confirmation.
    fn write_chunk<'a>(&'a self, id: &'a str, chunk: &'a ChunkUpload) -> BoxFuture<'a, ()>;
}

impl ArchiveConnection for ArchiveClient {
    fn check_liveness(&self) -> BoxFuture<'_, ()> {
        Box::pin(ArchiveClient::check_liveness(self))
    }

    fn create_backup<'a>(&'a self, resource: &'a BackupResource) -> BoxFuture<'a, String> {
        Box::pin(ArchiveClient::create_backup(self, resource))
    }

    fn update_backup<'a>(
        &'a self,
        id: &'a str,
        resource: &'a BackupResource,
    ) -> BoxFuture<'a, ()> {
        Box::pin(ArchiveClient::update_backup(self, id, resource))
    }

    fn read_chunk_status<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ChunkStatus> {
        Box::pin(ArchiveClient::read_chunk_status(self, id))
    }

    fn write_chunk<'a>(&'a self, id: &'a str, chunk: &'a ChunkUpload) -> BoxFuture<'a, ()> {
        Box::pin(ArchiveClient::write_chunk(self, id, chunk))
    }
}

/// Remote view of `record`.
pub(crate) fn backup_resource(record: &TransferRecord, finished: bool) -> BackupResource {
    BackupResource {
        id: record.remote_id.clone(),
        file_hash: record.file.hash.clone(),
        size_bytes: record.file.size_bytes,
        chunk_size_bytes: record.chunk_size_bytes(),
        total_chunks: record.total_chunks(),
        finished,
    }
}

/// Status code carried by a client error, if the endpoint answered at all.
pub(crate) fn error_status(e: &Error) -> Option<u16> {
    match e {
        Error::Api { status, .. } => Some(*status),
        Error::Http(e) => e.status().map(|s| s.as_u16()),
        Error::Json(_) | Error::InvalidToken | Error::InvalidBaseUrl(_) => None,
    }
}
