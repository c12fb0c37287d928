//! Staged copies.
//!
//! A transfer never reads the live source file. Before the first chunk the
//! orchestrator copies it into the staging directory as `<id>.stage`,
//! verifies size and SHA-256 against the record's [`FileReference`], and the
//! driver reads chunks from that copy only.
//!
//! [`FileReference`]: chunkferry_transfer::FileReference

use std::io::Write;
use std::path::{Path, PathBuf};

use chunkferry_transfer::{TransferRecord, calculate_file_checksum};
use tracing::{debug, info, warn};

use crate::error::StagingError;

/// Where transfers keep their private source copies.
pub trait StagingArea: Send + Sync {
    /// Location of the staged copy for `record`, whether or not it exists.
    fn staged_path(&self, record: &TransferRecord) -> PathBuf;

    /// Makes sure a verified staged copy exists and returns its path.
    fn ensure_staged(&self, record: &TransferRecord) -> Result<PathBuf, StagingError>;

    /// Deletes the staged copy. A missing copy counts as removed.
    fn remove_staged(&self, record: &TransferRecord) -> Result<(), StagingError>;
}

/// Staging area backed by a local directory.
#[derive(Debug, Clone)]
pub struct DirStaging {
    dir: PathBuf,
}

impl DirStaging {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Checks an existing copy against the record. Returns `Ok(false)` when it
    /// must be recreated.
    fn existing_copy_valid(&self, path: &Path, record: &TransferRecord) -> Result<bool, StagingError> {
        let len = match std::fs::metadata(path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(StagingError::io(path, e)),
        };
        if len != record.file.size_bytes {
            warn!(record = %record.id, expected = record.file.size_bytes, actual = len, "staged copy has wrong size, restaging");
            return Ok(false);
        }
        // A copy verified in an earlier pass is trusted as long as its size holds.
        if record.staged_copy_present {
            return Ok(true);
        }
        let hash = calculate_file_checksum(path).map_err(|e| StagingError::io(path, to_io(e)))?;
        Ok(hash == record.file.hash)
    }

    fn copy_and_verify(&self, record: &TransferRecord, dest: &Path) -> Result<(), StagingError> {
        let source = &record.source_path;
        let mut reader = match std::fs::File::open(source) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StagingError::SourceMissing(source.clone()));
            }
            Err(e) => return Err(StagingError::io(source, e)),
        };

        std::fs::create_dir_all(&self.dir).map_err(|e| StagingError::io(&self.dir, e))?;
        let tmp = dest.with_extension("stage.tmp");

        let result = (|| {
            let mut writer = std::fs::File::create(&tmp).map_err(|e| StagingError::io(&tmp, e))?;
            let copied = std::io::copy(&mut reader, &mut writer).map_err(|e| StagingError::io(&tmp, e))?;
            writer.flush().map_err(|e| StagingError::io(&tmp, e))?;
            writer.sync_all().map_err(|e| StagingError::io(&tmp, e))?;
            drop(writer);

            if copied != record.file.size_bytes {
                return Err(StagingError::SizeMismatch {
                    expected: record.file.size_bytes,
                    actual: copied,
                });
            }
            let hash = calculate_file_checksum(&tmp).map_err(|e| StagingError::io(&tmp, to_io(e)))?;
            if hash != record.file.hash {
                return Err(StagingError::HashMismatch {
                    expected: record.file.hash.clone(),
                    actual: hash,
                });
            }

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                    .map_err(|e| StagingError::io(&tmp, e))?;
            }

            std::fs::rename(&tmp, dest).map_err(|e| StagingError::io(dest, e))
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        result
    }
}

fn to_io(e: chunkferry_transfer::TransferError) -> std::io::Error {
    match e {
        chunkferry_transfer::TransferError::Io(io) => io,
        other => std::io::Error::other(other.to_string()),
    }
}

impl StagingArea for DirStaging {
    fn staged_path(&self, record: &TransferRecord) -> PathBuf {
        self.dir.join(format!("{}.stage", record.id))
    }

    fn ensure_staged(&self, record: &TransferRecord) -> Result<PathBuf, StagingError> {
        let dest = self.staged_path(record);
        if self.existing_copy_valid(&dest, record)? {
            debug!(record = %record.id, path = ?dest, "staged copy present");
            return Ok(dest);
        }

        self.copy_and_verify(record, &dest)?;
        info!(record = %record.id, path = ?dest, size = record.file.size_bytes, "staged source copy");
        Ok(dest)
    }

    fn remove_staged(&self, record: &TransferRecord) -> Result<(), StagingError> {
        let path = self.staged_path(record);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(record = %record.id, path = ?path, "removed staged copy");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StagingError::io(path, e)),
        }
    }
}
