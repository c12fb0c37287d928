//! Record stores.
//!
//! [`BackupCatalog`] is the seam the orchestrator and driver talk to. The
//! three typed queries (`pending`, `resumable`, `awaiting_cleanup`) are
//! provided on top of [`BackupCatalog::list`]; implementations only supply
//! storage.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chunkferry_transfer::{TransferRecord, TransferStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CatalogError;

/// Persistent collection of transfer records.
///
/// Queries return owned snapshots ordered by creation time, so callers
/// never hold a lock across an await point.
pub trait BackupCatalog: Send + Sync {
    /// Every record, oldest first.
    fn list(&self) -> Vec<TransferRecord>;

    /// A single record by id.
    fn get(&self, id: &str) -> Option<TransferRecord>;

    /// Inserts a new record. Fails if the id is already present.
    fn create(&self, record: &TransferRecord) -> Result<(), CatalogError>;

    /// Replaces an existing record.
    fn update(&self, record: &TransferRecord) -> Result<(), CatalogError>;

    /// Removes a record. Removing an unknown id is a no-op.
    fn delete(&self, id: &str) -> Result<(), CatalogError>;

    /// Removes a transferred record and remembers its source content as
    /// archived, so registering the same unchanged file again is refused.
    fn close(&self, record: &TransferRecord) -> Result<(), CatalogError>;

    /// Whether the content `hash` at `source_path` was already transferred
    /// and closed.
    fn is_archived(&self, source_path: &Path, hash: &str) -> bool;

    /// New files that have not started transferring.
    fn pending(&self) -> Vec<TransferRecord> {
        self.with_status(|s| s == TransferStatus::NotStarted)
    }

    /// Transfers that were interrupted or failed and still have chunks to send.
    fn resumable(&self) -> Vec<TransferRecord> {
        self.with_status(|s| s.is_resumable())
    }

    /// Finished transfers whose remote resource and staged copy still need closing.
    fn awaiting_cleanup(&self) -> Vec<TransferRecord> {
        self.with_status(|s| s == TransferStatus::Finished)
    }

    /// All records the orchestrator acts on: pending, then resumable, then
    /// awaiting cleanup.
    fn list_eligible(&self) -> Vec<TransferRecord> {
        let mut out = self.pending();
        out.extend(self.resumable());
        out.extend(self.awaiting_cleanup());
        out
    }

    /// The record transferring `source_path`, if one exists.
    fn find_by_source(&self, source_path: &Path) -> Option<TransferRecord> {
        self.list()
            .into_iter()
            .find(|r| r.source_path == source_path)
    }

    #[doc(hidden)]
    fn with_status(&self, keep: fn(TransferStatus) -> bool) -> Vec<TransferRecord> {
        self.list().into_iter().filter(|r| keep(r.status)).collect()
    }
}

fn ordered(map: &BTreeMap<String, TransferRecord>) -> Vec<TransferRecord> {
    let mut records: Vec<TransferRecord> = map.values().cloned().collect();
    records.sort_by(|a, b| {
        a.timestamps
            .created
            .cmp(&b.timestamps.created)
            .then_with(|| a.id.cmp(&b.id))
    });
    records
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Catalog kept only in memory. Used by tests and dry runs.
#[derive(Default)]
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BackupCatalog for MemoryCatalog {
    fn list(&self) -> Vec<TransferRecord> {
        ordered(&self.state.read().unwrap().records)
    }

    fn get(&self, id: &str) -> Option<TransferRecord> {
        self.state.read().unwrap().records.get(id).cloned()
    }

    fn create(&self, record: &TransferRecord) -> Result<(), CatalogError> {
        self.state.write().unwrap().insert(record)
    }

    fn update(&self, record: &TransferRecord) -> Result<(), CatalogError> {
        self.state.write().unwrap().replace(record)
    }

    fn delete(&self, id: &str) -> Result<(), CatalogError> {
        self.state.write().unwrap().records.remove(id);
        Ok(())
    }

    fn close(&self, record: &TransferRecord) -> Result<(), CatalogError> {
        self.state.write().unwrap().close(record);
        Ok(())
    }

    fn is_archived(&self, source_path: &Path, hash: &str) -> bool {
        self.state.read().unwrap().is_archived(source_path, hash)
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Source content whose transfer was closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ArchivedSource {
    source_path: PathBuf,
    hash: String,
}

#[derive(Default)]
struct CatalogState {
    records: BTreeMap<String, TransferRecord>,
    archived: Vec<ArchivedSource>,
}

impl CatalogState {
    fn insert(&mut self, record: &TransferRecord) -> Result<(), CatalogError> {
        if self.records.contains_key(&record.id) {
            return Err(CatalogError::DuplicateId(record.id.clone()));
        }
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn replace(&mut self, record: &TransferRecord) -> Result<(), CatalogError> {
        match self.records.get_mut(&record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(CatalogError::NotFound(record.id.clone())),
        }
    }

    fn close(&mut self, record: &TransferRecord) {
        self.records.remove(&record.id);
        if !self.is_archived(&record.source_path, &record.file.hash) {
            self.archived.push(ArchivedSource {
                source_path: record.source_path.clone(),
                hash: record.file.hash.clone(),
            });
        }
    }

    fn is_archived(&self, source_path: &Path, hash: &str) -> bool {
        self.archived
            .iter()
            .any(|a| a.source_path == source_path && a.hash == hash)
    }
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Default)]
struct CatalogFile {
    records: Vec<TransferRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    archived: Vec<ArchivedSource>,
}

/// Catalog persisted to a single JSON file.
///
/// Records are cached in memory; every mutation rewrites the whole file
/// through a temp file and a rename. When the write fails the in-memory
/// change is rolled back, so memory never runs ahead of disk.
pub struct JsonCatalog {
    path: PathBuf,
    state: RwLock<CatalogState>,
}

impl JsonCatalog {
    /// Opens the catalog at `path`, loading existing records from disk.
    ///
    /// Fails if any stored record breaks the record invariants.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();
        let state = load_state(&path)?;
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `change` under the write lock and persists; restores the
    /// previous entry for `id` if persisting fails.
    fn mutate(
        &self,
        id: &str,
        change: impl FnOnce(&mut CatalogState) -> Result<(), CatalogError>,
    ) -> Result<(), CatalogError> {
        let mut state = self.state.write().unwrap();
        let previous = state.records.get(id).cloned();
        let archived_len = state.archived.len();
        change(&mut *state)?;

        if let Err(e) = persist(&self.path, &*state) {
            warn!(record = %id, path = ?self.path, error = %e, "catalog write failed, rolling back");
            match previous {
                Some(prev) => {
                    state.records.insert(id.to_string(), prev);
                }
                None => {
                    state.records.remove(id);
                }
            }
            state.archived.truncate(archived_len);
            return Err(e);
        }
        Ok(())
    }
}

impl BackupCatalog for JsonCatalog {
    fn list(&self) -> Vec<TransferRecord> {
        ordered(&self.state.read().unwrap().records)
    }

    fn get(&self, id: &str) -> Option<TransferRecord> {
        self.state.read().unwrap().records.get(id).cloned()
    }

    fn create(&self, record: &TransferRecord) -> Result<(), CatalogError> {
        self.mutate(&record.id, |state| state.insert(record))
    }

    fn update(&self, record: &TransferRecord) -> Result<(), CatalogError> {
        self.mutate(&record.id, |state| state.replace(record))
    }

    fn delete(&self, id: &str) -> Result<(), CatalogError> {
        if !self.state.read().unwrap().records.contains_key(id) {
            return Ok(());
        }
        self.mutate(id, |state| {
            state.records.remove(id);
            Ok(())
        })
    }

    fn close(&self, record: &TransferRecord) -> Result<(), CatalogError> {
        self.mutate(&record.id, |state| {
            state.close(record);
            Ok(())
        })
    }

    fn is_archived(&self, source_path: &Path, hash: &str) -> bool {
        self.state.read().unwrap().is_archived(source_path, hash)
    }
}

/// Loads the catalog from a JSON file on disk. A missing file is an empty catalog.
fn load_state(path: &Path) -> Result<CatalogState, CatalogError> {
    if !path.exists() {
        return Ok(CatalogState::default());
    }
    let data = std::fs::read_to_string(path)?;
    let file: CatalogFile = serde_json::from_str(&data)?;
    for record in &file.records {
        record.validate()?;
    }
    debug!(
        "loaded {} record(s) and {} archived source(s) from {:?}",
        file.records.len(),
        file.archived.len(),
        path
    );
    Ok(CatalogState {
        records: file
            .records
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect(),
        archived: file.archived,
    })
}

/// Writes the catalog to `<path>.tmp`, syncs, then renames over `path`.
fn persist(path: &Path, state: &CatalogState) -> Result<(), CatalogError> {
    let file = CatalogFile {
        records: ordered(&state.records),
        archived: state.archived.clone(),
    };
    let json = serde_json::to_vec_pretty(&file)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let result = (|| -> std::io::Result<()> {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(&json)?;
        f.sync_all()?;
        std::fs::rename(&tmp, path)
    })();
    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }

    debug!("persisted {} record(s) to {:?}", state.records.len(), path);
    Ok(())
}
