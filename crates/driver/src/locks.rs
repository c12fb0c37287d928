//! Per-record exclusion.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Set of record ids currently held by a driver.
///
/// [`RecordLocks::try_lock`] hands out a guard that releases the id on drop,
/// so a panicking or cancelled task never leaves a record locked.
#[derive(Debug, Clone, Default)]
pub struct RecordLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks `id`, or returns `None` when it is already held.
    pub fn try_lock(&self, id: &str) -> Option<RecordGuard> {
        let mut held = self.held.lock().unwrap();
        if !held.insert(id.to_string()) {
            return None;
        }
        Some(RecordGuard {
            id: id.to_string(),
            held: Arc::clone(&self.held),
        })
    }
}

/// Exclusive hold on one record id.
#[derive(Debug)]
pub struct RecordGuard {
    id: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl RecordGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.id);
        }
    }
}
