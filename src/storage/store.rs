//! In-memory key-value map
//!
//! The single source of truth for reads. One `RwLock` guards the whole map,
//! so a snapshot is taken under the same lock every writer needs and can
//! never observe half of a concurrent mutation.

use crate::protocol::LogEntry;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Thread-safe key-value map
#[derive(Debug, Default)]
pub struct Store {
    map: RwLock<HashMap<String, String>>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    // A panic while holding the lock cannot leave a half-inserted entry
    // behind, so a poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.map.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.map.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current value for a key
    pub fn get(&self, key: &str) -> Option<String> {
        self.read().get(key).cloned()
    }

    /// Insert or overwrite, returning the previous value.
    pub fn set(&self, key: String, value: String) -> Option<String> {
        self.write().insert(key, value)
    }

    /// Apply an entry (last write wins).
    pub fn apply(&self, entry: LogEntry) -> Option<String> {
        self.set(entry.key, entry.value)
    }

    /// Apply many entries under one write lock. Returns how many were applied.
    pub fn merge<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = LogEntry>,
    {
        let mut map = self.write();
        let mut applied = 0;
        for entry in entries {
            map.insert(entry.key, entry.value);
            applied += 1;
        }
        applied
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Point-in-time copy of every entry.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::from_map(&self.read())
    }
}

/// Immutable point-in-time copy of the store, sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<LogEntry>,
}

impl Snapshot {
    fn from_map(map: &HashMap<String, String>) -> Self {
        let mut entries: Vec<LogEntry> = map
            .iter()
            .map(|(k, v)| LogEntry::new(k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .binary_search_by(|e| e.key.as_str().cmp(key))
            .ok()
            .map(|idx| self.entries[idx].value.as_str())
    }
}
