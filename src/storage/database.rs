//! Store + durable log under one locking discipline
//!
//! Lock order is always log, then store. Local writes append to the log
//! and mutate the store while holding the log lock, so log order matches the
//! order local writes became visible and replay rebuilds a state that really
//! existed. Remote writes only take the store lock.

use crate::common::{Error, Result, SyncPolicy};
use crate::protocol::LogEntry;
use crate::storage::log::DurableLog;
use crate::storage::store::{Snapshot, Store};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Shared node state: the in-memory store and its durable log.
pub struct Database {
    store: Store,
    log: Mutex<DurableLog>,
    faulted: AtomicBool,
    recovered: usize,
}

impl Database {
    /// Replay the log at `path` into a fresh store, then open it for appending.
    pub fn open(path: impl AsRef<Path>, sync_policy: SyncPolicy) -> Result<Self> {
        let path = path.as_ref();
        let store = Store::new();

        tracing::info!("Replaying durable log from {:?}", path);
        let recovered = DurableLog::replay(path, |entry| {
            store.apply(entry);
        })?;
        let log = DurableLog::open(path, sync_policy)?;

        tracing::info!(
            "Database opened: {} log entries replayed, {} keys",
            recovered,
            store.len()
        );

        Ok(Self::from_parts(store, log, recovered))
    }

    fn from_parts(store: Store, log: DurableLog, recovered: usize) -> Self {
        Self {
            store,
            log: Mutex::new(log),
            faulted: AtomicBool::new(false),
            recovered,
        }
    }

    fn lock_log(&self) -> MutexGuard<'_, DurableLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_log(&self) -> Result<()> {
        if self.faulted.load(Ordering::Acquire) {
            return Err(Error::LogFaulted);
        }
        Ok(())
    }

    fn latch_fault(&self, e: Error) -> Error {
        if !self.faulted.swap(true, Ordering::AcqRel) {
            tracing::error!("Durable log write failed, refusing further writes: {}", e);
        }
        Error::Log(e.to_string())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.store.get(key)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Entries replayed from the log at open.
    pub fn recovered(&self) -> usize {
        self.recovered
    }

    /// True once a log write has failed; all later writes are refused.
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    /// Commit a local write: durable append, then store mutation, then
    /// `publish` (e.g. enqueue for broadcast), all under the log lock so
    /// publish order equals commit order.
    ///
    /// On a log failure the store is left untouched and the error returned.
    pub fn commit<F>(&self, entry: LogEntry, publish: F) -> Result<()>
    where
        F: FnOnce(LogEntry),
    {
        self.check_log()?;
        let mut log = self.lock_log();
        if let Err(e) = log.append(&entry) {
            return Err(self.latch_fault(e));
        }
        self.store.set(entry.key.clone(), entry.value.clone());
        publish(entry);
        Ok(())
    }

    /// Apply a write propagated from a peer. Not logged, not re-broadcast.
    pub fn apply_remote(&self, entry: LogEntry) {
        self.store.apply(entry);
    }

    /// Snapshot for a bootstrapping peer. Every entry is appended to the
    /// local log as a checkpoint; a checkpoint failure is logged but the
    /// snapshot is still served.
    pub fn checkpoint_snapshot(&self) -> Snapshot {
        let mut log = self.lock_log();
        let snapshot = self.store.snapshot();
        if self.is_faulted() {
            tracing::warn!("Skipping bootstrap checkpoint, durable log is faulted");
            return snapshot;
        }
        match log.append_batch(snapshot.entries()) {
            Ok(n) => tracing::debug!("Checkpointed {} entries for bootstrap", n),
            Err(e) => {
                let _ = self.latch_fault(e);
            }
        }
        snapshot
    }

    /// Merge a seed's snapshot: seed values overwrite local ones. The
    /// entries are logged first so a restart keeps the bootstrapped data.
    pub fn merge_bootstrap(&self, entries: Vec<LogEntry>) -> Result<usize> {
        self.check_log()?;
        let mut log = self.lock_log();
        if let Err(e) = log.append_batch(&entries) {
            return Err(self.latch_fault(e));
        }
        Ok(self.store.merge(entries))
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }
}
