//! Transaction listeners.
//!
//! Listeners are registered on the store and called synchronously, in
//! registration order, by the committing or rolling-back connection. They
//! receive the transaction's change set by shared reference.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::TransactionData;

/// Observer of transaction outcomes.
pub trait TransactionListener: Send + Sync {
    /// Called before the changes are flushed.
    fn before_commit(&self, _data: &TransactionData) {}

    /// Called after the changes are durable, with the commit time set.
    fn after_commit(&self, data: &TransactionData);

    /// Called after a rollback with the discarded changes.
    fn after_rollback(&self, _data: &TransactionData) {}
}

/// Ordered listener list of one store.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn TransactionListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn TransactionListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Remove a listener by identity. Returns whether it was registered.
    pub fn remove(&self, listener: &Arc<dyn TransactionListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the list, so listeners may open connections and commit
    /// themselves without holding the lock.
    fn snapshot(&self) -> Vec<Arc<dyn TransactionListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn before_commit(&self, data: &TransactionData) {
        for listener in self.snapshot() {
            listener.before_commit(data);
        }
    }

    pub fn after_commit(&self, data: &TransactionData) {
        for listener in self.snapshot() {
            listener.after_commit(data);
        }
    }

    pub fn after_rollback(&self, data: &TransactionData) {
        for listener in self.snapshot() {
            listener.after_rollback(data);
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ChangeLog
// ---------------------------------------------------------------------------

/// One committed transaction, with triples in N-Quads-like text form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub transaction_id: String,
    pub commit_time: Option<DateTime<Utc>>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ChangeSet {
    fn from_data(data: &TransactionData) -> Self {
        let mut added: Vec<String> = data.added_triples().iter().map(|t| t.to_string()).collect();
        let mut removed: Vec<String> = data.removed_triples().iter().map(|t| t.to_string()).collect();
        added.sort();
        removed.sort();
        Self {
            transaction_id: data.transaction_id().to_string(),
            commit_time: data.commit_time(),
            added,
            removed,
        }
    }
}

/// Keeps the last `capacity` committed change sets in memory.
#[derive(Debug)]
pub struct ChangeLog {
    capacity: usize,
    entries: Mutex<VecDeque<ChangeSet>>,
}

impl ChangeLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Recorded change sets, oldest first.
    pub fn entries(&self) -> Vec<ChangeSet> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<ChangeSet> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .back()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TransactionListener for ChangeLog {
    fn after_commit(&self, data: &TransactionData) {
        if data.is_empty() {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(ChangeSet::from_data(data));
    }
}
