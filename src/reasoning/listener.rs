//! Commit listener that keeps inferred triples consistent with their support.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, Weak};

use crate::connection::TripleConnection;
use crate::error::KiwiResult;
use crate::store::{StoreShared, TripleStore};
use crate::transaction::{TransactionData, TransactionListener};

use super::tms::{JustificationIndex, Retraction};

/// Removes inferred triples whose last justification lost a support.
///
/// After each commit the listener indexes the justifications the commit
/// wrote, retracts the removed triples, deletes the justifications that no
/// longer hold and soft-deletes the inferred triples left unsupported in a
/// follow-up transaction.
pub struct RetractionListener {
    store: Weak<StoreShared>,
    index: Mutex<JustificationIndex>,
    retracted: AtomicU64,
}

impl RetractionListener {
    pub(crate) fn new(store: Weak<StoreShared>, index: JustificationIndex) -> Self {
        Self {
            store,
            index: Mutex::new(index),
            retracted: AtomicU64::new(0),
        }
    }

    /// Whether the triple with `id` has at least one justification.
    pub fn is_justified(&self, id: i64) -> bool {
        self.index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_justified(id)
    }

    /// Number of indexed justifications.
    pub fn justifications(&self) -> usize {
        self.index.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Inferred triples removed so far.
    pub fn retracted(&self) -> u64 {
        self.retracted.load(Ordering::Relaxed)
    }

    fn update_index(&self, data: &TransactionData) -> Retraction {
        let mut index = self.index.lock().unwrap_or_else(|e| e.into_inner());
        for justification in data.justifications() {
            index.add(justification.to_row());
        }
        let removed: Vec<i64> = data.removed_triples().iter().map(|t| t.id).collect();
        if removed.is_empty() {
            return Retraction::default();
        }
        index.retract(&removed)
    }

    fn apply(&self, store: &TripleStore, retraction: &Retraction) -> KiwiResult<()> {
        store
            .persistence()
            .connect()?
            .delete_justifications(&retraction.removed_justifications)?;
        if retraction.unsupported.is_empty() {
            return Ok(());
        }

        let mut conn = store.connection()?;
        conn.begin()?;
        let mut removed = 0u64;
        for &id in &retraction.unsupported {
            let Some(triple) = conn.triple_by_id(id)? else { continue };
            if triple.inferred && !triple.is_deleted() && conn.remove_triple(&triple)? {
                removed += 1;
            }
        }
        conn.commit()?;
        self.retracted.fetch_add(removed, Ordering::Relaxed);
        tracing::debug!(
            justifications = retraction.removed_justifications.len(),
            removed,
            depth = retraction.cascade_depth,
            "retracted unsupported inferences"
        );
        Ok(())
    }
}

impl TransactionListener for RetractionListener {
    fn after_commit(&self, data: &TransactionData) {
        let Some(store) = TripleStore::upgrade(&self.store) else {
            return;
        };
        // The index lock is released before the follow-up commit, which
        // calls back into this listener.
        let retraction = self.update_index(data);
        if retraction.is_empty() {
            return;
        }
        if let Err(e) = self.apply(&store, &retraction) {
            tracing::warn!(error = %e, "retraction of unsupported inferences failed");
        }
    }
}

impl std::fmt::Debug for RetractionListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetractionListener")
            .field("justifications", &self.justifications())
            .field("retracted", &self.retracted())
            .finish()
    }
}
