//! Transaction-scoped change sets.
//!
//! A [`TransactionData`] collects the triples added and removed by one
//! transaction. Adding a triple that is pending removal (or the reverse)
//! cancels the earlier change instead of recording both, so at commit time
//! the two sets are disjoint and describe the net effect of the transaction.

pub mod listener;

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::model::Triple;
use crate::reasoning::Justification;

pub use listener::{ChangeLog, ChangeSet, ListenerRegistry, TransactionListener};

/// The net changes of one transaction.
#[derive(Debug, Clone)]
pub struct TransactionData {
    transaction_id: String,
    started: DateTime<Utc>,
    commit_time: Option<DateTime<Utc>>,
    added: HashSet<Triple>,
    removed: HashSet<Triple>,
    justifications: Vec<Justification>,
}

impl TransactionData {
    pub fn new() -> Self {
        Self {
            transaction_id: uuid::Uuid::new_v4().to_string(),
            started: crate::model::now(),
            commit_time: None,
            added: HashSet::new(),
            removed: HashSet::new(),
            justifications: Vec::new(),
        }
    }

    /// Random id of the transaction (UUID v4).
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    /// Set when the transaction commits.
    pub fn commit_time(&self) -> Option<DateTime<Utc>> {
        self.commit_time
    }

    pub(crate) fn set_commit_time(&mut self, at: DateTime<Utc>) {
        self.commit_time = Some(at);
    }

    /// Record an addition. Returns `false` when nothing changed.
    pub fn add_triple(&mut self, triple: Triple) -> bool {
        if self.removed.remove(&triple) {
            return true;
        }
        self.added.insert(triple)
    }

    /// Record a removal. Returns `false` when nothing changed.
    ///
    /// Cancelling a pending addition also drops its pending justifications.
    pub fn remove_triple(&mut self, triple: Triple) -> bool {
        if self.added.remove(&triple) {
            self.justifications.retain(|j| j.triple != triple);
            return true;
        }
        self.removed.insert(triple)
    }

    /// Record a justification of a triple added in this transaction.
    pub fn add_justification(&mut self, justification: Justification) -> bool {
        if self.justifications.contains(&justification) {
            return false;
        }
        self.justifications.push(justification);
        true
    }

    /// Justifications recorded in this transaction, in insertion order.
    pub fn justifications(&self) -> &[Justification] {
        &self.justifications
    }

    pub fn added_triples(&self) -> &HashSet<Triple> {
        &self.added
    }

    pub fn removed_triples(&self) -> &HashSet<Triple> {
        &self.removed
    }

    /// The pending addition equal to `candidate`, with its id and flags.
    pub fn added(&self, candidate: &Triple) -> Option<&Triple> {
        self.added.get(candidate)
    }

    /// The pending removal equal to `candidate`.
    pub fn removed(&self, candidate: &Triple) -> Option<&Triple> {
        self.removed.get(candidate)
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Number of recorded changes.
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len()
    }
}

impl Default for TransactionData {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{Node, NodeRef, Term, now};
    use crate::reasoning::Justification;

    fn uri(id: i64, u: &str) -> NodeRef {
        Arc::new(Node::from_term(id, now(), &Term::uri(u), None).unwrap())
    }

    fn triple(o: &str) -> Triple {
        Triple::new(1, uri(1, "http://s"), uri(2, "http://p"), uri(3, o), None)
    }

    #[test]
    fn add_then_remove_cancels() {
        let mut data = TransactionData::new();
        assert!(data.add_triple(triple("http://o")));
        assert!(data.remove_triple(triple("http://o")));
        assert!(data.is_empty());
    }

    #[test]
    fn remove_then_add_cancels() {
        let mut data = TransactionData::new();
        data.remove_triple(triple("http://o"));
        data.add_triple(triple("http://o"));
        assert!(data.added_triples().is_empty());
        assert!(data.removed_triples().is_empty());
    }

    #[test]
    fn operations_are_idempotent() {
        let mut data = TransactionData::new();
        assert!(data.add_triple(triple("http://a")));
        assert!(!data.add_triple(triple("http://a")));
        assert!(data.remove_triple(triple("http://b")));
        assert!(!data.remove_triple(triple("http://b")));
        assert_eq!(data.len(), 2);
        assert!(data.added(&triple("http://a")).is_some());
        assert!(data.removed(&triple("http://b")).is_some());
    }

    #[test]
    fn cancelled_addition_drops_its_justifications() {
        let mut data = TransactionData::new();
        let inferred = triple("http://c");
        data.add_triple(inferred.clone());
        let j = Justification::new(inferred.clone()).with_support(triple("http://a"));
        assert!(data.add_justification(j.clone()));
        assert!(!data.add_justification(j));
        data.remove_triple(inferred);
        assert!(data.justifications().is_empty());
    }

    #[test]
    fn ids_are_unique_and_commit_time_starts_unset() {
        let a = TransactionData::new();
        let b = TransactionData::new();
        assert_ne!(a.transaction_id(), b.transaction_id());
        assert!(a.commit_time().is_none());
    }
}
