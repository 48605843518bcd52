//! Stored triples (quadruples with an optional context).

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::NodeRef;

/// The (subject, predicate, object, context) node ids of a triple.
///
/// Two triples over resolved nodes are equal exactly when their keys are equal,
/// so the key is what caches and pending-change maps index by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TripleKey {
    pub subject: i64,
    pub predicate: i64,
    pub object: i64,
    pub context: Option<i64>,
}

/// Lifecycle state of a stored triple. Deleted triples keep their row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripleState {
    Active,
    Deleted { at: DateTime<Utc> },
}

/// An RDF statement with storage metadata.
///
/// Equality and hashing only look at the subject, predicate, object and
/// context values; id, timestamps and flags are ignored.
#[derive(Debug, Clone)]
pub struct Triple {
    pub id: i64,
    pub subject: NodeRef,
    pub predicate: NodeRef,
    pub object: NodeRef,
    /// `None` is the default graph.
    pub context: Option<NodeRef>,
    pub creator: Option<NodeRef>,
    pub created: DateTime<Utc>,
    pub state: TripleState,
    pub inferred: bool,
    /// Created in the current transaction and not yet committed.
    pub new_triple: bool,
}

impl Triple {
    /// An active, explicit triple created now.
    pub fn new(
        id: i64,
        subject: NodeRef,
        predicate: NodeRef,
        object: NodeRef,
        context: Option<NodeRef>,
    ) -> Self {
        Self {
            id,
            subject,
            predicate,
            object,
            context,
            creator: None,
            created: super::now(),
            state: TripleState::Active,
            inferred: false,
            new_triple: false,
        }
    }

    pub fn with_creator(mut self, creator: NodeRef) -> Self {
        self.creator = Some(creator);
        self
    }

    pub fn with_inferred(mut self, inferred: bool) -> Self {
        self.inferred = inferred;
        self
    }

    pub fn key(&self) -> TripleKey {
        TripleKey {
            subject: self.subject.id(),
            predicate: self.predicate.id(),
            object: self.object.id(),
            context: self.context.as_ref().map(|c| c.id()),
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.state, TripleState::Deleted { .. })
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            TripleState::Deleted { at } => Some(at),
            TripleState::Active => None,
        }
    }

    pub fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.state = TripleState::Deleted { at };
    }

    pub fn undelete(&mut self) {
        self.state = TripleState::Active;
    }
}

impl PartialEq for Triple {
    fn eq(&self, other: &Self) -> bool {
        self.subject == other.subject
            && self.predicate == other.predicate
            && self.object == other.object
            && self.context == other.context
    }
}

impl Eq for Triple {}

impl Hash for Triple {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.subject.hash(state);
        self.predicate.hash(state);
        self.object.hash(state);
        self.context.hash(state);
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)?;
        if let Some(ctx) = &self.context {
            write!(f, " {ctx}")?;
        }
        f.write_str(" .")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::model::{Node, Term, now};

    fn uri(id: i64, u: &str) -> NodeRef {
        Arc::new(Node::from_term(id, now(), &Term::uri(u), None).unwrap())
    }

    #[test]
    fn equality_ignores_ids_and_flags() {
        let a = Triple::new(1, uri(1, "http://s"), uri(2, "http://p"), uri(3, "http://o"), None);
        let mut b = Triple::new(50, uri(10, "http://s"), uri(20, "http://p"), uri(30, "http://o"), None)
            .with_inferred(true);
        b.mark_deleted(now());
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
    }

    #[test]
    fn context_is_part_of_identity() {
        let a = Triple::new(1, uri(1, "http://s"), uri(2, "http://p"), uri(3, "http://o"), None);
        let b = Triple::new(2, uri(1, "http://s"), uri(2, "http://p"), uri(3, "http://o"), Some(uri(4, "http://g")));
        assert_ne!(a, b);
        assert_eq!(b.key().context, Some(4));
    }

    #[test]
    fn soft_delete_state() {
        let mut t = Triple::new(1, uri(1, "http://s"), uri(2, "http://p"), uri(3, "http://o"), None);
        assert!(!t.is_deleted());
        let at = now();
        t.mark_deleted(at);
        assert_eq!(t.deleted_at(), Some(at));
        t.undelete();
        assert_eq!(t.state, TripleState::Active);
    }

    #[test]
    fn display_is_nquads_like() {
        let t = Triple::new(1, uri(1, "http://s"), uri(2, "http://p"), uri(3, "http://o"), Some(uri(4, "http://g")));
        assert_eq!(t.to_string(), "<http://s> <http://p> <http://o> <http://g> .");
    }
}
