//! Connections: the unit of work against a triple store.
//!
//! [`TripleConnection`] is the operation surface shared by the store-backed
//! [`StoreConnection`] and by decorators such as [`ContextAwareConnection`].
//! A connection moves through the states of [`ConnectionState`]; writes need
//! an active transaction started with [`TripleConnection::begin`].

pub mod context;
pub mod cursor;
mod registry;
pub mod store;

use std::fmt;

use crate::error::{KiwiResult, TransactionError};
use crate::model::{Term, Triple};
use crate::persistence::ObjectFilter;

pub use context::ContextAwareConnection;
pub use cursor::TripleCursor;
pub use store::StoreConnection;

/// Lazy sequence of matching triples, borrowing its connection.
pub type TripleIter<'a> = Box<dyn Iterator<Item = KiwiResult<Triple>> + 'a>;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Opened,
    Active,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    /// A commit failed; only rollback and close are allowed.
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Opened => "opened",
            ConnectionState::Active => "active",
            ConnectionState::Committing => "committing",
            ConnectionState::Committed => "committed",
            ConnectionState::RollingBack => "rolling back",
            ConnectionState::RolledBack => "rolled back",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }

    /// Whether `begin` may start a new transaction.
    pub fn can_begin(self) -> bool {
        matches!(
            self,
            ConnectionState::Opened | ConnectionState::Committed | ConnectionState::RolledBack
        )
    }

    pub fn can_read(self) -> bool {
        !matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }

    pub(crate) fn invalid(self, operation: &str) -> TransactionError {
        TransactionError::InvalidState {
            operation: operation.to_string(),
            state: self.as_str().to_string(),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A triple pattern. Unset positions are wildcards.
///
/// `contexts` lists the graphs to match, `None` standing for the default
/// graph; an empty list matches every graph.
#[derive(Debug, Clone, PartialEq)]
pub struct TriplePattern {
    pub subject: Option<Term>,
    pub predicate: Option<Term>,
    pub object: Option<Term>,
    pub contexts: Vec<Option<Term>>,
    pub include_inferred: bool,
    /// Condition on the object's string value.
    pub filter: Option<ObjectFilter>,
}

impl Default for TriplePattern {
    fn default() -> Self {
        Self {
            subject: None,
            predicate: None,
            object: None,
            contexts: Vec::new(),
            include_inferred: true,
            filter: None,
        }
    }
}

impl TriplePattern {
    /// Matches every triple.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn subject(mut self, term: Term) -> Self {
        self.subject = Some(term);
        self
    }

    pub fn predicate(mut self, term: Term) -> Self {
        self.predicate = Some(term);
        self
    }

    pub fn object(mut self, term: Term) -> Self {
        self.object = Some(term);
        self
    }

    /// Restrict to a named graph.
    pub fn context(mut self, term: Term) -> Self {
        self.contexts.push(Some(term));
        self
    }

    /// Restrict to the default graph.
    pub fn default_graph(mut self) -> Self {
        self.contexts.push(None);
        self
    }

    pub fn include_inferred(mut self, include: bool) -> Self {
        self.include_inferred = include;
        self
    }

    pub fn filter(mut self, filter: ObjectFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Whether `triple` matches the value positions and contexts.
    ///
    /// The object filter is not evaluated here.
    pub fn matches(&self, triple: &Triple) -> bool {
        let position = |pattern: &Option<Term>, node: &crate::model::Node| {
            pattern.as_ref().is_none_or(|t| node.matches_term(t))
        };
        position(&self.subject, &triple.subject)
            && position(&self.predicate, &triple.predicate)
            && position(&self.object, &triple.object)
            && (self.include_inferred || !triple.inferred)
            && (self.contexts.is_empty()
                || self.contexts.iter().any(|c| match (c, &triple.context) {
                    (None, None) => true,
                    (Some(t), Some(node)) => node.matches_term(t),
                    _ => false,
                }))
    }
}

/// Operations of a transactional triple store connection.
pub trait TripleConnection {
    fn state(&self) -> ConnectionState;

    fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Start a transaction.
    fn begin(&mut self) -> KiwiResult<()>;

    /// Flush the transaction and notify listeners.
    fn commit(&mut self) -> KiwiResult<()>;

    /// Discard the transaction.
    fn rollback(&mut self) -> KiwiResult<()>;

    /// Matching triples, pending additions included and pending removals
    /// hidden. Dropping the iterator early releases its resources.
    fn get_statements<'a>(&'a self, pattern: &TriplePattern) -> KiwiResult<TripleIter<'a>>;

    /// Add a statement, creating nodes as needed. Returns the stored triple.
    fn add_statement(
        &mut self,
        subject: &Term,
        predicate: &Term,
        object: &Term,
        context: Option<&Term>,
    ) -> KiwiResult<Triple>;

    /// Soft-delete every triple matching `pattern`. Returns the count.
    fn remove_statements(&mut self, pattern: &TriplePattern) -> KiwiResult<usize>;

    /// Soft-delete every triple in `contexts`, or in every graph when empty.
    fn clear(&mut self, contexts: &[Option<Term>]) -> KiwiResult<usize>;

    /// Named graphs holding at least one active triple.
    fn get_context_ids(&self) -> KiwiResult<Vec<Term>>;

    /// Active triples in `contexts`, or in every graph when empty.
    fn size(&self, contexts: &[Option<Term>]) -> KiwiResult<u64>;
}
