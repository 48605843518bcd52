//! The store-backed connection.
//!
//! Writes are buffered until commit: new nodes get their id from the ID
//! service immediately but are only written by [`DbConnection::flush`],
//! together with the triple changes recorded in the [`TransactionData`].
//! Reads merge the buffered changes over the database snapshot opened by
//! `begin`, so a connection always reads its own writes.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{KiwiResult, ModelError, StoreError, TransactionError};
use crate::model::{Node, NodeRef, Term, Triple, now};
use crate::persistence::db::{DbConnection, FlushBatch, JustificationRow, NodeRow, TripleRow};
use crate::persistence::query::{self, ResolvedPattern};
use crate::reasoning::Justification;
use crate::store::TripleStore;
use crate::transaction::TransactionData;

use super::cursor::TripleCursor;
use super::registry::NodeRegistry;
use super::{ConnectionState, TripleConnection, TripleIter, TriplePattern};

/// A unit of work against a [`TripleStore`].
///
/// Not `Sync`: a connection is used by one thread at a time.
pub struct StoreConnection {
    store: TripleStore,
    db: DbConnection,
    state: ConnectionState,
    registry: NodeRegistry,
    /// Nodes created by the running transaction, in creation order.
    pending_nodes: Vec<NodeRef>,
    data: TransactionData,
}

impl StoreConnection {
    pub(crate) fn new(store: TripleStore, db: DbConnection) -> Self {
        Self {
            store,
            db,
            state: ConnectionState::Opened,
            registry: NodeRegistry::default(),
            pending_nodes: Vec::new(),
            data: TransactionData::new(),
        }
    }

    pub fn store(&self) -> &TripleStore {
        &self.store
    }

    /// Changes of the running transaction.
    pub fn transaction(&self) -> &TransactionData {
        &self.data
    }

    pub(crate) fn db(&self) -> &DbConnection {
        &self.db
    }

    fn require_active(&self, operation: &str) -> KiwiResult<()> {
        if self.state != ConnectionState::Active {
            return Err(self.state.invalid(operation).into());
        }
        Ok(())
    }

    fn require_readable(&self, operation: &str) -> KiwiResult<()> {
        if !self.state.can_read() {
            return Err(self.state.invalid(operation).into());
        }
        Ok(())
    }

    // -- nodes -------------------------------------------------------------

    /// The stored node for `term`, if any. Never creates one.
    ///
    /// Within one connection every call for the same term returns the same
    /// `Arc`.
    pub fn lookup_node(&self, term: &Term) -> KiwiResult<Option<NodeRef>> {
        if let Some(node) = self.registry.by_term(term) {
            return Ok(Some(node));
        }
        if let Some(node) = self.store.cache().get_node_by_term(term) {
            return Ok(Some(self.registry.intern(node)));
        }
        match self.db.load_node_by_digest(&term.digest())? {
            Some(row) => self.materialize(row).map(Some),
            None => Ok(None),
        }
    }

    /// The stored node for `term`, created if it does not exist yet.
    pub fn resolve_node(&mut self, term: &Term) -> KiwiResult<NodeRef> {
        self.require_active("create a node")?;
        if let Some(node) = self.lookup_node(term)? {
            return Ok(node);
        }
        let datatype = match term.datatype() {
            Some(dt) => Some(self.resolve_node(&Term::uri(dt))?),
            None => None,
        };
        let id = self.store.ids().next_node_id()?;
        let node = Arc::new(Node::from_term(id, now(), term, datatype)?);
        self.pending_nodes.push(Arc::clone(&node));
        tracing::trace!(id, %term, "created node");
        Ok(self.registry.intern(node))
    }

    /// The node stored under `id`.
    pub fn node_by_id(&self, id: i64) -> KiwiResult<NodeRef> {
        if let Some(node) = self.registry.by_id(id) {
            return Ok(node);
        }
        if let Some(node) = self.store.cache().get_node_by_id(id) {
            return Ok(self.registry.intern(node));
        }
        match self.db.load_node_by_id(id)? {
            Some(row) => self.materialize(row),
            None => Err(StoreError::MissingNode { id }.into()),
        }
    }

    /// Turn a loaded row into the connection's instance for its id.
    fn materialize(&self, row: NodeRow) -> KiwiResult<NodeRef> {
        if let Some(node) = self.registry.by_id(row.id) {
            return Ok(node);
        }
        let datatype = row.ltype.map(|dt| self.node_by_id(dt)).transpose()?;
        let term = row.term(datatype.as_ref().map(|d| d.string_value()));
        let node = Arc::new(Node::from_term(row.id, row.created, &term, datatype)?);
        self.store.cache().put_node(&node);
        Ok(self.registry.intern(node))
    }

    /// Make sure every id in `ids` is resolvable without a single-row load.
    pub(crate) fn preload_nodes(&self, ids: impl IntoIterator<Item = i64>) -> KiwiResult<()> {
        let mut missing = Vec::new();
        for id in ids {
            if self.registry.by_id(id).is_some() {
                continue;
            }
            match self.store.cache().get_node_by_id(id) {
                Some(node) => {
                    self.registry.intern(node);
                }
                None => missing.push(id),
            }
        }
        missing.sort_unstable();
        missing.dedup();
        if missing.is_empty() {
            return Ok(());
        }
        for row in self.db.load_nodes_by_ids(&missing)? {
            self.materialize(row)?;
        }
        Ok(())
    }

    // -- triples -----------------------------------------------------------

    pub(crate) fn triple_from_row(&self, row: &TripleRow) -> KiwiResult<Triple> {
        let context = row.context.map(|id| self.node_by_id(id)).transpose()?;
        let mut triple = Triple::new(
            row.id,
            self.node_by_id(row.subject)?,
            self.node_by_id(row.predicate)?,
            self.node_by_id(row.object)?,
            context,
        );
        triple.creator = row.creator.map(|id| self.node_by_id(id)).transpose()?;
        triple.created = row.created;
        triple.inferred = row.inferred;
        if row.deleted {
            triple.mark_deleted(row.deleted_at.unwrap_or(row.created));
        }
        Ok(triple)
    }

    /// Swap the nodes of a cached triple for this connection's instances.
    fn rebind(&self, mut triple: Triple, candidate: &Triple) -> Triple {
        triple.subject = Arc::clone(&candidate.subject);
        triple.predicate = Arc::clone(&candidate.predicate);
        triple.object = Arc::clone(&candidate.object);
        triple.context = candidate.context.clone();
        triple.creator = triple.creator.map(|c| self.registry.intern(c));
        triple
    }

    /// The triple stored under `id`, in its current state.
    pub fn triple_by_id(&self, id: i64) -> KiwiResult<Option<Triple>> {
        self.require_readable("read")?;
        if let Some(t) = self.data.added_triples().iter().find(|t| t.id == id) {
            return Ok(Some(t.clone()));
        }
        if let Some(t) = self.data.removed_triples().iter().find(|t| t.id == id) {
            return Ok(Some(t.clone()));
        }
        match self.db.load_triple_by_id(id)? {
            Some(row) => self.triple_from_row(&row).map(Some),
            None => Ok(None),
        }
    }

    fn check_statement(subject: &Term, predicate: &Term, context: Option<&Term>) -> KiwiResult<()> {
        let invalid = |message: String| -> KiwiResult<()> {
            Err(ModelError::InvalidStatement { message }.into())
        };
        if !subject.is_resource() {
            return invalid(format!("subject {subject} is a literal"));
        }
        if !predicate.is_uri() {
            return invalid(format!("predicate {predicate} is not a URI"));
        }
        if let Some(ctx) = context.filter(|c| !c.is_resource()) {
            return invalid(format!("context {ctx} is a literal"));
        }
        Ok(())
    }

    /// Context used when the caller gives none.
    fn implicit_context(&self, inferred: bool) -> Option<Term> {
        let config = self.store.config();
        let configured = if inferred {
            config.inferred_context.as_ref().or(config.default_context.as_ref())
        } else {
            config.default_context.as_ref()
        };
        configured.map(Term::uri)
    }

    fn store_triple(
        &mut self,
        subject: &Term,
        predicate: &Term,
        object: &Term,
        context: Option<&Term>,
        inferred: bool,
    ) -> KiwiResult<Triple> {
        self.require_active("add a statement")?;
        let context = context.cloned().or_else(|| self.implicit_context(inferred));
        Self::check_statement(subject, predicate, context.as_ref())?;

        let s = self.resolve_node(subject)?;
        let p = self.resolve_node(predicate)?;
        let o = self.resolve_node(object)?;
        let c = context.as_ref().map(|t| self.resolve_node(t)).transpose()?;
        let candidate = Triple::new(Node::NO_ID, s, p, o, c).with_inferred(inferred);

        if let Some(pending) = self.data.added(&candidate) {
            return Ok(pending.clone());
        }
        if let Some(removed) = self.data.removed(&candidate).cloned() {
            // The row is still active in the database; dropping the removal
            // is all it takes.
            self.data.add_triple(removed.clone());
            let mut triple = removed;
            triple.undelete();
            return Ok(triple);
        }

        // The cache may already hold commits made after this connection's
        // snapshot, so the snapshot decides whether the triple exists.
        let key = candidate.key();
        let existing = match self.db.load_triple_by_key(&key)? {
            Some(row) => Some(match self.store.cache().get_triple_by_key(&key) {
                Some(cached) if cached.id == row.id && cached.is_deleted() == row.deleted => {
                    self.rebind(cached, &candidate)
                }
                _ => self.triple_from_row(&row)?,
            }),
            None => None,
        };

        match existing {
            Some(active) if !active.is_deleted() => Ok(active),
            Some(mut deleted) => {
                deleted.undelete();
                deleted.inferred = inferred;
                deleted.new_triple = false;
                self.data.add_triple(deleted.clone());
                Ok(deleted)
            }
            None => {
                let mut triple = candidate;
                triple.id = self.store.ids().next_triple_id()?;
                triple.created = now();
                triple.new_triple = true;
                self.data.add_triple(triple.clone());
                Ok(triple)
            }
        }
    }

    /// Add an inferred statement together with the triples justifying it.
    ///
    /// The justification is written in the same commit as the triple.
    pub fn add_inferred_statement(
        &mut self,
        subject: &Term,
        predicate: &Term,
        object: &Term,
        context: Option<&Term>,
        supporting: &[Triple],
    ) -> KiwiResult<Triple> {
        let triple = self.store_triple(subject, predicate, object, context, true)?;
        let mut justification = Justification::new(triple.clone());
        for s in supporting {
            justification.add_support(s.clone());
        }
        if !self.data.justifications().contains(&justification) {
            justification.id = self.store.ids().next_justification_id()?;
            self.data.add_justification(justification);
        }
        Ok(triple)
    }

    /// Soft-delete one triple. Returns `false` if nothing changed.
    pub fn remove_triple(&mut self, triple: &Triple) -> KiwiResult<bool> {
        self.require_active("remove a statement")?;
        let mut triple = triple.clone();
        if self.data.added(&triple).is_none() {
            if triple.is_deleted() {
                return Ok(false);
            }
            triple.mark_deleted(now());
        }
        Ok(self.data.remove_triple(triple))
    }

    /// Roll back if needed and close.
    pub fn close(mut self) -> KiwiResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> KiwiResult<()> {
        let result = match self.state {
            ConnectionState::Active | ConnectionState::Failed => self.rollback(),
            _ => Ok(()),
        };
        self.state = ConnectionState::Closed;
        result
    }

    fn resolve_pattern(&self, pattern: &TriplePattern) -> KiwiResult<Option<ResolvedPattern>> {
        let mut resolved = ResolvedPattern {
            include_inferred: pattern.include_inferred,
            filter: pattern.filter.clone(),
            ..ResolvedPattern::default()
        };
        for (term, slot) in [
            (&pattern.subject, &mut resolved.subject),
            (&pattern.predicate, &mut resolved.predicate),
            (&pattern.object, &mut resolved.object),
        ] {
            if let Some(term) = term {
                match self.lookup_node(term)? {
                    Some(node) => *slot = Some(node.id()),
                    None => return Ok(None),
                }
            }
        }
        for ctx in &pattern.contexts {
            match ctx {
                None => resolved.contexts.push(None),
                Some(term) => {
                    if let Some(node) = self.lookup_node(term)? {
                        resolved.contexts.push(Some(node.id()));
                    }
                }
            }
        }
        if !pattern.contexts.is_empty() && resolved.contexts.is_empty() {
            return Ok(None);
        }
        Ok(Some(resolved))
    }

    fn context_matches(contexts: &[Option<Term>], triple: &Triple) -> bool {
        contexts.is_empty()
            || contexts.iter().any(|c| match (c, &triple.context) {
                (None, None) => true,
                (Some(t), Some(node)) => node.matches_term(t),
                _ => false,
            })
    }
}

impl TripleConnection for StoreConnection {
    fn state(&self) -> ConnectionState {
        self.state
    }

    fn begin(&mut self) -> KiwiResult<()> {
        if !self.state.can_begin() {
            return Err(self.state.invalid("begin").into());
        }
        self.db.begin_read()?;
        self.data = TransactionData::new();
        self.pending_nodes.clear();
        self.state = ConnectionState::Active;
        tracing::trace!(transaction = self.data.transaction_id(), "transaction started");
        Ok(())
    }

    fn commit(&mut self) -> KiwiResult<()> {
        self.require_active("commit")?;
        self.state = ConnectionState::Committing;
        let transaction_id = self.data.transaction_id().to_string();
        self.data.set_commit_time(now());

        let flushed = self.db.end_read().and_then(|()| {
            self.store.listeners().before_commit(&self.data);
            let justifications: Vec<JustificationRow> =
                self.data.justifications().iter().map(Justification::to_row).collect();
            let batch = FlushBatch {
                nodes: &self.pending_nodes,
                inserts: self.data.added_triples().iter().filter(|t| t.new_triple).collect(),
                undeletes: self.data.added_triples().iter().filter(|t| !t.new_triple).collect(),
                deletes: self.data.removed_triples().iter().collect(),
                justifications: &justifications,
                batch_size: self.store.config().batch_size,
            };
            self.db.flush(&batch)
        });
        if let Err(source) = flushed {
            self.state = ConnectionState::Failed;
            tracing::warn!(transaction = %transaction_id, error = %source, "commit failed");
            return Err(TransactionError::CommitFailed {
                message: format!("transaction {transaction_id} was not persisted"),
                source,
            }
            .into());
        }

        let cache = self.store.cache();
        for node in self.pending_nodes.drain(..) {
            cache.put_node(&node);
        }
        for triple in self.data.added_triples().iter().chain(self.data.removed_triples()) {
            cache.put_triple(triple);
        }
        let data = std::mem::take(&mut self.data);
        self.state = ConnectionState::Committed;
        tracing::debug!(
            transaction = %transaction_id,
            added = data.added_triples().len(),
            removed = data.removed_triples().len(),
            "transaction committed"
        );
        self.store.listeners().after_commit(&data);
        Ok(())
    }

    fn rollback(&mut self) -> KiwiResult<()> {
        if !matches!(self.state, ConnectionState::Active | ConnectionState::Failed) {
            return Err(self.state.invalid("roll back").into());
        }
        self.state = ConnectionState::RollingBack;
        let ended = self.db.end_read();
        self.registry.forget(&self.pending_nodes);
        self.pending_nodes.clear();
        let data = std::mem::take(&mut self.data);
        self.state = ConnectionState::RolledBack;
        tracing::debug!(
            transaction = data.transaction_id(),
            discarded = data.len(),
            "transaction rolled back"
        );
        self.store.listeners().after_rollback(&data);
        ended?;
        Ok(())
    }

    fn get_statements<'a>(&'a self, pattern: &TriplePattern) -> KiwiResult<TripleIter<'a>> {
        self.require_readable("read")?;
        let filter = pattern.filter.as_ref().map(|f| f.compile()).transpose()?;
        let mut pending: Vec<Triple> = self
            .data
            .added_triples()
            .iter()
            .filter(|t| pattern.matches(t))
            .filter(|t| filter.as_ref().is_none_or(|f| f.matches(&t.object)))
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.id);

        let Some(resolved) = self.resolve_pattern(pattern)? else {
            return Ok(Box::new(pending.into_iter().map(Ok)));
        };
        let config = self.store.config();
        let plan = query::plan(self.db.dialect(), &resolved, config.fetch_size)?;
        let hidden: HashSet<i64> = self
            .data
            .added_triples()
            .iter()
            .chain(self.data.removed_triples())
            .map(|t| t.id)
            .collect();
        Ok(Box::new(TripleCursor::new(self, pending, plan, hidden)?))
    }

    fn add_statement(
        &mut self,
        subject: &Term,
        predicate: &Term,
        object: &Term,
        context: Option<&Term>,
    ) -> KiwiResult<Triple> {
        self.store_triple(subject, predicate, object, context, false)
    }

    fn remove_statements(&mut self, pattern: &TriplePattern) -> KiwiResult<usize> {
        self.require_active("remove statements")?;
        let matches: Vec<Triple> = self.get_statements(pattern)?.collect::<KiwiResult<_>>()?;
        let mut removed = 0;
        for triple in &matches {
            if self.remove_triple(triple)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn clear(&mut self, contexts: &[Option<Term>]) -> KiwiResult<usize> {
        self.require_active("clear")?;
        let pattern = TriplePattern {
            contexts: contexts.to_vec(),
            ..TriplePattern::any()
        };
        let removed = self.remove_statements(&pattern)?;
        tracing::debug!(contexts = contexts.len(), removed, "cleared contexts");
        Ok(removed)
    }

    fn get_context_ids(&self) -> KiwiResult<Vec<Term>> {
        self.require_readable("read contexts")?;
        let mut contexts = Vec::new();
        let mut seen = HashSet::new();
        for id in self.db.load_context_ids()? {
            if seen.insert(id) {
                contexts.push(self.node_by_id(id)?.term());
            }
        }
        let mut pending: Vec<&NodeRef> = self
            .data
            .added_triples()
            .iter()
            .filter_map(|t| t.context.as_ref())
            .filter(|c| !seen.contains(&c.id()))
            .collect();
        pending.sort_by_key(|c| c.id());
        pending.dedup_by_key(|c| c.id());
        contexts.extend(pending.into_iter().map(|c| c.term()));
        Ok(contexts)
    }

    fn size(&self, contexts: &[Option<Term>]) -> KiwiResult<u64> {
        self.require_readable("count")?;
        let mut stored: i64 = 0;
        if contexts.is_empty() {
            stored = self.db.count_triples(None)?;
        } else {
            let mut counted = HashSet::new();
            for ctx in contexts {
                let id = match ctx {
                    None => None,
                    Some(term) => match self.lookup_node(term)? {
                        Some(node) => Some(node.id()),
                        None => continue,
                    },
                };
                if counted.insert(id) {
                    stored += self.db.count_triples(Some(id))?;
                }
            }
        }
        let added = self
            .data
            .added_triples()
            .iter()
            .filter(|t| Self::context_matches(contexts, t))
            .count() as i64;
        let removed = self
            .data
            .removed_triples()
            .iter()
            .filter(|t| Self::context_matches(contexts, t))
            .count() as i64;
        Ok((stored + added - removed).max(0) as u64)
    }
}

impl Drop for StoreConnection {
    fn drop(&mut self) {
        if matches!(self.state, ConnectionState::Active | ConnectionState::Failed) {
            tracing::warn!(
                transaction = self.data.transaction_id(),
                "connection dropped inside a transaction, rolling back"
            );
            if let Err(e) = self.shutdown() {
                tracing::warn!(error = %e, "rollback on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for StoreConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConnection")
            .field("state", &self.state)
            .field("transaction", &self.data.transaction_id())
            .field("pending_nodes", &self.pending_nodes.len())
            .field("registered_nodes", &self.registry.len())
            .finish()
    }
}
