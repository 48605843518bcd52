//! Connection-local node identity map.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{NodeRef, Term};

/// Every node a connection has handed out, by term and by id.
///
/// Lookups through the registry come first, so a connection returns the same
/// `Arc` for a term for as long as it is open, whatever the shared cache
/// evicts in the meantime.
#[derive(Debug, Default)]
pub(crate) struct NodeRegistry {
    by_term: RefCell<HashMap<Term, NodeRef>>,
    by_id: RefCell<HashMap<i64, NodeRef>>,
}

impl NodeRegistry {
    pub(crate) fn by_term(&self, term: &Term) -> Option<NodeRef> {
        self.by_term.borrow().get(term).cloned()
    }

    pub(crate) fn by_id(&self, id: i64) -> Option<NodeRef> {
        self.by_id.borrow().get(&id).cloned()
    }

    /// Register `node`, or return the instance already registered for its id.
    pub(crate) fn intern(&self, node: NodeRef) -> NodeRef {
        if let Some(existing) = self.by_id(node.id()) {
            return existing;
        }
        self.by_term.borrow_mut().insert(node.term(), Arc::clone(&node));
        self.by_id.borrow_mut().insert(node.id(), Arc::clone(&node));
        node
    }

    /// Forget nodes that were never persisted.
    pub(crate) fn forget(&self, nodes: &[NodeRef]) {
        let mut by_term = self.by_term.borrow_mut();
        let mut by_id = self.by_id.borrow_mut();
        for node in nodes {
            by_id.remove(&node.id());
            by_term.remove(&node.term());
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.borrow().len()
    }
}
