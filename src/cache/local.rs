//! Process-local, size-bounded LRU maps.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::config::CacheConfig;
use crate::model::{NodeRef, Term, Triple, TripleKey};

/// One LRU map; capacity 0 disables it.
pub(crate) struct Lru<K: Hash + Eq, V: Clone> {
    map: Option<Mutex<LruCache<K, V>>>,
}

impl<K: Hash + Eq, V: Clone> Lru<K, V> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            map: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub(crate) fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let map = self.map.as_ref()?;
        map.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }

    pub(crate) fn put(&self, key: K, value: V) {
        if let Some(map) = &self.map {
            map.lock().unwrap_or_else(|e| e.into_inner()).put(key, value);
        }
    }

    pub(crate) fn clear(&self) {
        if let Some(map) = &self.map {
            map.lock().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.map
            .as_ref()
            .map_or(0, |m| m.lock().unwrap_or_else(|e| e.into_inner()).len())
    }
}

/// The local tier: nodes by id and by value, triples by id and by key.
pub(crate) struct LocalCache {
    pub(crate) nodes: Lru<i64, NodeRef>,
    pub(crate) uris: Lru<String, NodeRef>,
    pub(crate) bnodes: Lru<String, NodeRef>,
    pub(crate) literals: Lru<Term, NodeRef>,
    pub(crate) triples: Lru<i64, Triple>,
    pub(crate) triple_keys: Lru<TripleKey, Triple>,
}

impl LocalCache {
    pub(crate) fn new(config: &CacheConfig) -> Self {
        Self {
            nodes: Lru::new(config.node_cache_size),
            uris: Lru::new(config.uri_cache_size),
            bnodes: Lru::new(config.bnode_cache_size),
            literals: Lru::new(config.literal_cache_size),
            triples: Lru::new(config.triple_cache_size),
            triple_keys: Lru::new(config.triple_cache_size),
        }
    }

    pub(crate) fn node_by_term(&self, term: &Term) -> Option<NodeRef> {
        match term {
            Term::Uri(uri) => self.uris.get(uri.as_str()),
            Term::BNode(id) => self.bnodes.get(id.as_str()),
            Term::Literal { .. } => self.literals.get(term),
        }
    }

    pub(crate) fn put_node(&self, node: &NodeRef) {
        self.nodes.put(node.id(), node.clone());
        if node.is_uri() {
            self.uris.put(node.string_value().to_string(), node.clone());
        } else if node.is_anon() {
            self.bnodes.put(node.string_value().to_string(), node.clone());
        } else {
            self.literals.put(node.term(), node.clone());
        }
    }

    pub(crate) fn put_triple(&self, triple: &Triple) {
        self.triples.put(triple.id, triple.clone());
        self.triple_keys.put(triple.key(), triple.clone());
    }

    pub(crate) fn clear(&self) {
        self.nodes.clear();
        self.uris.clear();
        self.bnodes.clear();
        self.literals.clear();
        self.triples.clear();
        self.triple_keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{Node, now};

    #[test]
    fn lru_evicts_oldest() {
        let lru: Lru<i64, i64> = Lru::new(2);
        lru.put(1, 10);
        lru.put(2, 20);
        assert_eq!(lru.get(&1), Some(10));
        lru.put(3, 30);
        assert_eq!(lru.get(&2), None);
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn zero_capacity_disables() {
        let lru: Lru<i64, i64> = Lru::new(0);
        lru.put(1, 10);
        assert_eq!(lru.get(&1), None);
        assert_eq!(lru.len(), 0);
    }

    #[test]
    fn nodes_are_indexed_by_value() {
        let local = LocalCache::new(&CacheConfig::default());
        let node = Arc::new(Node::from_term(4, now(), &Term::bnode("b1"), None).unwrap());
        local.put_node(&node);
        let found = local.node_by_term(&Term::bnode("b1")).unwrap();
        assert!(Arc::ptr_eq(&found, &node));
        assert!(local.node_by_term(&Term::uri("b1")).is_none());
        assert!(Arc::ptr_eq(&local.nodes.get(&4).unwrap(), &node));
    }
}
