//! Two-level node and triple cache.
//!
//! The [`CacheHandle`] is created when a store opens and passed explicitly to
//! every connection. Lookups go to the local LRU tier first, then to the
//! optional second tier (see [`tier`]), whose payloads are produced by
//! [`externalize`]. The cache is never the source of truth: tier failures
//! and undecodable payloads are logged and reported as misses.

pub mod externalize;
mod local;
pub mod tier;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::config::{CacheBackend, CacheConfig};
use crate::error::CacheError;
use crate::model::{Node, NodeRef, Term, Triple, TripleKey};

use local::LocalCache;
pub use tier::{DurableTier, MemoryTier, SecondLevelCache};

/// Hit and miss counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    tier_hits: AtomicU64,
    misses: AtomicU64,
}

/// Point-in-time copy of the counters and tier sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub enabled: bool,
    pub tier: Option<String>,
    pub hits: u64,
    pub tier_hits: u64,
    pub misses: u64,
    pub nodes: usize,
    pub triples: usize,
    pub tier_entries: usize,
}

struct Caches {
    local: LocalCache,
    tier: Option<Arc<dyn SecondLevelCache>>,
    stats: CacheStats,
}

/// Shared handle to the caches of one store. Cloning is cheap.
///
/// A disabled handle answers every lookup with a miss and drops every put.
#[derive(Clone, Default)]
pub struct CacheHandle {
    inner: Option<Arc<Caches>>,
}

fn node_key(id: i64) -> Vec<u8> {
    let mut key = b"n:".to_vec();
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn digest_key(term: &Term) -> Vec<u8> {
    let mut key = b"d:".to_vec();
    key.extend_from_slice(term.digest().as_bytes());
    key
}

fn triple_key(id: i64) -> Vec<u8> {
    let mut key = b"t:".to_vec();
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn quad_key(k: &TripleKey) -> Vec<u8> {
    let mut key = b"q:".to_vec();
    for part in [k.subject, k.predicate, k.object, k.context.unwrap_or(0)] {
        key.extend_from_slice(&part.to_be_bytes());
    }
    key
}

/// Key prefixes of triple entries in the second tier.
pub(crate) const TRIPLE_PREFIXES: [&[u8]; 2] = [b"t:", b"q:"];

impl CacheHandle {
    /// A handle that caches nothing.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Build the caches for `config`. `tier` is ignored when caching is off.
    pub fn new(config: &CacheConfig, tier: Option<Arc<dyn SecondLevelCache>>) -> Self {
        if config.backend == CacheBackend::None {
            return Self::disabled();
        }
        Self {
            inner: Some(Arc::new(Caches {
                local: LocalCache::new(config),
                tier,
                stats: CacheStats::default(),
            })),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    fn hit(caches: &Caches, tier: bool) {
        let counter = if tier {
            &caches.stats.tier_hits
        } else {
            &caches.stats.hits
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(caches: &Caches) {
        caches.stats.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Read from the second tier, degrading errors to misses.
    fn tier_get(caches: &Caches, key: &[u8]) -> Option<Vec<u8>> {
        let tier = caches.tier.as_ref()?;
        match tier.get(key) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(tier = tier.name(), error = %e, "cache tier read failed");
                None
            }
        }
    }

    /// Write one payload under several keys, degrading errors to warnings.
    fn tier_put(caches: &Caches, keys: &[Vec<u8>], encoded: Result<Vec<u8>, CacheError>) {
        let Some(tier) = &caches.tier else { return };
        let result = encoded.and_then(|bytes| keys.iter().try_for_each(|key| tier.put(key, &bytes)));
        if let Err(e) = result {
            tracing::warn!(tier = tier.name(), error = %e, "cache tier write failed");
        }
    }

    /// Turn a decoded node into the locally cached instance for its id.
    fn intern(local: &LocalCache, node: Node) -> NodeRef {
        if let Some(existing) = local.nodes.get(&node.id()) {
            return existing;
        }
        let node = Arc::new(node);
        local.put_node(&node);
        node
    }

    pub fn get_node_by_id(&self, id: i64) -> Option<NodeRef> {
        let caches = self.inner.as_ref()?;
        if let Some(node) = caches.local.nodes.get(&id) {
            Self::hit(caches, false);
            return Some(node);
        }
        let decoded = Self::tier_get(caches, &node_key(id)).and_then(|bytes| {
            externalize::decode_node(&bytes, &mut |n| Self::intern(&caches.local, n))
                .map_err(|e| tracing::warn!(id, error = %e, "dropping undecodable cached node"))
                .ok()
        });
        match decoded {
            Some(node) => {
                Self::hit(caches, true);
                Some(node)
            }
            None => {
                Self::miss(caches);
                None
            }
        }
    }

    pub fn get_node_by_term(&self, term: &Term) -> Option<NodeRef> {
        let caches = self.inner.as_ref()?;
        if let Some(node) = caches.local.node_by_term(term) {
            Self::hit(caches, false);
            return Some(node);
        }
        let decoded = Self::tier_get(caches, &digest_key(term)).and_then(|bytes| {
            externalize::decode_node(&bytes, &mut |n| Self::intern(&caches.local, n))
                .map_err(|e| tracing::warn!(%term, error = %e, "dropping undecodable cached node"))
                .ok()
        });
        match decoded.filter(|n| n.matches_term(term)) {
            Some(node) => {
                Self::hit(caches, true);
                Some(node)
            }
            None => {
                Self::miss(caches);
                None
            }
        }
    }

    /// Cache a persisted node under its id and its value.
    pub fn put_node(&self, node: &NodeRef) {
        let Some(caches) = &self.inner else { return };
        if !node.has_id() {
            return;
        }
        caches.local.put_node(node);
        if caches.tier.is_some() {
            let keys = [node_key(node.id()), digest_key(&node.term())];
            Self::tier_put(caches, &keys, externalize::encode_node(node));
        }
    }

    pub fn get_triple_by_id(&self, id: i64) -> Option<Triple> {
        let caches = self.inner.as_ref()?;
        if let Some(t) = caches.local.triples.get(&id) {
            Self::hit(caches, false);
            return Some(t);
        }
        self.tier_triple(caches, &triple_key(id))
    }

    /// The cached triple for `key`, in whatever state it was last committed.
    pub fn get_triple_by_key(&self, key: &TripleKey) -> Option<Triple> {
        let caches = self.inner.as_ref()?;
        if let Some(t) = caches.local.triple_keys.get(key) {
            Self::hit(caches, false);
            return Some(t);
        }
        self.tier_triple(caches, &quad_key(key))
    }

    fn tier_triple(&self, caches: &Caches, key: &[u8]) -> Option<Triple> {
        let decoded = Self::tier_get(caches, key).and_then(|bytes| {
            externalize::decode_triple(&bytes, &mut |n| Self::intern(&caches.local, n))
                .map_err(|e| tracing::warn!(error = %e, "dropping undecodable cached triple"))
                .ok()
        });
        match decoded {
            Some(t) => {
                Self::hit(caches, true);
                caches.local.put_triple(&t);
                Some(t)
            }
            None => {
                Self::miss(caches);
                None
            }
        }
    }

    /// Cache a committed or loaded triple.
    pub fn put_triple(&self, triple: &Triple) {
        let Some(caches) = &self.inner else { return };
        let mut triple = triple.clone();
        triple.new_triple = false;
        caches.local.put_triple(&triple);
        if caches.tier.is_some() {
            let keys = [triple_key(triple.id), quad_key(&triple.key())];
            Self::tier_put(caches, &keys, externalize::encode_triple(&triple));
        }
    }

    /// Drop every entry of both tiers.
    pub fn clear(&self) {
        let Some(caches) = &self.inner else { return };
        caches.local.clear();
        if let Some(tier) = &caches.tier {
            if let Err(e) = tier.clear() {
                tracing::warn!(tier = tier.name(), error = %e, "cache tier clear failed");
            }
        }
    }

    /// Drop the process-local entries, keeping the second tier.
    pub fn clear_local(&self) {
        if let Some(caches) = &self.inner {
            caches.local.clear();
        }
    }

    /// Drop triple entries of the second tier, keeping nodes.
    pub(crate) fn clear_tier_triples(&self) {
        let Some(tier) = self.inner.as_ref().and_then(|c| c.tier.as_ref()) else {
            return;
        };
        for prefix in TRIPLE_PREFIXES {
            if let Err(e) = tier.remove_prefix(prefix) {
                tracing::warn!(tier = tier.name(), error = %e, "cache tier cleanup failed");
            }
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let Some(caches) = &self.inner else {
            return CacheStatsSnapshot::default();
        };
        CacheStatsSnapshot {
            enabled: true,
            tier: caches.tier.as_ref().map(|t| t.name().to_string()),
            hits: caches.stats.hits.load(Ordering::Relaxed),
            tier_hits: caches.stats.tier_hits.load(Ordering::Relaxed),
            misses: caches.stats.misses.load(Ordering::Relaxed),
            nodes: caches.local.nodes.len(),
            triples: caches.local.triples.len(),
            tier_entries: caches.tier.as_ref().map_or(0, |t| t.len()),
        }
    }
}

impl std::fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHandle")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::now;

    fn node(id: i64, term: Term) -> NodeRef {
        Arc::new(Node::from_term(id, now(), &term, None).unwrap())
    }

    fn triple(id: i64) -> Triple {
        Triple::new(
            id,
            node(1, Term::uri("http://ex.org/s")),
            node(2, Term::uri("http://ex.org/p")),
            node(3, Term::literal("o")),
            None,
        )
    }

    #[test]
    fn disabled_cache_always_misses() {
        let cache = CacheHandle::new(&CacheConfig::disabled(), Some(Arc::new(MemoryTier::new())));
        let n = node(1, Term::uri("http://ex.org/a"));
        cache.put_node(&n);
        assert!(!cache.is_enabled());
        assert!(cache.get_node_by_id(1).is_none());
        assert_eq!(cache.stats(), CacheStatsSnapshot::default());
    }

    #[test]
    fn local_hits_return_the_same_instance() {
        let cache = CacheHandle::new(&CacheConfig::default(), None);
        let n = node(7, Term::uri("http://ex.org/a"));
        cache.put_node(&n);
        assert!(Arc::ptr_eq(&cache.get_node_by_id(7).unwrap(), &n));
        assert!(Arc::ptr_eq(&cache.get_node_by_term(&Term::uri("http://ex.org/a")).unwrap(), &n));
        assert!(cache.get_node_by_id(8).is_none());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (2, 1));
    }

    #[test]
    fn shared_tier_serves_a_second_store() {
        let tier: Arc<dyn SecondLevelCache> = Arc::new(MemoryTier::new());
        let first = CacheHandle::new(&CacheConfig::default(), Some(tier.clone()));
        let second = CacheHandle::new(&CacheConfig::default(), Some(tier));
        let t = triple(11);
        first.put_node(&t.subject);
        first.put_triple(&t);

        let by_key = second.get_triple_by_key(&t.key()).unwrap();
        assert_eq!(by_key.id, 11);
        assert_eq!(by_key, t);
        let subject = second.get_node_by_term(&Term::uri("http://ex.org/s")).unwrap();
        assert!(Arc::ptr_eq(&subject, &by_key.subject));
        let stats = second.stats();
        assert_eq!((stats.tier_hits, stats.hits), (1, 1));
    }

    #[test]
    fn corrupt_tier_entries_are_misses() {
        let tier = Arc::new(MemoryTier::new());
        tier.put(&node_key(5), &[1, 2, 3]).unwrap();
        let cache = CacheHandle::new(&CacheConfig::default(), Some(tier));
        assert!(cache.get_node_by_id(5).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn clearing_triples_keeps_nodes() {
        let tier: Arc<dyn SecondLevelCache> = Arc::new(MemoryTier::new());
        let cache = CacheHandle::new(&CacheConfig::default(), Some(tier.clone()));
        let t = triple(3);
        cache.put_node(&t.subject);
        cache.put_triple(&t);
        cache.clear_tier_triples();
        let fresh = CacheHandle::new(&CacheConfig::default(), Some(tier));
        assert!(fresh.get_triple_by_id(3).is_none());
        assert!(fresh.get_node_by_id(1).is_some());
    }
}
