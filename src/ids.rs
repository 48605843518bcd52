//! Node and triple identity.
//!
//! The [`IdService`] hands out strictly increasing 64-bit ids per
//! [`Sequence`]. Ids are reserved from a persistent [`SequenceSource`] in
//! blocks, so only one round trip to the database is needed per
//! `block_size` ids. The persisted sequence value is the high-water mark of
//! all reserved blocks; after a restart the next block starts above it, so
//! ids are never reused. Ids reserved by a transaction that later rolls back
//! are simply skipped.

use std::sync::{Arc, Mutex};

use crate::error::KiwiResult;

/// The independent id sequences of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    Nodes,
    Triples,
    Justifications,
    Namespaces,
}

impl Sequence {
    pub const ALL: [Sequence; 4] = [
        Sequence::Nodes,
        Sequence::Triples,
        Sequence::Justifications,
        Sequence::Namespaces,
    ];

    /// Row name in the `sequences` table.
    pub fn name(self) -> &'static str {
        match self {
            Sequence::Nodes => "seq.nodes",
            Sequence::Triples => "seq.triples",
            Sequence::Justifications => "seq.justifications",
            Sequence::Namespaces => "seq.namespaces",
        }
    }

    fn index(self) -> usize {
        match self {
            Sequence::Nodes => 0,
            Sequence::Triples => 1,
            Sequence::Justifications => 2,
            Sequence::Namespaces => 3,
        }
    }
}

/// Persistent backing of the id sequences.
pub trait SequenceSource: Send + Sync {
    /// Atomically reserve `count` consecutive ids and return the first one.
    ///
    /// Fails with `StorageUnavailable` when the sequence cannot be read or
    /// advanced; callers must not invent an id in that case.
    fn reserve(&self, sequence: Sequence, count: u64) -> KiwiResult<i64>;
}

/// Ids left in the current reservation: `next..end`.
#[derive(Debug, Default)]
struct Block {
    next: i64,
    end: i64,
}

/// Thread-safe, block-allocating id generator.
///
/// Safe to share across connections via `Arc<IdService>`.
pub struct IdService {
    source: Arc<dyn SequenceSource>,
    block_size: u64,
    blocks: [Mutex<Block>; 4],
}

impl IdService {
    /// Create a service reserving `block_size` ids per round trip.
    pub fn new(source: Arc<dyn SequenceSource>, block_size: u64) -> Self {
        Self {
            source,
            block_size: block_size.max(1),
            blocks: Default::default(),
        }
    }

    /// Allocate the next id of `sequence`.
    pub fn next_id(&self, sequence: Sequence) -> KiwiResult<i64> {
        let mut block = self.blocks[sequence.index()]
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if block.next >= block.end {
            let first = self.source.reserve(sequence, self.block_size)?;
            block.next = first;
            block.end = first + self.block_size as i64;
            tracing::debug!(
                sequence = sequence.name(),
                first,
                size = self.block_size,
                "reserved id block"
            );
        }
        let id = block.next;
        block.next += 1;
        Ok(id)
    }

    pub fn next_node_id(&self) -> KiwiResult<i64> {
        self.next_id(Sequence::Nodes)
    }

    pub fn next_triple_id(&self) -> KiwiResult<i64> {
        self.next_id(Sequence::Triples)
    }

    pub fn next_justification_id(&self) -> KiwiResult<i64> {
        self.next_id(Sequence::Justifications)
    }

    pub fn next_namespace_id(&self) -> KiwiResult<i64> {
        self.next_id(Sequence::Namespaces)
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }
}

impl std::fmt::Debug for IdService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdService")
            .field("block_size", &self.block_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

    use super::*;
    use crate::error::{KiwiError, StoreError};

    /// High-water marks per sequence, like the `sequences` table.
    #[derive(Default)]
    struct MemorySource {
        values: [AtomicI64; 4],
        round_trips: AtomicUsize,
        down: AtomicBool,
    }

    impl SequenceSource for MemorySource {
        fn reserve(&self, sequence: Sequence, count: u64) -> KiwiResult<i64> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::StorageUnavailable {
                    message: "connection refused".into(),
                }
                .into());
            }
            self.round_trips.fetch_add(1, Ordering::SeqCst);
            let high = self.values[sequence.index()].fetch_add(count as i64, Ordering::SeqCst)
                + count as i64;
            Ok(high - count as i64 + 1)
        }
    }

    #[test]
    fn ids_are_sequential_within_a_block() {
        let source = Arc::new(MemorySource::default());
        let ids = IdService::new(source.clone(), 10);
        let issued: Vec<i64> = (0..25).map(|_| ids.next_node_id().unwrap()).collect();
        assert_eq!(issued, (1..=25).collect::<Vec<_>>());
        assert_eq!(source.round_trips.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn sequences_are_independent() {
        let ids = IdService::new(Arc::new(MemorySource::default()), 5);
        assert_eq!(ids.next_node_id().unwrap(), 1);
        assert_eq!(ids.next_triple_id().unwrap(), 1);
        assert_eq!(ids.next_node_id().unwrap(), 2);
    }

    #[test]
    fn restart_resumes_above_issued_ids() {
        let source = Arc::new(MemorySource::default());
        let max_before = {
            let ids = IdService::new(source.clone(), 100);
            (0..7).map(|_| ids.next_triple_id().unwrap()).max().unwrap()
        };
        let ids = IdService::new(source, 100);
        let after = ids.next_triple_id().unwrap();
        assert!(after > max_before, "{after} should be > {max_before}");
    }

    #[test]
    fn concurrent_allocation_is_unique() {
        let ids = Arc::new(IdService::new(Arc::new(MemorySource::default()), 3));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || {
                    (0..200).map(|_| ids.next_node_id().unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(all.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(all.len(), 1600);
    }

    #[test]
    fn unavailable_source_fails_without_fabricating() {
        let source = Arc::new(MemorySource::default());
        source.down.store(true, Ordering::SeqCst);
        let ids = IdService::new(source.clone(), 10);
        let err = ids.next_node_id().unwrap_err();
        assert!(matches!(
            err,
            KiwiError::Store(StoreError::StorageUnavailable { .. })
        ));

        source.down.store(false, Ordering::SeqCst);
        assert_eq!(ids.next_node_id().unwrap(), 1);
    }
}
