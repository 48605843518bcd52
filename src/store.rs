//! The store handle: shared state behind every connection.
//!
//! A [`TripleStore`] owns the cache, the ID service, the listener list and
//! the namespace table. It is cheap to clone and safe to share between
//! threads; each thread opens its own [`StoreConnection`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::cache::{CacheHandle, DurableTier, MemoryTier, SecondLevelCache};
use crate::config::{CacheBackend, StoreConfig};
use crate::connection::StoreConnection;
use crate::error::{KiwiResult, StoreError};
use crate::ids::IdService;
use crate::namespace::NamespaceRegistry;
use crate::persistence::{Dialect, Persistence, SqlSequences};
use crate::reasoning::{JustificationIndex, RetractionListener};
use crate::transaction::{ListenerRegistry, TransactionListener};

pub(crate) struct StoreShared {
    config: Arc<StoreConfig>,
    persistence: Persistence,
    cache: CacheHandle,
    ids: Arc<IdService>,
    listeners: ListenerRegistry,
    namespaces: NamespaceRegistry,
    closed: AtomicBool,
}

/// Handle to an open triple store.
#[derive(Clone)]
pub struct TripleStore {
    shared: Arc<StoreShared>,
}

impl TripleStore {
    /// Open the configured store, creating the schema if needed.
    pub fn open(config: StoreConfig) -> KiwiResult<Self> {
        let tier: Option<Arc<dyn SecondLevelCache>> = match config.cache.backend {
            CacheBackend::Memory => Some(Arc::new(MemoryTier::new())),
            CacheBackend::Durable => {
                let ttl = Duration::from_secs(config.cache.ttl_secs);
                Some(Arc::new(DurableTier::open(&config.durable_cache_path(), ttl)?))
            }
            CacheBackend::None | CacheBackend::Local => None,
        };
        Self::build(config, tier)
    }

    /// Open with a caller-provided second cache tier, for instance one
    /// [`MemoryTier`] shared by several stores.
    pub fn open_with_cache_tier(
        config: StoreConfig,
        tier: Arc<dyn SecondLevelCache>,
    ) -> KiwiResult<Self> {
        Self::build(config, Some(tier))
    }

    fn build(config: StoreConfig, tier: Option<Arc<dyn SecondLevelCache>>) -> KiwiResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let persistence = Persistence::new(Arc::clone(&config))?;
        persistence.init_schema()?;

        let ids = Arc::new(IdService::new(
            Arc::new(SqlSequences::new(persistence.connect()?)),
            config.id_block_size,
        ));
        let cache = CacheHandle::new(&config.cache, tier);
        // Triple states may have changed while the process was down.
        cache.clear_tier_triples();
        let namespaces = NamespaceRegistry::new(persistence.connect()?, Arc::clone(&ids));

        tracing::info!(
            name = %config.name,
            database = %config.database.display(),
            dialect = %config.dialect,
            cache = ?config.cache.backend,
            "opened triple store"
        );

        Ok(Self {
            shared: Arc::new(StoreShared {
                config,
                persistence,
                cache,
                ids,
                listeners: ListenerRegistry::new(),
                namespaces,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Open a new connection.
    pub fn connection(&self) -> KiwiResult<StoreConnection> {
        if self.is_closed() {
            return Err(StoreError::StorageUnavailable {
                message: format!("store {} is closed", self.shared.config.name),
            }
            .into());
        }
        let db = self.shared.persistence.connect()?;
        Ok(StoreConnection::new(self.clone(), db))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    pub fn dialect(&self) -> Dialect {
        self.shared.persistence.dialect()
    }

    pub fn cache(&self) -> &CacheHandle {
        &self.shared.cache
    }

    pub fn ids(&self) -> &IdService {
        &self.shared.ids
    }

    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.shared.namespaces
    }

    pub(crate) fn persistence(&self) -> &Persistence {
        &self.shared.persistence
    }

    pub(crate) fn listeners(&self) -> &ListenerRegistry {
        &self.shared.listeners
    }

    /// Register a listener; listeners run in registration order.
    pub fn add_listener(&self, listener: Arc<dyn TransactionListener>) {
        self.shared.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn TransactionListener>) -> bool {
        self.shared.listeners.remove(listener)
    }

    /// Register a [`RetractionListener`] seeded with the stored justifications.
    pub fn enable_retraction(&self) -> KiwiResult<Arc<RetractionListener>> {
        let rows = self.shared.persistence.connect()?.load_justifications()?;
        let index = JustificationIndex::from_rows(rows);
        tracing::debug!(justifications = index.len(), "loaded justification index");
        let listener = Arc::new(RetractionListener::new(self.downgrade(), index));
        self.add_listener(listener.clone());
        Ok(listener)
    }

    pub(crate) fn downgrade(&self) -> Weak<StoreShared> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn upgrade(weak: &Weak<StoreShared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Refuse new connections and drop the process-local cache. Open
    /// connections keep working until they are closed.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.cache.clear_local();
        tracing::info!(name = %self.shared.config.name, "closed triple store");
    }
}

impl std::fmt::Debug for TripleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TripleStore")
            .field("name", &self.shared.config.name)
            .field("dialect", &self.shared.config.dialect)
            .field("closed", &self.is_closed())
            .finish()
    }
}
