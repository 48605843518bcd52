//! Namespace prefixes stored with the data.
//!
//! Prefix changes are written immediately, outside of any connection
//! transaction. Lookups are served from a concurrent map that is filled on
//! first use.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::error::KiwiResult;
use crate::ids::IdService;
use crate::model::{Term, now};
use crate::persistence::DbConnection;

/// A prefix bound to a namespace URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Namespace {
    pub id: i64,
    pub prefix: String,
    pub uri: String,
    pub created: DateTime<Utc>,
}

/// Store-wide prefix table.
pub struct NamespaceRegistry {
    db: Mutex<DbConnection>,
    ids: Arc<IdService>,
    cache: DashMap<String, Namespace>,
}

impl NamespaceRegistry {
    pub(crate) fn new(db: DbConnection, ids: Arc<IdService>) -> Self {
        Self {
            db: Mutex::new(db),
            ids,
            cache: DashMap::new(),
        }
    }

    /// Bind `prefix` to `uri`, replacing an existing binding.
    pub fn set(&self, prefix: &str, uri: &str) -> KiwiResult<Namespace> {
        Term::checked_uri(uri)?;
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let ns = match db.load_namespace(prefix)? {
            Some(mut existing) => {
                db.update_namespace(prefix, uri)?;
                existing.uri = uri.to_string();
                existing
            }
            None => {
                let ns = Namespace {
                    id: self.ids.next_namespace_id()?,
                    prefix: prefix.to_string(),
                    uri: uri.to_string(),
                    created: now(),
                };
                db.store_namespace(&ns)?;
                ns
            }
        };
        tracing::debug!(prefix, uri, "namespace bound");
        self.cache.insert(prefix.to_string(), ns.clone());
        Ok(ns)
    }

    pub fn get(&self, prefix: &str) -> KiwiResult<Option<Namespace>> {
        if let Some(ns) = self.cache.get(prefix) {
            return Ok(Some(ns.clone()));
        }
        let loaded = self
            .db
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .load_namespace(prefix)?;
        if let Some(ns) = &loaded {
            self.cache.insert(prefix.to_string(), ns.clone());
        }
        Ok(loaded)
    }

    /// All bindings, ordered by prefix.
    pub fn list(&self) -> KiwiResult<Vec<Namespace>> {
        let all = self
            .db
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .load_namespaces()?;
        for ns in &all {
            self.cache.insert(ns.prefix.clone(), ns.clone());
        }
        Ok(all)
    }

    /// Remove a binding. Returns whether it existed.
    pub fn remove(&self, prefix: &str) -> KiwiResult<bool> {
        let removed = self
            .db
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .delete_namespace(prefix)?;
        self.cache.remove(prefix);
        Ok(removed)
    }

    /// Expand `prefix:local` to a full URI, if the prefix is bound.
    pub fn expand(&self, curie: &str) -> KiwiResult<Option<String>> {
        let Some((prefix, local)) = curie.split_once(':') else {
            return Ok(None);
        };
        Ok(self.get(prefix)?.map(|ns| format!("{}{local}", ns.uri)))
    }

    /// Shorten `uri` with the longest matching namespace.
    pub fn compact(&self, uri: &str) -> KiwiResult<Option<String>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|ns| uri.starts_with(&ns.uri))
            .max_by_key(|ns| ns.uri.len())
            .map(|ns| format!("{}:{}", ns.prefix, &uri[ns.uri.len()..])))
    }
}

impl std::fmt::Debug for NamespaceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceRegistry")
            .field("cached", &self.cache.len())
            .finish()
    }
}
