//! Second-level cache tiers.
//!
//! A tier stores opaque externalized bytes. [`MemoryTier`] is a concurrent
//! in-process map that several stores may share through an `Arc`, standing
//! in for a replicated cache. [`DurableTier`] keeps entries in a redb file
//! with a time-to-live so they survive a restart.

use std::path::Path;
use std::time::Duration;

use dashmap::DashMap;
use redb::{Database, Durability, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::error::CacheError;
use crate::model::{now, to_millis};

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// A byte-level key/value cache.
pub trait SecondLevelCache: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> CacheResult<()>;

    fn remove(&self, key: &[u8]) -> CacheResult<()>;

    /// Remove every entry whose key starts with `prefix`.
    fn remove_prefix(&self, prefix: &[u8]) -> CacheResult<()>;

    fn clear(&self) -> CacheResult<()>;

    /// Number of entries, expired ones included.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// In-memory tier
// ---------------------------------------------------------------------------

/// Concurrent in-memory tier using a sharded hashmap.
#[derive(Debug, Default)]
pub struct MemoryTier {
    data: DashMap<Vec<u8>, Vec<u8>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecondLevelCache for MemoryTier {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.data.get(key).map(|v| v.value().clone()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> CacheResult<()> {
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> CacheResult<()> {
        self.data.remove(key);
        Ok(())
    }

    fn remove_prefix(&self, prefix: &[u8]) -> CacheResult<()> {
        self.data.retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }

    fn clear(&self) -> CacheResult<()> {
        self.data.clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

// ---------------------------------------------------------------------------
// Durable tier
// ---------------------------------------------------------------------------

/// Entries are `expiry millis (big endian) ++ payload`.
const CACHE_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kiwi_cache");

fn backend(what: &str, e: impl std::fmt::Display) -> CacheError {
    CacheError::Backend {
        message: format!("{what} failed: {e}"),
    }
}

/// redb-backed tier with a time-to-live per entry.
pub struct DurableTier {
    db: Database,
    ttl: Duration,
}

impl DurableTier {
    /// Open or create the tier file at `path`.
    pub fn open(path: &Path, ttl: Duration) -> CacheResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| backend("create_dir_all", e))?;
        }
        let db = Database::create(path)
            .map_err(|e| backend(&format!("open redb at {}", path.display()), e))?;
        let txn = db.begin_write().map_err(|e| backend("begin_write", e))?;
        txn.open_table(CACHE_TABLE)
            .map_err(|e| backend("open_table", e))?;
        txn.commit().map_err(|e| backend("commit", e))?;
        Ok(Self { db, ttl })
    }

    fn write<R>(
        &self,
        f: impl FnOnce(&mut redb::Table<'_, &'static [u8], &'static [u8]>) -> CacheResult<R>,
    ) -> CacheResult<R> {
        let mut txn = self.db.begin_write().map_err(|e| backend("begin_write", e))?;
        txn.set_durability(Durability::Eventual);
        let result = {
            let mut table = txn
                .open_table(CACHE_TABLE)
                .map_err(|e| backend("open_table", e))?;
            f(&mut table)?
        };
        txn.commit().map_err(|e| backend("commit", e))?;
        Ok(result)
    }
}

impl SecondLevelCache for DurableTier {
    fn name(&self) -> &str {
        "durable"
    }

    fn get(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(|e| backend("begin_read", e))?;
        let table = txn
            .open_table(CACHE_TABLE)
            .map_err(|e| backend("open_table", e))?;
        let Some(guard) = table.get(key).map_err(|e| backend("get", e))? else {
            return Ok(None);
        };
        let raw = guard.value();
        if raw.len() < 8 {
            return Err(CacheError::Decode {
                message: "durable entry shorter than its expiry header".into(),
            });
        }
        let (expiry, payload) = raw.split_at(8);
        let mut buf = [0u8; 8];
        buf.copy_from_slice(expiry);
        if i64::from_be_bytes(buf) <= to_millis(&now()) {
            return Ok(None);
        }
        Ok(Some(payload.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> CacheResult<()> {
        let ttl = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        let expiry = to_millis(&now()).saturating_add(ttl);
        let mut entry = Vec::with_capacity(8 + value.len());
        entry.extend_from_slice(&expiry.to_be_bytes());
        entry.extend_from_slice(value);
        self.write(|table| {
            table
                .insert(key, entry.as_slice())
                .map_err(|e| backend("insert", e))?;
            Ok(())
        })
    }

    fn remove(&self, key: &[u8]) -> CacheResult<()> {
        self.write(|table| {
            table.remove(key).map_err(|e| backend("remove", e))?;
            Ok(())
        })
    }

    fn remove_prefix(&self, prefix: &[u8]) -> CacheResult<()> {
        self.write(|table| {
            let mut doomed = Vec::new();
            for entry in table.range::<&[u8]>(prefix..).map_err(|e| backend("range", e))? {
                let (key, _) = entry.map_err(|e| backend("range", e))?;
                if !key.value().starts_with(prefix) {
                    break;
                }
                doomed.push(key.value().to_vec());
            }
            for key in doomed {
                table
                    .remove(key.as_slice())
                    .map_err(|e| backend("remove", e))?;
            }
            Ok(())
        })
    }

    fn clear(&self) -> CacheResult<()> {
        self.remove_prefix(&[])
    }

    fn len(&self) -> usize {
        let count = || -> CacheResult<u64> {
            let txn = self.db.begin_read().map_err(|e| backend("begin_read", e))?;
            let table = txn
                .open_table(CACHE_TABLE)
                .map_err(|e| backend("open_table", e))?;
            table.len().map_err(|e| backend("len", e))
        };
        count().map_or(0, |n| n as usize)
    }
}

impl std::fmt::Debug for DurableTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableTier").field("ttl", &self.ttl).finish()
    }
}
