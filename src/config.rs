//! Store configuration, persisted as TOML.
//!
//! Every field has a serde default so a config file only needs the values it
//! changes. A minimal file is just `database = "/var/lib/kiwi/store.db"`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::persistence::dialect::Dialect;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Which cache tiers sit in front of the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// No caching at all; every lookup goes to the database.
    None,
    /// Process-local LRU maps only.
    #[default]
    Local,
    /// Local LRU maps plus a shared in-process second tier.
    Memory,
    /// Local LRU maps plus a redb-backed second tier with TTL.
    Durable,
}

/// Cache sizing and backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    /// Nodes by numeric id.
    #[serde(default = "default_node_cache_size")]
    pub node_cache_size: usize,
    /// Triples by id and by (s, p, o, c) key.
    #[serde(default = "default_triple_cache_size")]
    pub triple_cache_size: usize,
    #[serde(default = "default_uri_cache_size")]
    pub uri_cache_size: usize,
    #[serde(default = "default_bnode_cache_size")]
    pub bnode_cache_size: usize,
    #[serde(default = "default_literal_cache_size")]
    pub literal_cache_size: usize,
    /// Location of the redb file for the durable tier. Defaults to the
    /// database path with a `.cache.redb` extension.
    #[serde(default)]
    pub durable_path: Option<PathBuf>,
    /// Time-to-live of second-tier entries in seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_node_cache_size() -> usize {
    100_000
}
fn default_triple_cache_size() -> usize {
    100_000
}
fn default_uri_cache_size() -> usize {
    50_000
}
fn default_bnode_cache_size() -> usize {
    10_000
}
fn default_literal_cache_size() -> usize {
    50_000
}
fn default_ttl_secs() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            node_cache_size: default_node_cache_size(),
            triple_cache_size: default_triple_cache_size(),
            uri_cache_size: default_uri_cache_size(),
            bnode_cache_size: default_bnode_cache_size(),
            literal_cache_size: default_literal_cache_size(),
            durable_path: None,
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl CacheConfig {
    /// A configuration with caching switched off.
    pub fn disabled() -> Self {
        Self {
            backend: CacheBackend::None,
            ..Default::default()
        }
    }
}

/// Configuration of one triple store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store name, used in log output.
    #[serde(default = "default_name")]
    pub name: String,
    /// Path of the database file.
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default)]
    pub dialect: Dialect,
    /// Upper bound of rows per batched insert statement.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Rows fetched per page by pattern queries on cursor-capable dialects.
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
    /// Number of ids reserved per round trip to the sequence table.
    #[serde(default = "default_id_block_size")]
    pub id_block_size: u64,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Log every executed statement at trace level.
    #[serde(default)]
    pub query_logging: bool,
    /// Context given to statements added without one.
    #[serde(default)]
    pub default_context: Option<String>,
    /// Context given to inferred statements added without one.
    #[serde(default)]
    pub inferred_context: Option<String>,
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_name() -> String {
    "kiwi".into()
}
fn default_database() -> PathBuf {
    PathBuf::from("kiwi.db")
}
fn default_batch_size() -> usize {
    1000
}
fn default_fetch_size() -> usize {
    200
}
fn default_id_block_size() -> u64 {
    100
}
fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            database: default_database(),
            dialect: Dialect::default(),
            batch_size: default_batch_size(),
            fetch_size: default_fetch_size(),
            id_block_size: default_id_block_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            query_logging: false,
            default_context: None,
            inferred_context: None,
            cache: CacheConfig::default(),
        }
    }
}

impl StoreConfig {
    /// A SQLite store at `path` with all other fields defaulted.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            database: path.into(),
            ..Default::default()
        }
    }

    /// Replace the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Path of the durable cache tier file.
    pub fn durable_cache_path(&self) -> PathBuf {
        self.cache
            .durable_path
            .clone()
            .unwrap_or_else(|| self.database.with_extension("cache.redb"))
    }

    /// Check field ranges and context IRIs.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                message: "batch_size must be > 0".into(),
            });
        }
        if self.fetch_size == 0 {
            return Err(ConfigError::Invalid {
                message: "fetch_size must be > 0".into(),
            });
        }
        if self.id_block_size == 0 {
            return Err(ConfigError::Invalid {
                message: "id_block_size must be > 0".into(),
            });
        }
        for ctx in [&self.default_context, &self.inferred_context]
            .into_iter()
            .flatten()
        {
            oxiri::Iri::parse(ctx.as_str()).map_err(|e| ConfigError::Invalid {
                message: format!("context <{ctx}> is not a valid IRI: {e}"),
            })?;
        }
        Ok(())
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Parse from TOML text.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".into(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }
}
