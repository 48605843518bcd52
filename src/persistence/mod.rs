//! Relational persistence.
//!
//! - [`dialect`]: SQL capability surface of each supported database
//! - [`statements`]: named statements and schema scripts
//! - [`query`]: pattern to SQL planning with in-memory residual filters
//! - [`functions`]: native function push-down
//! - [`db`]: the executable SQLite connection
//!
//! SQL can be generated for every [`Dialect`]; only the embedded SQLite
//! driver is linked, so [`Persistence::new`] refuses other dialects with
//! `DriverUnavailable`.

pub mod db;
pub mod dialect;
pub mod functions;
pub mod query;
pub mod statements;

use std::sync::{Arc, Mutex};

use rusqlite::ErrorCode;

use crate::config::StoreConfig;
use crate::error::{KiwiResult, StoreError};
use crate::ids::{Sequence, SequenceSource};

pub use db::DbConnection;
pub use dialect::Dialect;
pub use query::{ObjectFilter, QueryPlan, SqlValue};
pub use statements::Statements;

/// Result type for persistence operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Map a driver error to the store taxonomy.
///
/// Busy, locked, unreachable and I/O failures are `StorageUnavailable` so the
/// caller can retry; everything else is an SQL error naming the statement.
pub(crate) fn classify(statement: &str, err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        if matches!(
            failure.code,
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::FileLockingProtocolFailed
        ) {
            return StoreError::StorageUnavailable {
                message: format!("{statement}: {err}"),
            };
        }
    }
    StoreError::Sql {
        statement: statement.to_string(),
        message: err.to_string(),
    }
}

pub(crate) trait SqlResultExt<T> {
    /// Classify a driver error as failing in `statement`.
    fn at(self, statement: &str) -> StoreResult<T>;
}

impl<T> SqlResultExt<T> for rusqlite::Result<T> {
    fn at(self, statement: &str) -> StoreResult<T> {
        self.map_err(|e| classify(statement, e))
    }
}

/// Connection factory for one configured database.
#[derive(Debug, Clone)]
pub struct Persistence {
    config: Arc<StoreConfig>,
    statements: Arc<Statements>,
}

impl Persistence {
    /// Check that the configured dialect can be executed.
    pub fn new(config: Arc<StoreConfig>) -> StoreResult<Self> {
        let dialect = config.dialect;
        if !dialect.is_driver_linked() {
            return Err(StoreError::DriverUnavailable {
                dialect: dialect.name().to_string(),
                driver: dialect.driver_name().to_string(),
            });
        }
        Ok(Self {
            statements: Arc::new(Statements::for_dialect(dialect)),
            config,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn statements(&self) -> &Arc<Statements> {
        &self.statements
    }

    /// Open and validate a fresh database connection.
    pub fn connect(&self) -> StoreResult<DbConnection> {
        DbConnection::open(&self.config, Arc::clone(&self.statements))
    }

    /// Create tables, indexes, metadata and sequence rows if missing.
    pub fn init_schema(&self) -> StoreResult<()> {
        self.connect()?.create_schema()
    }
}

/// [`SequenceSource`] backed by the `sequences` table.
///
/// Uses a dedicated connection so that reserving a block never runs inside a
/// caller's transaction.
pub struct SqlSequences {
    db: Mutex<DbConnection>,
}

impl SqlSequences {
    pub fn new(db: DbConnection) -> Self {
        Self { db: Mutex::new(db) }
    }
}

impl SequenceSource for SqlSequences {
    fn reserve(&self, sequence: Sequence, count: u64) -> KiwiResult<i64> {
        let mut db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        db.reserve_ids(sequence.name(), count).map_err(|e| match e {
            unavailable @ StoreError::StorageUnavailable { .. } => unavailable.into(),
            other => StoreError::StorageUnavailable {
                message: format!("cannot reserve ids from {}: {other}", sequence.name()),
            }
            .into(),
        })
    }
}

impl std::fmt::Debug for SqlSequences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlSequences").finish()
    }
}
