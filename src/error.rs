//! Rich diagnostic error types for the KiWi storage engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. Persistence errors propagate through the
//! connection API unchanged in kind; cache errors never leave the cache layer.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the storage engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum KiwiError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Dialect(#[from] DialectError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),
}

impl KiwiError {
    /// Whether the whole transaction may be retried from `begin()`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KiwiError::Store(StoreError::StorageUnavailable { .. })
                | KiwiError::Transaction(TransactionError::CommitFailed { .. })
        )
    }

    /// Whether this error signals API misuse rather than a runtime failure.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            KiwiError::Transaction(TransactionError::InvalidState { .. })
        )
    }
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("no driver for dialect {dialect} is linked into this build (wanted {driver})")]
    #[diagnostic(
        code(kiwi::store::driver_unavailable),
        help(
            "Only the embedded SQLite driver is compiled in. SQL for other dialects \
             can be generated (see `kiwi schema --dialect`), but a store cannot be \
             opened against them. Set `dialect = \"sqlite\"` in the store config."
        )
    )]
    DriverUnavailable { dialect: String, driver: String },

    #[error("storage unavailable: {message}")]
    #[diagnostic(
        code(kiwi::store::unavailable),
        help(
            "The database could not be reached or is busy. Roll back and retry \
             the whole transaction from begin()."
        )
    )]
    StorageUnavailable { message: String },

    #[error("SQL error in `{statement}`: {message}")]
    #[diagnostic(
        code(kiwi::store::sql),
        help("A statement failed to execute. Check the schema version of the database.")
    )]
    Sql { statement: String, message: String },

    #[error("I/O error: {source}")]
    #[diagnostic(
        code(kiwi::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("node {id} is referenced but not stored")]
    #[diagnostic(
        code(kiwi::store::missing_node),
        help(
            "A triple references a node row that does not exist. The database is \
             inconsistent; restore from a backup or re-import the affected data."
        )
    )]
    MissingNode { id: i64 },

    #[error("corrupt row: {message}")]
    #[diagnostic(
        code(kiwi::store::corrupt_row),
        help("A stored row could not be mapped back to a node or triple.")
    )]
    CorruptRow { message: String },

    #[error("schema error: {message}")]
    #[diagnostic(
        code(kiwi::store::schema),
        help("The database schema could not be created or has an unexpected version.")
    )]
    Schema { message: String },
}

// ---------------------------------------------------------------------------
// Dialect errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum DialectError {
    #[error("{feature} is not supported by the {dialect} dialect")]
    #[diagnostic(
        code(kiwi::dialect::unsupported),
        help(
            "Check the dialect capability flags before pushing this feature into \
             SQL and evaluate it in memory instead."
        )
    )]
    UnsupportedFeature { dialect: String, feature: String },

    #[error("unknown dialect: {name}")]
    #[diagnostic(
        code(kiwi::dialect::unknown),
        help("Valid dialects are: postgresql, mysql, h2, sqlite.")
    )]
    UnknownDialect { name: String },

    #[error("unknown native function: {name}")]
    #[diagnostic(
        code(kiwi::dialect::unknown_function),
        help("The function is not registered in the FunctionRegistry.")
    )]
    UnknownFunction { name: String },

    #[error("function {function} takes {expected} argument(s), got {actual}")]
    #[diagnostic(code(kiwi::dialect::arity))]
    Arity {
        function: String,
        expected: String,
        actual: usize,
    },
}

// ---------------------------------------------------------------------------
// Transaction errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum TransactionError {
    #[error("commit failed: {message}")]
    #[diagnostic(
        code(kiwi::tx::commit_failed),
        help(
            "Nothing from this transaction was persisted. Roll back or close the \
             connection, then retry from begin()."
        )
    )]
    CommitFailed {
        message: String,
        #[source]
        source: StoreError,
    },

    #[error("cannot {operation} while the connection is {state}")]
    #[diagnostic(
        code(kiwi::tx::invalid_state),
        help(
            "Writes and commit() need an active transaction started with begin(); \
             begin() may not be called twice, and a failed commit must be rolled back."
        )
    )]
    InvalidState { operation: String, state: String },
}

// ---------------------------------------------------------------------------
// Cache errors (never escape the cache layer)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CacheError {
    #[error("cannot decode cached entry: {message}")]
    #[diagnostic(
        code(kiwi::cache::decode),
        help("The cached payload is corrupt or from another format version; it is treated as a miss.")
    )]
    Decode { message: String },

    #[error("cannot encode cache entry: {message}")]
    #[diagnostic(code(kiwi::cache::encode))]
    Encode { message: String },

    #[error("cache backend error: {message}")]
    #[diagnostic(
        code(kiwi::cache::backend),
        help("The second-level cache tier failed; lookups fall through to the database.")
    )]
    Backend { message: String },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read store config: {path}")]
    #[diagnostic(
        code(kiwi::config::read),
        help("Ensure the config file exists and is valid TOML.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse store config {path}: {message}")]
    #[diagnostic(
        code(kiwi::config::parse),
        help("Check the TOML syntax and the field names of the store config.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write store config: {path}")]
    #[diagnostic(
        code(kiwi::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(kiwi::config::invalid), help("Check the StoreConfig fields. {message}"))]
    Invalid { message: String },
}

// ---------------------------------------------------------------------------
// Model errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ModelError {
    #[error("invalid IRI <{iri}>: {message}")]
    #[diagnostic(
        code(kiwi::model::invalid_iri),
        help("URI resources must be absolute IRIs, e.g. <http://example.org/resource>.")
    )]
    InvalidIri { iri: String, message: String },

    #[error("cannot parse term `{input}`: {message}")]
    #[diagnostic(
        code(kiwi::model::invalid_term),
        help(
            "Terms use N-Triples syntax: <http://...>, _:label, \"text\", \
             \"text\"@en or \"5\"^^<http://www.w3.org/2001/XMLSchema#integer>."
        )
    )]
    InvalidTerm { input: String, message: String },

    #[error("invalid statement: {message}")]
    #[diagnostic(
        code(kiwi::model::invalid_statement),
        help("Subjects and contexts must be resources, predicates must be URIs.")
    )]
    InvalidStatement { message: String },
}

/// Convenience alias for functions returning engine results.
pub type KiwiResult<T> = std::result::Result<T, KiwiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_converts_to_kiwi_error() {
        let err = StoreError::StorageUnavailable {
            message: "database is locked".into(),
        };
        let kiwi: KiwiError = err.into();
        assert!(matches!(
            kiwi,
            KiwiError::Store(StoreError::StorageUnavailable { .. })
        ));
        assert!(kiwi.is_retryable());
    }

    #[test]
    fn commit_failed_is_retryable_and_keeps_source() {
        let err: KiwiError = TransactionError::CommitFailed {
            message: "flush aborted".into(),
            source: StoreError::Sql {
                statement: "store.triple".into(),
                message: "constraint failed".into(),
            },
        }
        .into();
        assert!(err.is_retryable());
        let source = std::error::Error::source(&err).map(|e| e.to_string());
        assert_eq!(
            source.as_deref(),
            Some("SQL error in `store.triple`: constraint failed")
        );
    }

    #[test]
    fn invalid_state_is_a_programming_error() {
        let err: KiwiError = TransactionError::InvalidState {
            operation: "commit".into(),
            state: "opened".into(),
        }
        .into();
        assert!(err.is_programming_error());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "cannot commit while the connection is opened");
    }

    #[test]
    fn dialect_error_display_names_feature() {
        let err = DialectError::UnsupportedFeature {
            dialect: "mysql".into(),
            feature: "regex flag 'm'".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("mysql"));
        assert!(msg.contains("regex flag 'm'"));
    }
}
