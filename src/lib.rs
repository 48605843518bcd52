// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # kiwi-store
//!
//! The core of a relational-backed RDF triple store: node interning, a
//! two-level node/triple cache, transactional change sets and SQL dialects.
//!
//! ## Architecture
//!
//! - **Node model** (`model`): terms, stored nodes and soft-deletable triples
//! - **ID service** (`ids`): block-allocated ids from persisted sequences
//! - **Cache** (`cache`): local LRU maps plus an optional second tier
//! - **Persistence** (`persistence`): named SQL per dialect, SQLite execution
//! - **Connections** (`connection`): buffered unit of work with read-your-writes
//! - **Transactions** (`transaction`): change sets handed to listeners
//! - **Reasoning support** (`reasoning`): justifications and retraction
//!
//! ## Library usage
//!
//! ```no_run
//! use kiwi_store::config::StoreConfig;
//! use kiwi_store::connection::{TripleConnection, TriplePattern};
//! use kiwi_store::model::Term;
//! use kiwi_store::store::TripleStore;
//!
//! let store = TripleStore::open(StoreConfig::sqlite("kiwi.db")).unwrap();
//! let mut conn = store.connection().unwrap();
//! conn.begin().unwrap();
//! conn.add_statement(
//!     &Term::uri("http://example.org/alice"),
//!     &Term::uri("http://xmlns.com/foaf/0.1/name"),
//!     &Term::literal("Alice"),
//!     None,
//! )
//! .unwrap();
//! conn.commit().unwrap();
//! let names = conn
//!     .get_statements(&TriplePattern::any().subject(Term::uri("http://example.org/alice")))
//!     .unwrap()
//!     .count();
//! assert_eq!(names, 1);
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod ids;
pub mod model;
pub mod namespace;
pub mod persistence;
pub mod reasoning;
pub mod store;
pub mod transaction;
