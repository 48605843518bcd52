//! Node model: RDF terms, stored nodes and triples.
//!
//! - [`Term`]: transient term values as callers write them
//! - [`Node`] / [`NodeRef`]: terms with a storage id, shared by `Arc`
//! - [`Triple`]: statements with soft-delete state and provenance flags
//!
//! Timestamps are kept at millisecond resolution so they survive a round trip
//! through every supported database unchanged.

pub mod node;
pub mod term;
pub mod triple;
pub mod vocab;

use chrono::{DateTime, TimeZone, Utc};

pub use node::{Node, NodeKind, NodeRef, NodeType};
pub use term::Term;
pub use triple::{Triple, TripleKey, TripleState};

/// The current time, truncated to milliseconds.
pub fn now() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

/// Milliseconds since the UNIX epoch.
pub fn to_millis(t: &DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
