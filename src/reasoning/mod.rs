//! Reasoning support: justifications of inferred triples.
//!
//! A [`Justification`] links an inferred triple to the base triples it was
//! derived from. The [`tms::JustificationIndex`] tracks which justifications
//! depend on which triples, and the [`listener::RetractionListener`] uses it
//! to remove inferred triples once their last justification is gone.

pub mod listener;
pub mod tms;

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::model::{Node, Triple};
use crate::persistence::db::JustificationRow;

pub use listener::RetractionListener;
pub use tms::{JustificationIndex, Retraction};

/// Why an inferred triple holds.
///
/// Equality and hashing look at the inferred triple and the set of
/// supporting triples only. The order in which supports were added and the
/// storage id do not matter.
#[derive(Debug, Clone)]
pub struct Justification {
    /// Storage id, [`Node::NO_ID`] until the justification is persisted.
    pub id: i64,
    pub triple: Triple,
    pub supporting: HashSet<Triple>,
}

impl Justification {
    pub fn new(triple: Triple) -> Self {
        Self {
            id: Node::NO_ID,
            triple,
            supporting: HashSet::new(),
        }
    }

    pub fn with_support(mut self, triple: Triple) -> Self {
        self.supporting.insert(triple);
        self
    }

    /// Add a supporting triple. Returns `false` if it was already present.
    pub fn add_support(&mut self, triple: Triple) -> bool {
        self.supporting.insert(triple)
    }

    pub fn depends_on(&self, triple: &Triple) -> bool {
        self.supporting.contains(triple)
    }

    /// The id form stored in the database.
    pub fn to_row(&self) -> JustificationRow {
        let mut supporting: Vec<i64> = self.supporting.iter().map(|t| t.id).collect();
        supporting.sort_unstable();
        JustificationRow {
            id: self.id,
            triple: self.triple.id,
            supporting,
        }
    }
}

impl PartialEq for Justification {
    fn eq(&self, other: &Self) -> bool {
        self.triple == other.triple && self.supporting == other.supporting
    }
}

impl Eq for Justification {}

impl Hash for Justification {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.triple.hash(state);
        // Wrapping sum of element hashes: independent of iteration order.
        let mut sum = 0u64;
        for t in &self.supporting {
            let mut h = DefaultHasher::new();
            t.hash(&mut h);
            sum = sum.wrapping_add(h.finish());
        }
        sum.hash(state);
        self.supporting.len().hash(state);
    }
}

impl fmt::Display for Justification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <= {{", self.triple)?;
        let mut supports: Vec<String> = self.supporting.iter().map(|t| t.to_string()).collect();
        supports.sort();
        for (i, s) in supports.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(s)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{NodeRef, Term, now};

    fn uri(id: i64, u: &str) -> NodeRef {
        Arc::new(Node::from_term(id, now(), &Term::uri(u), None).unwrap())
    }

    fn triple(id: i64, s: &str, o: &str) -> Triple {
        Triple::new(id, uri(id * 10, s), uri(2, "http://ex.org/p"), uri(id * 10 + 1, o), None)
    }

    fn hash_of(j: &Justification) -> u64 {
        let mut h = DefaultHasher::new();
        j.hash(&mut h);
        h.finish()
    }

    #[test]
    fn support_order_does_not_matter() {
        let inferred = triple(1, "http://ex.org/a", "http://ex.org/c");
        let ab = triple(2, "http://ex.org/a", "http://ex.org/b");
        let bc = triple(3, "http://ex.org/b", "http://ex.org/c");

        let first = Justification::new(inferred.clone())
            .with_support(ab.clone())
            .with_support(bc.clone());
        let second = Justification::new(inferred)
            .with_support(bc)
            .with_support(ab);

        assert_eq!(first, second);
        assert_eq!(hash_of(&first), hash_of(&second));

        let set: HashSet<Justification> = [first, second].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn different_supports_differ() {
        let inferred = triple(1, "http://ex.org/a", "http://ex.org/c");
        let one = Justification::new(inferred.clone()).with_support(triple(2, "http://ex.org/x", "http://ex.org/y"));
        let other = Justification::new(inferred).with_support(triple(3, "http://ex.org/x", "http://ex.org/z"));
        assert_ne!(one, other);
    }

    #[test]
    fn ids_are_ignored_by_equality() {
        let mut a = Justification::new(triple(1, "http://ex.org/a", "http://ex.org/b"));
        let b = a.clone();
        a.id = 42;
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn rows_list_supports_by_id() {
        let mut j = Justification::new(triple(1, "http://ex.org/a", "http://ex.org/c"))
            .with_support(triple(7, "http://ex.org/b", "http://ex.org/c"))
            .with_support(triple(3, "http://ex.org/a", "http://ex.org/b"));
        j.id = 9;
        assert!(!j.add_support(triple(3, "http://ex.org/a", "http://ex.org/b")));
        let row = j.to_row();
        assert_eq!(row.id, 9);
        assert_eq!(row.triple, 1);
        assert_eq!(row.supporting, vec![3, 7]);
    }
}
