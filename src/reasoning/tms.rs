//! Justification index: support tracking and retraction cascades.
//!
//! Every inferred triple may have several justifications (alternative
//! derivations). When supporting triples are removed, the index:
//!
//! 1. Drops every justification that used a removed triple
//! 2. Reports triples left without any justification as unsupported
//! 3. Treats unsupported triples as removed in turn and cascades
//!
//! The index works on triple and justification ids so it can be rebuilt from
//! the `reasoner_justifications` tables without loading any nodes.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::persistence::db::JustificationRow;

/// Result of a retraction cascade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Retraction {
    /// Ids of justifications that no longer hold.
    pub removed_justifications: Vec<i64>,
    /// Ids of triples that lost their last justification.
    pub unsupported: Vec<i64>,
    /// Longest chain of cascaded retractions.
    pub cascade_depth: usize,
}

impl Retraction {
    pub fn is_empty(&self) -> bool {
        self.removed_justifications.is_empty() && self.unsupported.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    triple: i64,
    supporting: Vec<i64>,
}

/// In-memory index of justifications by justified and by supporting triple.
#[derive(Debug, Clone, Default)]
pub struct JustificationIndex {
    entries: HashMap<i64, Entry>,
    /// Justified triple -> ids of its justifications.
    by_triple: HashMap<i64, HashSet<i64>>,
    /// Supporting triple -> ids of the justifications it takes part in.
    dependents: HashMap<i64, HashSet<i64>>,
}

impl JustificationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = JustificationRow>) -> Self {
        let mut index = Self::new();
        for row in rows {
            index.add(row);
        }
        index
    }

    /// Index a justification. Re-adding an id replaces the earlier entry.
    pub fn add(&mut self, row: JustificationRow) {
        self.unlink(row.id);
        for &s in &row.supporting {
            self.dependents.entry(s).or_default().insert(row.id);
        }
        self.by_triple.entry(row.triple).or_default().insert(row.id);
        self.entries.insert(
            row.id,
            Entry {
                triple: row.triple,
                supporting: row.supporting,
            },
        );
    }

    /// Ids of the justifications of `triple`, ascending.
    pub fn justifications_for(&self, triple: i64) -> Vec<i64> {
        sorted(self.by_triple.get(&triple))
    }

    /// Ids of the justifications `triple` takes part in as a support, ascending.
    pub fn supported_by(&self, triple: i64) -> Vec<i64> {
        sorted(self.dependents.get(&triple))
    }

    /// Supporting triple ids of one justification.
    pub fn supports(&self, justification: i64) -> Option<&[i64]> {
        self.entries.get(&justification).map(|e| e.supporting.as_slice())
    }

    pub fn is_justified(&self, triple: i64) -> bool {
        self.by_triple.get(&triple).is_some_and(|j| !j.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove a justification from every map.
    fn unlink(&mut self, id: i64) -> Option<Entry> {
        let entry = self.entries.remove(&id)?;
        for s in &entry.supporting {
            if let Some(deps) = self.dependents.get_mut(s) {
                deps.remove(&id);
                if deps.is_empty() {
                    self.dependents.remove(s);
                }
            }
        }
        if let Some(js) = self.by_triple.get_mut(&entry.triple) {
            js.remove(&id);
            if js.is_empty() {
                self.by_triple.remove(&entry.triple);
            }
        }
        Some(entry)
    }

    /// Retract `removed` triples and cascade through everything that
    /// depended on them.
    ///
    /// The removed triples lose their own justifications too. A triple that
    /// still has another justification survives; one that has none left is
    /// reported as unsupported and retracted in turn.
    pub fn retract(&mut self, removed: &[i64]) -> Retraction {
        let mut result = Retraction::default();
        let mut queue: VecDeque<(i64, usize)> = VecDeque::new();
        let mut visited = HashSet::new();
        for &id in removed {
            if visited.insert(id) {
                queue.push_back((id, 0));
            }
        }

        while let Some((current, depth)) = queue.pop_front() {
            result.cascade_depth = result.cascade_depth.max(depth);

            for j in self.by_triple.get(&current).cloned().unwrap_or_default() {
                if self.unlink(j).is_some() {
                    result.removed_justifications.push(j);
                }
            }

            let dependents = self.dependents.get(&current).cloned().unwrap_or_default();
            for j in dependents {
                let Some(entry) = self.unlink(j) else { continue };
                result.removed_justifications.push(j);
                if !self.is_justified(entry.triple) && visited.insert(entry.triple) {
                    result.unsupported.push(entry.triple);
                    queue.push_back((entry.triple, depth + 1));
                }
            }
        }

        result.removed_justifications.sort_unstable();
        result.unsupported.sort_unstable();
        result
    }
}

fn sorted(ids: Option<&HashSet<i64>>) -> Vec<i64> {
    let mut out: Vec<i64> = ids.map(|s| s.iter().copied().collect()).unwrap_or_default();
    out.sort_unstable();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, triple: i64, supporting: &[i64]) -> JustificationRow {
        JustificationRow {
            id,
            triple,
            supporting: supporting.to_vec(),
        }
    }

    #[test]
    fn lookups_in_both_directions() {
        let index = JustificationIndex::from_rows([row(1, 10, &[1, 2]), row(2, 10, &[3]), row(3, 11, &[2])]);
        assert_eq!(index.justifications_for(10), vec![1, 2]);
        assert_eq!(index.supported_by(2), vec![1, 3]);
        assert_eq!(index.supports(2), Some(&[3][..]));
        assert!(index.is_justified(11));
        assert!(!index.is_justified(1));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn alternative_justification_keeps_triple() {
        let mut index = JustificationIndex::from_rows([row(1, 10, &[1, 2]), row(2, 10, &[3])]);
        let r = index.retract(&[1]);
        assert_eq!(r.removed_justifications, vec![1]);
        assert!(r.unsupported.is_empty());
        assert_eq!(index.justifications_for(10), vec![2]);
    }

    #[test]
    fn retraction_cascades_through_inferences() {
        // 1 -> 10 -> 20 -> 30, and 20 also needs 2.
        let mut index = JustificationIndex::from_rows([
            row(1, 10, &[1]),
            row(2, 20, &[10, 2]),
            row(3, 30, &[20]),
        ]);
        let r = index.retract(&[1]);
        assert_eq!(r.removed_justifications, vec![1, 2, 3]);
        assert_eq!(r.unsupported, vec![10, 20, 30]);
        assert_eq!(r.cascade_depth, 3);
        assert!(index.is_empty());
        assert!(index.supported_by(2).is_empty());
    }

    #[test]
    fn removing_an_inferred_triple_drops_its_justifications() {
        let mut index = JustificationIndex::from_rows([row(1, 10, &[1]), row(2, 11, &[10])]);
        let r = index.retract(&[10]);
        assert_eq!(r.removed_justifications, vec![1, 2]);
        assert_eq!(r.unsupported, vec![11]);
    }

    #[test]
    fn unknown_triples_retract_nothing() {
        let mut index = JustificationIndex::from_rows([row(1, 10, &[1])]);
        assert!(index.retract(&[99]).is_empty());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn readding_replaces_entry() {
        let mut index = JustificationIndex::new();
        index.add(row(1, 10, &[1]));
        index.add(row(1, 10, &[2]));
        assert!(index.supported_by(1).is_empty());
        assert_eq!(index.supported_by(2), vec![1]);
    }
}
