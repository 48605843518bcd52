//! Lazy pattern-match iteration.
//!
//! A [`TripleCursor`] first yields the connection's pending additions that
//! match, then pages through the database with keyset pagination on the
//! triple id. No statement stays open between pages, so dropping the cursor
//! at any point releases everything it holds.

use std::collections::{HashSet, VecDeque};

use crate::error::KiwiResult;
use crate::model::Triple;
use crate::persistence::db::TripleRow;
use crate::persistence::query::{CompiledFilter, QueryPlan};

use super::store::StoreConnection;

/// Iterator over the triples matching one pattern.
pub struct TripleCursor<'a> {
    conn: &'a StoreConnection,
    pending: std::vec::IntoIter<Triple>,
    plan: QueryPlan,
    residual: Option<CompiledFilter>,
    /// Row ids superseded by pending changes of the connection.
    hidden: HashSet<i64>,
    page: VecDeque<TripleRow>,
    last_id: i64,
    exhausted: bool,
}

impl<'a> TripleCursor<'a> {
    pub(crate) fn new(
        conn: &'a StoreConnection,
        pending: Vec<Triple>,
        plan: QueryPlan,
        hidden: HashSet<i64>,
    ) -> KiwiResult<Self> {
        let residual = plan.residual.as_ref().map(|f| f.compile()).transpose()?;
        Ok(Self {
            conn,
            pending: pending.into_iter(),
            plan,
            residual,
            hidden,
            page: VecDeque::new(),
            last_id: 0,
            exhausted: false,
        })
    }

    /// Fetch the next page of rows and load the nodes they reference.
    fn fetch(&mut self) -> KiwiResult<()> {
        let rows = self.conn.db().query_page(&self.plan, self.last_id)?;
        if let Some(last) = rows.last() {
            self.last_id = last.id;
        }
        if self.plan.page_size.is_none_or(|size| rows.len() < size) {
            self.exhausted = true;
        }
        let rows: Vec<TripleRow> = rows
            .into_iter()
            .filter(|row| !self.hidden.contains(&row.id))
            .collect();
        self.conn
            .preload_nodes(rows.iter().flat_map(|row| row.node_ids()))?;
        self.page.extend(rows);
        Ok(())
    }

    fn fail(&mut self) {
        self.page.clear();
        self.exhausted = true;
    }
}

impl Iterator for TripleCursor<'_> {
    type Item = KiwiResult<Triple>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(triple) = self.pending.next() {
            return Some(Ok(triple));
        }
        loop {
            if let Some(row) = self.page.pop_front() {
                match self.conn.triple_from_row(&row) {
                    Ok(triple) => {
                        if self.residual.as_ref().is_none_or(|f| f.matches(&triple.object)) {
                            return Some(Ok(triple));
                        }
                        continue;
                    }
                    Err(e) => {
                        self.fail();
                        return Some(Err(e));
                    }
                }
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fetch() {
                self.fail();
                return Some(Err(e));
            }
        }
    }
}

impl std::fmt::Debug for TripleCursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TripleCursor")
            .field("sql", &self.plan.sql)
            .field("last_id", &self.last_id)
            .field("buffered", &self.page.len())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}
