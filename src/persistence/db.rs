//! The executable database connection (SQLite through `rusqlite`).
//!
//! A [`DbConnection`] owns one driver connection in WAL mode. Reads run
//! either in autocommit mode or inside a deferred read transaction started
//! with [`DbConnection::begin_read`], which pins one snapshot for a store
//! transaction. All writes of a commit go through [`DbConnection::flush`] in
//! a single immediate write transaction.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{
    Connection, OptionalExtension, Row, ToSql, TransactionBehavior, params, params_from_iter,
};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::model::{NodeRef, NodeType, Term, Triple, TripleKey, from_millis, now, to_millis};
use crate::namespace::Namespace;

use super::dialect::Dialect;
use super::query::{QueryPlan, SqlValue, build_regex};
use super::statements::{NODE_COLUMNS, SCHEMA_VERSION, Statements, create_script, multi_row_insert, placeholders};
use super::{SqlResultExt, StoreResult};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Int(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Bool(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// A row of the `nodes` table.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
    pub id: i64,
    pub ntype: NodeType,
    pub svalue: String,
    /// Id of the datatype node of typed literals.
    pub ltype: Option<i64>,
    pub lang: Option<String>,
    pub created: DateTime<Utc>,
}

impl NodeRow {
    /// The term stored in this row, given the URI of its datatype node.
    pub fn term(&self, datatype: Option<&str>) -> Term {
        match self.ntype {
            NodeType::Uri => Term::Uri(self.svalue.clone()),
            NodeType::BNode => Term::BNode(self.svalue.clone()),
            _ => Term::Literal {
                content: self.svalue.clone(),
                language: self.lang.clone(),
                datatype: datatype.map(str::to_string),
            },
        }
    }
}

type RawNode = (i64, String, String, Option<i64>, Option<String>, i64);

fn raw_node(row: &Row<'_>) -> rusqlite::Result<RawNode> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn node_row((id, ntype, svalue, ltype, lang, created): RawNode) -> StoreResult<NodeRow> {
    let ntype = NodeType::parse(&ntype).ok_or_else(|| StoreError::CorruptRow {
        message: format!("node {id} has unknown type `{ntype}`"),
    })?;
    Ok(NodeRow {
        id,
        ntype,
        svalue,
        ltype,
        lang,
        created: from_millis(created),
    })
}

/// A row of the `triples` table.
#[derive(Debug, Clone, PartialEq)]
pub struct TripleRow {
    pub id: i64,
    pub subject: i64,
    pub predicate: i64,
    pub object: i64,
    pub context: Option<i64>,
    pub creator: Option<i64>,
    pub inferred: bool,
    pub deleted: bool,
    pub created: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TripleRow {
    pub fn key(&self) -> TripleKey {
        TripleKey {
            subject: self.subject,
            predicate: self.predicate,
            object: self.object,
            context: self.context,
        }
    }

    /// Node ids this row references.
    pub fn node_ids(&self) -> impl Iterator<Item = i64> + '_ {
        [self.subject, self.predicate, self.object]
            .into_iter()
            .chain(self.context)
            .chain(self.creator)
    }
}

fn triple_row(row: &Row<'_>) -> rusqlite::Result<TripleRow> {
    Ok(TripleRow {
        id: row.get(0)?,
        subject: row.get(1)?,
        predicate: row.get(2)?,
        object: row.get(3)?,
        context: row.get(4)?,
        creator: row.get(5)?,
        inferred: row.get(6)?,
        deleted: row.get(7)?,
        created: from_millis(row.get(8)?),
        deleted_at: row.get::<_, Option<i64>>(9)?.map(from_millis),
    })
}

/// A persisted justification: the justified triple and its supports, by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JustificationRow {
    pub id: i64,
    pub triple: i64,
    pub supporting: Vec<i64>,
}

/// Everything one commit writes.
#[derive(Debug, Default)]
pub struct FlushBatch<'a> {
    pub nodes: &'a [NodeRef],
    /// Triples without a row yet.
    pub inserts: Vec<&'a Triple>,
    /// Soft-deleted rows to reactivate.
    pub undeletes: Vec<&'a Triple>,
    /// Active rows to soft-delete.
    pub deletes: Vec<&'a Triple>,
    pub justifications: &'a [JustificationRow],
    /// Upper bound of rows per multi-row insert.
    pub batch_size: usize,
}

impl FlushBatch<'_> {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.inserts.is_empty()
            && self.undeletes.is_empty()
            && self.deletes.is_empty()
            && self.justifications.is_empty()
    }
}

fn node_values(node: &NodeRef) -> Vec<SqlValue> {
    vec![
        node.id().into(),
        node.node_type().as_str().into(),
        node.string_value().into(),
        node.digest().into(),
        node.double_value().map_or(SqlValue::Null, SqlValue::Real),
        node.int_value().map_or(SqlValue::Null, SqlValue::Int),
        node.date_value()
            .map_or(SqlValue::Null, |d| SqlValue::Int(d.timestamp_millis())),
        node.bool_value().map_or(SqlValue::Null, SqlValue::Bool),
        node.datatype().map(|d| d.id()).into(),
        node.language().map_or(SqlValue::Null, SqlValue::from),
        SqlValue::Int(to_millis(&node.created())),
    ]
}

fn triple_values(triple: &Triple) -> Vec<SqlValue> {
    vec![
        triple.id.into(),
        triple.subject.id().into(),
        triple.predicate.id().into(),
        triple.object.id().into(),
        triple.context.as_ref().map(|c| c.id()).into(),
        triple.creator.as_ref().map(|c| c.id()).into(),
        triple.inferred.into(),
        SqlValue::Int(to_millis(&triple.created)),
    ]
}

fn trace_sql(enabled: bool, name: &str, sql: &str) {
    if enabled {
        tracing::trace!(statement = name, sql, "executing");
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One open database connection.
pub struct DbConnection {
    conn: Connection,
    dialect: Dialect,
    statements: Arc<Statements>,
    query_logging: bool,
}

impl DbConnection {
    /// Open the configured database, register functions and validate.
    pub fn open(config: &StoreConfig, statements: Arc<Statements>) -> StoreResult<Self> {
        let conn = open_sqlite(&config.database)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .at("busy_timeout")?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
            .at("pragma journal_mode")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .at("pragma synchronous")?;
        register_functions(&conn).at("register functions")?;

        let dialect = statements.dialect();
        conn.query_row(dialect.validation_query(), [], |row| row.get::<_, i64>(0))
            .at("validate")?;

        Ok(Self {
            conn,
            dialect,
            statements,
            query_logging: config.query_logging,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn sql(&self, name: &str) -> StoreResult<&'static str> {
        let sql = self.statements.get(name)?;
        trace_sql(self.query_logging, name, sql);
        Ok(sql)
    }

    /// Create every table and index, then seed metadata and sequences.
    pub fn create_schema(&mut self) -> StoreResult<()> {
        let version_sql = self.statements.get("meta.version")?;
        let set_version_sql = self.statements.get("meta.set_version")?;
        let seq_init_sql = self.statements.get("seq.init")?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .at("begin")?;
        for ddl in create_script(self.dialect) {
            tx.execute(&ddl, []).map_err(|e| StoreError::Schema {
                message: format!("{e} in `{ddl}`"),
            })?;
        }
        let version: Option<String> = tx
            .query_row(version_sql, [], |row| row.get(0))
            .optional()
            .at("meta.version")?;
        match version.as_deref() {
            None => {
                tx.execute(set_version_sql, params![SCHEMA_VERSION])
                    .at("meta.set_version")?;
            }
            Some(SCHEMA_VERSION) => {}
            Some(other) => {
                return Err(StoreError::Schema {
                    message: format!("database has schema version {other}, expected {SCHEMA_VERSION}"),
                });
            }
        }
        for seq in crate::ids::Sequence::ALL {
            tx.execute(seq_init_sql, params![seq.name(), seq.name()])
                .at("seq.init")?;
        }
        tx.commit().at("commit")?;
        tracing::debug!(dialect = %self.dialect, "schema ready");
        Ok(())
    }

    // -- snapshots ---------------------------------------------------------

    /// Start a deferred read transaction; reads then share one snapshot.
    pub fn begin_read(&self) -> StoreResult<()> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN DEFERRED").at("begin")?;
        }
        Ok(())
    }

    /// End the read transaction started by [`begin_read`](Self::begin_read).
    pub fn end_read(&self) -> StoreResult<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT").at("end read")?;
        }
        Ok(())
    }

    // -- nodes -------------------------------------------------------------

    pub fn load_node_by_id(&self, id: i64) -> StoreResult<Option<NodeRow>> {
        let sql = self.sql("load.node_by_id")?;
        let raw = self
            .conn
            .prepare_cached(sql)
            .and_then(|mut stmt| stmt.query_row([id], raw_node).optional())
            .at("load.node_by_id")?;
        raw.map(node_row).transpose()
    }

    pub fn load_node_by_digest(&self, digest: &str) -> StoreResult<Option<NodeRow>> {
        let sql = self.sql("load.node_by_digest")?;
        let raw = self
            .conn
            .prepare_cached(sql)
            .and_then(|mut stmt| stmt.query_row([digest], raw_node).optional())
            .at("load.node_by_digest")?;
        raw.map(node_row).transpose()
    }

    /// Load many nodes at once. Missing ids are simply absent from the result.
    pub fn load_nodes_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<NodeRow>> {
        let mut rows = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.dialect.max_bind_parameters().min(500)) {
            let sql = format!(
                "SELECT {NODE_COLUMNS} FROM nodes WHERE id IN ({})",
                placeholders(chunk.len())
            );
            trace_sql(self.query_logging, "load.nodes_by_ids", &sql);
            let raws = self
                .conn
                .prepare(&sql)
                .and_then(|mut stmt| {
                    stmt.query_map(params_from_iter(chunk.iter()), raw_node)?
                        .collect::<rusqlite::Result<Vec<_>>>()
                })
                .at("load.nodes_by_ids")?;
            for raw in raws {
                rows.push(node_row(raw)?);
            }
        }
        Ok(rows)
    }

    pub fn count_nodes(&self) -> StoreResult<i64> {
        let sql = self.sql("count.nodes")?;
        self.conn
            .query_row(sql, [], |row| row.get(0))
            .at("count.nodes")
    }

    // -- triples -----------------------------------------------------------

    pub fn load_triple_by_id(&self, id: i64) -> StoreResult<Option<TripleRow>> {
        let sql = self.sql("load.triple_by_id")?;
        self.conn
            .prepare_cached(sql)
            .and_then(|mut stmt| stmt.query_row([id], triple_row).optional())
            .at("load.triple_by_id")
    }

    /// The row for `key`, preferring an active row over soft-deleted ones.
    pub fn load_triple_by_key(&self, key: &TripleKey) -> StoreResult<Option<TripleRow>> {
        let result = match key.context {
            Some(ctx) => {
                let sql = self.sql("load.triple_by_key")?;
                self.conn.prepare_cached(sql).and_then(|mut stmt| {
                    stmt.query_row(params![key.subject, key.predicate, key.object, ctx], triple_row)
                        .optional()
                })
            }
            None => {
                let sql = self.sql("load.triple_by_key_default")?;
                self.conn.prepare_cached(sql).and_then(|mut stmt| {
                    stmt.query_row(params![key.subject, key.predicate, key.object], triple_row)
                        .optional()
                })
            }
        };
        result.at("load.triple_by_key")
    }

    /// One page of a planned pattern query, rows with id above `after`.
    pub fn query_page(&self, plan: &QueryPlan, after: i64) -> StoreResult<Vec<TripleRow>> {
        trace_sql(self.query_logging, "query", &plan.sql);
        let params = plan.params_after(after);
        self.conn
            .prepare_cached(&plan.sql)
            .and_then(|mut stmt| {
                stmt.query_map(params_from_iter(params.iter()), triple_row)?
                    .collect()
            })
            .at("query")
    }

    /// Ids of all contexts with at least one active triple.
    pub fn load_context_ids(&self) -> StoreResult<Vec<i64>> {
        let sql = self.sql("load.contexts")?;
        self.conn
            .prepare_cached(sql)
            .and_then(|mut stmt| stmt.query_map([], |row| row.get(0))?.collect())
            .at("load.contexts")
    }

    /// Active triples in total (`None`), in the default graph
    /// (`Some(None)`) or in one context.
    pub fn count_triples(&self, context: Option<Option<i64>>) -> StoreResult<i64> {
        let result = match context {
            None => self.conn.query_row(self.sql("count")?, [], |row| row.get(0)),
            Some(None) => self
                .conn
                .query_row(self.sql("count.default_context")?, [], |row| row.get(0)),
            Some(Some(ctx)) => self
                .conn
                .query_row(self.sql("count.context")?, [ctx], |row| row.get(0)),
        };
        result.at("count")
    }

    // -- writes ------------------------------------------------------------

    /// Advance a sequence by `count` and return the first reserved id.
    pub fn reserve_ids(&mut self, sequence: &str, count: u64) -> StoreResult<i64> {
        let update = self.sql("seq.update")?;
        let read = self.sql("seq.read")?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .at("begin")?;
        let count = i64::try_from(count).map_err(|_| StoreError::Schema {
            message: format!("id block of {count} is too large"),
        })?;
        let updated = tx.execute(update, params![count, sequence]).at("seq.update")?;
        if updated == 0 {
            return Err(StoreError::Schema {
                message: format!("sequence {sequence} is missing"),
            });
        }
        let high: i64 = tx
            .query_row(read, params![sequence], |row| row.get(0))
            .at("seq.read")?;
        tx.commit().at("commit")?;
        Ok(high - count + 1)
    }

    /// Write a commit's nodes, triple changes and justifications atomically.
    ///
    /// Nodes go first so that triples never reference missing rows. Any
    /// failure rolls the whole write transaction back.
    pub fn flush(&mut self, batch: &FlushBatch<'_>) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let dialect = self.dialect;
        let logging = self.query_logging;
        let store_node = self.statements.get("store.node")?;
        let store_triple = self.statements.get("store.triple")?;
        let undelete = self.statements.get("undelete.triple")?;
        let delete = self.statements.get("delete.triple")?;
        let store_just = self.statements.get("store.justification")?;
        let store_supp = self.statements.get("store.just_supp_triple")?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .at("begin")?;
        let inserter = Inserter {
            conn: &tx,
            dialect,
            batch_size: batch.batch_size.max(1),
            logging,
        };

        inserter.insert("store.node", store_node, batch.nodes.iter().map(node_values).collect())?;
        inserter.insert(
            "store.triple",
            store_triple,
            batch.inserts.iter().map(|t| triple_values(t)).collect(),
        )?;

        if !batch.undeletes.is_empty() {
            trace_sql(logging, "undelete.triple", undelete);
            let mut stmt = tx.prepare_cached(undelete).at("undelete.triple")?;
            for t in &batch.undeletes {
                stmt.execute(params![t.inferred, t.id]).at("undelete.triple")?;
            }
        }
        if !batch.deletes.is_empty() {
            trace_sql(logging, "delete.triple", delete);
            let mut stmt = tx.prepare_cached(delete).at("delete.triple")?;
            for t in &batch.deletes {
                let at = t.deleted_at().unwrap_or_else(now);
                stmt.execute(params![to_millis(&at), t.id]).at("delete.triple")?;
            }
        }

        let created = to_millis(&now());
        inserter.insert(
            "store.justification",
            store_just,
            batch
                .justifications
                .iter()
                .map(|j| vec![j.id.into(), j.triple.into(), SqlValue::Int(created)])
                .collect(),
        )?;
        inserter.insert(
            "store.just_supp_triple",
            store_supp,
            batch
                .justifications
                .iter()
                .flat_map(|j| {
                    j.supporting
                        .iter()
                        .map(move |s| vec![SqlValue::Int(j.id), SqlValue::Int(*s)])
                })
                .collect(),
        )?;

        tx.commit().at("commit")?;
        tracing::debug!(
            nodes = batch.nodes.len(),
            inserted = batch.inserts.len(),
            undeleted = batch.undeletes.len(),
            deleted = batch.deletes.len(),
            justifications = batch.justifications.len(),
            "flushed transaction"
        );
        Ok(())
    }

    // -- justifications ----------------------------------------------------

    pub fn load_justifications(&self) -> StoreResult<Vec<JustificationRow>> {
        let sql = self.sql("load.justifications")?;
        let rows: Vec<(i64, i64, Option<i64>)> = self
            .conn
            .prepare_cached(sql)
            .and_then(|mut stmt| {
                stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                    .collect()
            })
            .at("load.justifications")?;

        let mut out: Vec<JustificationRow> = Vec::new();
        for (id, triple, supporting) in rows {
            match out.last_mut() {
                Some(last) if last.id == id => last.supporting.extend(supporting),
                _ => out.push(JustificationRow {
                    id,
                    triple,
                    supporting: supporting.into_iter().collect(),
                }),
            }
        }
        Ok(out)
    }

    pub fn delete_justifications(&mut self, ids: &[i64]) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let supp = self.sql("delete.just_supp_triples")?;
        let just = self.sql("delete.justification")?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .at("begin")?;
        for id in ids {
            tx.execute(supp, [id]).at("delete.just_supp_triples")?;
            tx.execute(just, [id]).at("delete.justification")?;
        }
        tx.commit().at("commit")
    }

    // -- namespaces --------------------------------------------------------

    pub fn load_namespace(&self, prefix: &str) -> StoreResult<Option<Namespace>> {
        let sql = self.sql("load.namespace")?;
        self.conn
            .prepare_cached(sql)
            .and_then(|mut stmt| stmt.query_row([prefix], namespace_row).optional())
            .at("load.namespace")
    }

    pub fn load_namespaces(&self) -> StoreResult<Vec<Namespace>> {
        let sql = self.sql("load.namespaces")?;
        self.conn
            .prepare_cached(sql)
            .and_then(|mut stmt| stmt.query_map([], namespace_row)?.collect())
            .at("load.namespaces")
    }

    pub fn store_namespace(&self, ns: &Namespace) -> StoreResult<()> {
        let sql = self.sql("store.namespace")?;
        self.conn
            .execute(sql, params![ns.id, ns.prefix, ns.uri, to_millis(&ns.created)])
            .at("store.namespace")?;
        Ok(())
    }

    pub fn update_namespace(&self, prefix: &str, uri: &str) -> StoreResult<bool> {
        let sql = self.sql("update.namespace")?;
        let n = self.conn.execute(sql, params![uri, prefix]).at("update.namespace")?;
        Ok(n > 0)
    }

    pub fn delete_namespace(&self, prefix: &str) -> StoreResult<bool> {
        let sql = self.sql("delete.namespace")?;
        let n = self.conn.execute(sql, [prefix]).at("delete.namespace")?;
        Ok(n > 0)
    }
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("dialect", &self.dialect)
            .field("path", &self.conn.path())
            .finish()
    }
}

fn namespace_row(row: &Row<'_>) -> rusqlite::Result<Namespace> {
    Ok(Namespace {
        id: row.get(0)?,
        prefix: row.get(1)?,
        uri: row.get(2)?,
        created: from_millis(row.get(3)?),
    })
}

fn open_sqlite(path: &Path) -> StoreResult<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Io { source: e })?;
    }
    Connection::open(path).at("open")
}

/// `kiwi_regexp(text, pattern, flags)`, compiled once per statement.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "kiwi_regexp",
        3,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let flags: String = ctx.get(2)?;
            let regex: Arc<Regex> = ctx.get_or_create_aux(1, |vr| -> Result<_, BoxError> {
                Ok(build_regex(vr.as_str()?, &flags)?)
            })?;
            let text = ctx
                .get_raw(0)
                .as_str()
                .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
            Ok(regex.is_match(text))
        },
    )
}

/// Multi-row inserts bounded by batch size and the bind parameter limit.
struct Inserter<'c> {
    conn: &'c Connection,
    dialect: Dialect,
    batch_size: usize,
    logging: bool,
}

impl Inserter<'_> {
    fn insert(&self, name: &str, single: &str, rows: Vec<Vec<SqlValue>>) -> StoreResult<()> {
        let Some(width) = rows.first().map(Vec::len) else {
            return Ok(());
        };
        let per_statement = if self.dialect.is_batch_supported() {
            self.batch_size
                .min(self.dialect.max_bind_parameters() / width.max(1))
                .max(1)
        } else {
            1
        };
        for chunk in rows.chunks(per_statement) {
            let sql = if chunk.len() == 1 {
                single.to_string()
            } else {
                multi_row_insert(single, chunk.len())
            };
            trace_sql(self.logging, name, &sql);
            let mut stmt = self.conn.prepare_cached(&sql).at(name)?;
            stmt.execute(params_from_iter(chunk.iter().flatten()))
                .at(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;

    fn open(dir: &tempfile::TempDir) -> DbConnection {
        let config = StoreConfig::sqlite(dir.path().join("db.sqlite"));
        let mut db = DbConnection::open(&config, Arc::new(Statements::for_dialect(Dialect::Sqlite))).unwrap();
        db.create_schema().unwrap();
        db
    }

    fn uri(id: i64, u: &str) -> NodeRef {
        Arc::new(Node::from_term(id, now(), &Term::uri(u), None).unwrap())
    }

    #[test]
    fn flush_then_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut db = open(&dir);
        let nodes = vec![uri(1, "http://ex.org/s"), uri(2, "http://ex.org/p"), uri(3, "http://ex.org/o")];
        let triple = Triple::new(10, nodes[0].clone(), nodes[1].clone(), nodes[2].clone(), None);
        db.flush(&FlushBatch {
            nodes: &nodes,
            inserts: vec![&triple],
            batch_size: 2,
            ..Default::default()
        })
        .unwrap();

        let row = db.load_node_by_digest(&nodes[0].digest()).unwrap().unwrap();
        assert_eq!(row.id, 1);
        assert_eq!(row.term(None), Term::uri("http://ex.org/s"));
        assert_eq!(db.load_nodes_by_ids(&[1, 2, 3, 99]).unwrap().len(), 3);

        let t = db.load_triple_by_key(&triple.key()).unwrap().unwrap();
        assert_eq!(t.id, 10);
        assert!(!t.deleted);
        assert_eq!(db.count_triples(None).unwrap(), 1);
        assert_eq!(db.count_triples(Some(None)).unwrap(), 1);
        assert_eq!(db.count_nodes().unwrap(), 3);
    }

    #[test]
    fn soft_delete_and_undelete() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut db = open(&dir);
        let nodes = vec![uri(1, "http://ex.org/s"), uri(2, "http://ex.org/p"), uri(3, "http://ex.org/o")];
        let mut triple = Triple::new(10, nodes[0].clone(), nodes[1].clone(), nodes[2].clone(), Some(nodes[0].clone()));
        db.flush(&FlushBatch {
            nodes: &nodes,
            inserts: vec![&triple],
            batch_size: 100,
            ..Default::default()
        })
        .unwrap();

        triple.mark_deleted(now());
        db.flush(&FlushBatch { deletes: vec![&triple], batch_size: 100, ..Default::default() })
            .unwrap();
        let row = db.load_triple_by_id(10).unwrap().unwrap();
        assert!(row.deleted);
        assert!(row.deleted_at.is_some());
        assert!(db.load_context_ids().unwrap().is_empty());

        triple.undelete();
        db.flush(&FlushBatch { undeletes: vec![&triple], batch_size: 100, ..Default::default() })
            .unwrap();
        let row = db.load_triple_by_id(10).unwrap().unwrap();
        assert!(!row.deleted);
        assert_eq!(db.load_context_ids().unwrap(), vec![1]);
    }

    #[test]
    fn failed_flush_leaves_nothing_behind() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut db = open(&dir);
        let nodes = vec![uri(1, "http://ex.org/a"), uri(1, "http://ex.org/b")];
        let err = db
            .flush(&FlushBatch { nodes: &nodes, batch_size: 1, ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, StoreError::Sql { .. }));
        assert_eq!(db.count_nodes().unwrap(), 0);
    }

    #[test]
    fn regexp_function_is_registered() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = open(&dir);
        let hit: bool = db
            .conn
            .query_row("SELECT kiwi_regexp('Hello\nWorld', '^world$', 'im')", [], |r| r.get(0))
            .unwrap();
        assert!(hit);
        let miss: bool = db
            .conn
            .query_row("SELECT kiwi_regexp('Hello', 'world', '')", [], |r| r.get(0))
            .unwrap();
        assert!(!miss);
    }

    #[test]
    fn justifications_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut db = open(&dir);
        let rows = vec![
            JustificationRow { id: 1, triple: 10, supporting: vec![11, 12] },
            JustificationRow { id: 2, triple: 13, supporting: vec![10] },
        ];
        db.flush(&FlushBatch { justifications: &rows, batch_size: 10, ..Default::default() })
            .unwrap();
        let mut loaded = db.load_justifications().unwrap();
        loaded.iter_mut().for_each(|j| j.supporting.sort());
        assert_eq!(loaded, rows);

        db.delete_justifications(&[1]).unwrap();
        assert_eq!(db.load_justifications().unwrap().len(), 1);
    }

    #[test]
    fn read_snapshot_is_stable() {
        let dir = tempfile::TempDir::new().unwrap();
        let reader = open(&dir);
        let mut writer = open(&dir);
        reader.begin_read().unwrap();
        assert_eq!(reader.count_nodes().unwrap(), 0);

        let nodes = vec![uri(1, "http://ex.org/a")];
        writer.flush(&FlushBatch { nodes: &nodes, batch_size: 1, ..Default::default() }).unwrap();
        assert_eq!(reader.count_nodes().unwrap(), 0);
        reader.end_read().unwrap();
        assert_eq!(reader.count_nodes().unwrap(), 1);
    }
}
