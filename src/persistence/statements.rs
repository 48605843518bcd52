//! Named SQL statements and schema scripts.
//!
//! Every statement the engine executes is looked up by name. The ANSI text is
//! the default; a dialect only lists the statements it spells differently.
//! Placeholders are positional `?` markers.

use std::collections::HashMap;

use crate::error::StoreError;

use super::dialect::{ColumnType, Dialect};

/// Current schema version, stored in the `metadata` table.
pub const SCHEMA_VERSION: &str = "1";

pub const TRIPLE_COLUMNS: &str =
    "id, subject, predicate, object, context, creator, inferred, deleted, createdAt, deletedAt";
pub const NODE_COLUMNS: &str = "id, ntype, svalue, ltype, lang, createdAt";

const DEFAULTS: &[(&str, &str)] = &[
    ("meta.version", "SELECT mvalue FROM metadata WHERE mkey = 'version'"),
    ("meta.set_version", "INSERT INTO metadata (mkey, mvalue) VALUES ('version', ?)"),
    (
        "seq.init",
        "INSERT INTO sequences (name, value) SELECT ?, 0 \
         WHERE NOT EXISTS (SELECT 1 FROM sequences WHERE name = ?)",
    ),
    ("seq.update", "UPDATE sequences SET value = value + ? WHERE name = ?"),
    ("seq.read", "SELECT value FROM sequences WHERE name = ?"),
    (
        "load.node_by_id",
        "SELECT id, ntype, svalue, ltype, lang, createdAt FROM nodes WHERE id = ?",
    ),
    (
        "load.node_by_digest",
        "SELECT id, ntype, svalue, ltype, lang, createdAt FROM nodes WHERE nkey = ?",
    ),
    (
        "store.node",
        "INSERT INTO nodes (id, ntype, svalue, nkey, dvalue, ivalue, tvalue, bvalue, ltype, lang, createdAt) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    ),
    (
        "load.triple_by_id",
        "SELECT id, subject, predicate, object, context, creator, inferred, deleted, createdAt, deletedAt \
         FROM triples WHERE id = ?",
    ),
    (
        "load.triple_by_key",
        "SELECT id, subject, predicate, object, context, creator, inferred, deleted, createdAt, deletedAt \
         FROM triples WHERE subject = ? AND predicate = ? AND object = ? AND context = ? \
         ORDER BY deleted, id LIMIT 1",
    ),
    (
        "load.triple_by_key_default",
        "SELECT id, subject, predicate, object, context, creator, inferred, deleted, createdAt, deletedAt \
         FROM triples WHERE subject = ? AND predicate = ? AND object = ? AND context IS NULL \
         ORDER BY deleted, id LIMIT 1",
    ),
    (
        "store.triple",
        "INSERT INTO triples (id, subject, predicate, object, context, creator, inferred, deleted, createdAt) \
         VALUES (?, ?, ?, ?, ?, ?, ?, FALSE, ?)",
    ),
    (
        "undelete.triple",
        "UPDATE triples SET deleted = FALSE, deletedAt = NULL, inferred = ? WHERE id = ?",
    ),
    (
        "delete.triple",
        "UPDATE triples SET deleted = TRUE, deletedAt = ? WHERE id = ? AND deleted = FALSE",
    ),
    (
        "load.contexts",
        "SELECT DISTINCT context FROM triples WHERE deleted = FALSE AND context IS NOT NULL ORDER BY context",
    ),
    ("count", "SELECT COUNT(*) FROM triples WHERE deleted = FALSE"),
    ("count.context", "SELECT COUNT(*) FROM triples WHERE deleted = FALSE AND context = ?"),
    (
        "count.default_context",
        "SELECT COUNT(*) FROM triples WHERE deleted = FALSE AND context IS NULL",
    ),
    ("count.nodes", "SELECT COUNT(*) FROM nodes"),
    (
        "store.justification",
        "INSERT INTO reasoner_justifications (id, triple, createdAt) VALUES (?, ?, ?)",
    ),
    (
        "store.just_supp_triple",
        "INSERT INTO reasoner_just_supp_triples (justification, triple) VALUES (?, ?)",
    ),
    (
        "load.justifications",
        "SELECT j.id, j.triple, s.triple FROM reasoner_justifications j \
         LEFT JOIN reasoner_just_supp_triples s ON s.justification = j.id ORDER BY j.id",
    ),
    ("delete.just_supp_triples", "DELETE FROM reasoner_just_supp_triples WHERE justification = ?"),
    ("delete.justification", "DELETE FROM reasoner_justifications WHERE id = ?"),
    (
        "load.namespace",
        "SELECT id, prefix, uri, createdAt FROM namespaces WHERE prefix = ?",
    ),
    (
        "load.namespaces",
        "SELECT id, prefix, uri, createdAt FROM namespaces ORDER BY prefix",
    ),
    (
        "store.namespace",
        "INSERT INTO namespaces (id, prefix, uri, createdAt) VALUES (?, ?, ?, ?)",
    ),
    ("update.namespace", "UPDATE namespaces SET uri = ? WHERE prefix = ?"),
    ("delete.namespace", "DELETE FROM namespaces WHERE prefix = ?"),
];

const POSTGRES: &[(&str, &str)] = &[(
    "seq.update",
    "UPDATE sequences SET value = value + CAST(? AS BIGINT) WHERE name = ?",
)];

const MYSQL: &[(&str, &str)] = &[
    (
        "seq.init",
        "INSERT INTO sequences (name, value) SELECT ?, 0 FROM DUAL \
         WHERE NOT EXISTS (SELECT 1 FROM sequences WHERE name = ?)",
    ),
    // GROUP BY lets MySQL read idx_triples_c instead of sorting for DISTINCT.
    (
        "load.contexts",
        "SELECT context FROM triples WHERE context IS NOT NULL AND deleted = FALSE \
         GROUP BY context ORDER BY context",
    ),
];

const H2: &[(&str, &str)] = &[(
    "meta.version",
    "SELECT mvalue FROM metadata WHERE mkey = 'version' LIMIT 1",
)];

const SQLITE: &[(&str, &str)] = &[(
    "count.nodes",
    "SELECT COUNT(*) FROM nodes INDEXED BY idx_nodes_nkey",
)];

fn overrides(dialect: Dialect) -> &'static [(&'static str, &'static str)] {
    match dialect {
        Dialect::PostgreSql => POSTGRES,
        Dialect::MySql => MYSQL,
        Dialect::H2 => H2,
        Dialect::Sqlite => SQLITE,
    }
}

/// The named statements of one dialect.
#[derive(Debug, Clone)]
pub struct Statements {
    dialect: Dialect,
    map: HashMap<&'static str, &'static str>,
}

impl Statements {
    pub fn for_dialect(dialect: Dialect) -> Self {
        let mut map: HashMap<_, _> = DEFAULTS.iter().copied().collect();
        map.extend(overrides(dialect).iter().copied());
        Self { dialect, map }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// SQL text of the statement `name`.
    pub fn get(&self, name: &str) -> Result<&'static str, StoreError> {
        self.map.get(name).copied().ok_or_else(|| StoreError::Schema {
            message: format!("no statement named `{name}` for {}", self.dialect),
        })
    }

    /// All statement names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.map.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Repeat the `VALUES (...)` tuple of a single-row insert `rows` times.
pub fn multi_row_insert(single: &str, rows: usize) -> String {
    match single.rfind("VALUES ") {
        Some(pos) => {
            let (head, tuple) = single.split_at(pos + "VALUES ".len());
            let tuples = vec![tuple; rows.max(1)].join(", ");
            format!("{head}{tuples}")
        }
        None => single.to_string(),
    }
}

/// `?, ?, ?` with `n` markers.
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// DDL creating every table and index, one statement per entry.
pub fn create_script(dialect: Dialect) -> Vec<String> {
    let id = dialect.column_type(ColumnType::Id);
    let text = dialect.column_type(ColumnType::Text);
    let key = dialect.column_type(ColumnType::Key);
    let double = dialect.column_type(ColumnType::Double);
    let bigint = dialect.column_type(ColumnType::BigInt);
    let boolean = dialect.column_type(ColumnType::Boolean);
    let ts = dialect.column_type(ColumnType::Timestamp);
    // MySQL has no IF NOT EXISTS for indexes.
    let idx = if dialect == Dialect::MySql { "" } else { "IF NOT EXISTS " };

    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS metadata (\
             mkey {key} NOT NULL PRIMARY KEY, \
             mvalue {text} NOT NULL)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS sequences (\
             name {key} NOT NULL PRIMARY KEY, \
             value {bigint} NOT NULL)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS nodes (\
             id {id} NOT NULL PRIMARY KEY, \
             ntype {key} NOT NULL, \
             svalue {text} NOT NULL, \
             nkey {key} NOT NULL, \
             dvalue {double}, \
             ivalue {bigint}, \
             tvalue {ts}, \
             bvalue {boolean}, \
             ltype {bigint} REFERENCES nodes(id), \
             lang {key}, \
             createdAt {ts} NOT NULL)"
        ),
        format!("CREATE UNIQUE INDEX {idx}idx_nodes_nkey ON nodes(nkey)"),
        format!(
            "CREATE TABLE IF NOT EXISTS triples (\
             id {id} NOT NULL PRIMARY KEY, \
             subject {bigint} NOT NULL REFERENCES nodes(id), \
             predicate {bigint} NOT NULL REFERENCES nodes(id), \
             object {bigint} NOT NULL REFERENCES nodes(id), \
             context {bigint} REFERENCES nodes(id), \
             creator {bigint} REFERENCES nodes(id), \
             inferred {boolean} NOT NULL DEFAULT FALSE, \
             deleted {boolean} NOT NULL DEFAULT FALSE, \
             createdAt {ts} NOT NULL, \
             deletedAt {ts})"
        ),
        format!("CREATE INDEX {idx}idx_triples_spoc ON triples(subject, predicate, object, context)"),
        format!("CREATE INDEX {idx}idx_triples_p ON triples(predicate)"),
        format!("CREATE INDEX {idx}idx_triples_o ON triples(object)"),
        format!("CREATE INDEX {idx}idx_triples_c ON triples(context)"),
        format!(
            "CREATE TABLE IF NOT EXISTS namespaces (\
             id {id} NOT NULL PRIMARY KEY, \
             prefix {key} NOT NULL, \
             uri {text} NOT NULL, \
             createdAt {ts} NOT NULL)"
        ),
        format!("CREATE UNIQUE INDEX {idx}idx_namespaces_prefix ON namespaces(prefix)"),
        format!(
            "CREATE TABLE IF NOT EXISTS reasoner_justifications (\
             id {id} NOT NULL PRIMARY KEY, \
             triple {bigint} NOT NULL REFERENCES triples(id), \
             createdAt {ts} NOT NULL)"
        ),
        format!("CREATE INDEX {idx}idx_justifications_triple ON reasoner_justifications(triple)"),
        format!(
            "CREATE TABLE IF NOT EXISTS reasoner_just_supp_triples (\
             justification {bigint} NOT NULL REFERENCES reasoner_justifications(id), \
             triple {bigint} NOT NULL REFERENCES triples(id), \
             PRIMARY KEY (justification, triple))"
        ),
        format!("CREATE INDEX {idx}idx_just_supp_triple ON reasoner_just_supp_triples(triple)"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_defaults() {
        let mysql = Statements::for_dialect(Dialect::MySql);
        assert!(mysql.get("seq.init").unwrap().contains("FROM DUAL"));
        let pg = Statements::for_dialect(Dialect::PostgreSql);
        assert!(!pg.get("seq.init").unwrap().contains("FROM DUAL"));
        assert_eq!(
            pg.get("load.node_by_id").unwrap(),
            mysql.get("load.node_by_id").unwrap()
        );
    }

    #[test]
    fn every_dialect_has_every_statement() {
        let expected = Statements::for_dialect(Dialect::Sqlite).names();
        for d in Dialect::ALL {
            assert_eq!(Statements::for_dialect(d).names(), expected, "{d}");
        }
    }

    #[test]
    fn unknown_statement_is_a_schema_error() {
        let s = Statements::for_dialect(Dialect::H2);
        assert!(matches!(s.get("nope"), Err(StoreError::Schema { .. })));
    }

    #[test]
    fn multi_row_repeats_the_values_tuple() {
        let sql = multi_row_insert("INSERT INTO t (a, b) VALUES (?, ?)", 3);
        assert_eq!(sql, "INSERT INTO t (a, b) VALUES (?, ?), (?, ?), (?, ?)");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[test]
    fn scripts_use_dialect_types() {
        let pg = create_script(Dialect::PostgreSql).join(";\n");
        assert!(pg.contains("DOUBLE PRECISION"));
        assert!(pg.contains("TIMESTAMP(3)"));
        let mysql = create_script(Dialect::MySql).join(";\n");
        assert!(mysql.contains("LONGTEXT"));
        assert!(!mysql.contains("INDEX IF NOT EXISTS"));
        let sqlite = create_script(Dialect::Sqlite).join(";\n");
        assert!(sqlite.contains("id INTEGER NOT NULL PRIMARY KEY"));
    }
}
