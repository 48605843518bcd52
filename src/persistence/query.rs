//! Translation of resolved triple patterns into SQL.
//!
//! The planner pushes everything the dialect can evaluate into the `WHERE`
//! clause. An object filter the dialect cannot express (for example a regex
//! with the `s` flag on PostgreSQL) stays behind as a residual filter that
//! the cursor applies in memory.

use regex::{Regex, RegexBuilder};

use crate::error::ModelError;
use crate::model::Node;

use super::dialect::Dialect;
use super::statements::{TRIPLE_COLUMNS, placeholders};

/// A bind parameter, independent of the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Bool(bool),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(v: Option<i64>) -> Self {
        v.map_or(SqlValue::Null, SqlValue::Int)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

/// A filter on the string value of the object node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectFilter {
    /// Regular expression with SPARQL-style flags (`i`, `s`, `m`, `x`).
    Regex { pattern: String, flags: String },
    /// Case-insensitive SQL `LIKE` pattern (`%` and `_` wildcards).
    ILike(String),
}

impl ObjectFilter {
    pub fn regex(pattern: impl Into<String>, flags: impl Into<String>) -> Self {
        ObjectFilter::Regex {
            pattern: pattern.into(),
            flags: flags.into(),
        }
    }

    /// Compile for in-memory evaluation. Also validates the pattern.
    pub fn compile(&self) -> Result<CompiledFilter, ModelError> {
        let regex = match self {
            ObjectFilter::Regex { pattern, flags } => build_regex(pattern, flags),
            ObjectFilter::ILike(like) => build_regex(&like_to_regex(like), "i"),
        };
        regex.map(CompiledFilter)
    }
}

/// An object filter ready to test nodes.
#[derive(Debug, Clone)]
pub struct CompiledFilter(Regex);

impl CompiledFilter {
    pub fn matches(&self, node: &Node) -> bool {
        self.0.is_match(node.string_value())
    }
}

/// Build a regex with SPARQL-style flags.
pub fn build_regex(pattern: &str, flags: &str) -> Result<Regex, ModelError> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(ModelError::InvalidTerm {
                    input: flags.to_string(),
                    message: format!("unknown regex flag '{other}'"),
                });
            }
        };
    }
    builder.build().map_err(|e| ModelError::InvalidTerm {
        input: pattern.to_string(),
        message: e.to_string(),
    })
}

fn like_to_regex(like: &str) -> String {
    let mut out = String::from("^");
    for c in like.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    out
}

/// A triple pattern whose terms have been resolved to node ids.
#[derive(Debug, Clone, Default)]
pub struct ResolvedPattern {
    pub subject: Option<i64>,
    pub predicate: Option<i64>,
    pub object: Option<i64>,
    /// Contexts to match; `None` entries select the default graph. Empty
    /// means every context.
    pub contexts: Vec<Option<i64>>,
    pub include_inferred: bool,
    pub filter: Option<ObjectFilter>,
}

/// Executable form of a pattern.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// SQL ending in `t.id > ?` ordering by id; the last bind is the keyset.
    pub sql: String,
    pub params: Vec<SqlValue>,
    /// Filter evaluated in memory after fetching.
    pub residual: Option<ObjectFilter>,
    /// Rows per page; `None` reads everything in one page.
    pub page_size: Option<usize>,
}

impl QueryPlan {
    /// Parameters for the page following `last_id`.
    pub fn params_after(&self, last_id: i64) -> Vec<SqlValue> {
        let mut params = self.params.clone();
        params.push(SqlValue::Int(last_id));
        params
    }
}

/// Plan a resolved pattern for `dialect`.
///
/// Fails when the object filter is not a valid expression.
pub fn plan(
    dialect: Dialect,
    pattern: &ResolvedPattern,
    fetch_size: usize,
) -> Result<QueryPlan, ModelError> {
    let mut clauses = vec!["t.deleted = FALSE".to_string()];
    let mut params = Vec::new();

    for (column, value) in [
        ("t.subject", pattern.subject),
        ("t.predicate", pattern.predicate),
        ("t.object", pattern.object),
    ] {
        if let Some(id) = value {
            clauses.push(format!("{column} = ?"));
            params.push(SqlValue::Int(id));
        }
    }

    if !pattern.contexts.is_empty() {
        let ids: Vec<i64> = pattern.contexts.iter().flatten().copied().collect();
        let default_graph = pattern.contexts.iter().any(Option::is_none);
        let mut alternatives = Vec::new();
        if !ids.is_empty() {
            alternatives.push(format!("t.context IN ({})", placeholders(ids.len())));
            params.extend(ids.into_iter().map(SqlValue::Int));
        }
        if default_graph {
            alternatives.push("t.context IS NULL".to_string());
        }
        clauses.push(format!("({})", alternatives.join(" OR ")));
    }

    if !pattern.include_inferred {
        clauses.push("t.inferred = FALSE".to_string());
    }

    let mut join = "";
    let mut residual = None;
    if let Some(filter) = &pattern.filter {
        filter.compile()?;
        let pushed = match filter {
            ObjectFilter::Regex { pattern, flags } => dialect
                .regexp_expression("o.svalue", "?", flags)
                .ok()
                .map(|sql| (sql, pattern.clone())),
            ObjectFilter::ILike(like) => Some((dialect.ilike("o.svalue", "?"), like.clone())),
        };
        match pushed {
            Some((sql, value)) => {
                join = " JOIN nodes o ON o.id = t.object";
                clauses.push(sql);
                params.push(SqlValue::Text(value));
            }
            None => residual = Some(filter.clone()),
        }
    }

    clauses.push("t.id > ?".to_string());
    let columns = TRIPLE_COLUMNS
        .split(", ")
        .map(|c| format!("t.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let page_size = dialect.supports_cursors().then_some(fetch_size.max(1));
    let limit = page_size.map(|n| format!(" LIMIT {n}")).unwrap_or_default();
    let sql = format!(
        "SELECT {columns} FROM triples t{join} WHERE {} ORDER BY t.id{limit}",
        clauses.join(" AND ")
    );

    Ok(QueryPlan {
        sql,
        params,
        residual,
        page_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Term, now};

    fn literal(s: &str) -> Node {
        Node::from_term(1, now(), &Term::literal(s), None).unwrap()
    }

    #[test]
    fn bound_positions_become_parameters() {
        let pattern = ResolvedPattern {
            subject: Some(1),
            object: Some(3),
            ..Default::default()
        };
        let plan = plan(Dialect::Sqlite, &pattern, 50).unwrap();
        assert!(plan.sql.contains("t.subject = ?"));
        assert!(plan.sql.contains("t.object = ?"));
        assert!(!plan.sql.contains("t.predicate = ?"));
        assert!(plan.sql.contains("t.inferred = FALSE"));
        assert!(plan.sql.ends_with("ORDER BY t.id LIMIT 50"));
        assert_eq!(plan.params_after(9), vec![SqlValue::Int(1), SqlValue::Int(3), SqlValue::Int(9)]);
    }

    #[test]
    fn contexts_include_default_graph() {
        let pattern = ResolvedPattern {
            contexts: vec![Some(5), None, Some(6)],
            include_inferred: true,
            ..Default::default()
        };
        let plan = plan(Dialect::PostgreSql, &pattern, 10).unwrap();
        assert!(plan.sql.contains("(t.context IN (?, ?) OR t.context IS NULL)"));
        assert!(!plan.sql.contains("inferred"));
        assert_eq!(plan.params, vec![SqlValue::Int(5), SqlValue::Int(6)]);
    }

    #[test]
    fn unsupported_regex_flag_becomes_residual() {
        let pattern = ResolvedPattern {
            filter: Some(ObjectFilter::regex("^a.b$", "s")),
            ..Default::default()
        };
        let pg = plan(Dialect::PostgreSql, &pattern, 10).unwrap();
        assert!(pg.residual.is_some());
        assert!(!pg.sql.contains("JOIN nodes"));

        let sqlite = plan(Dialect::Sqlite, &pattern, 10).unwrap();
        assert!(sqlite.residual.is_none());
        assert!(sqlite.sql.contains("kiwi_regexp(o.svalue, ?, 's')"));
    }

    #[test]
    fn non_cursor_dialects_read_one_page() {
        let plan = plan(Dialect::MySql, &ResolvedPattern::default(), 10).unwrap();
        assert_eq!(plan.page_size, None);
        assert!(!plan.sql.contains("LIMIT"));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let pattern = ResolvedPattern {
            filter: Some(ObjectFilter::regex("(unclosed", "")),
            ..Default::default()
        };
        assert!(plan(Dialect::Sqlite, &pattern, 10).is_err());
    }

    #[test]
    fn compiled_filters_match_nodes() {
        let f = ObjectFilter::regex("^a.b$", "s").compile().unwrap();
        assert!(f.matches(&literal("a\nb")));
        let f = ObjectFilter::regex("HELLO", "i").compile().unwrap();
        assert!(f.matches(&literal("say hello")));
        let f = ObjectFilter::ILike("al%c_".into()).compile().unwrap();
        assert!(f.matches(&literal("ALICE")));
        assert!(!f.matches(&literal("xalice")));
        assert!(ObjectFilter::regex("a", "q").compile().is_err());
    }
}
