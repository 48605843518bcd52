//! SQL dialects.
//!
//! Every database the engine can generate SQL for is one variant of the
//! closed [`Dialect`] enum. Each variant answers the full capability surface;
//! features a database lacks are reported through `false` flags or a
//! [`DialectError::UnsupportedFeature`], never through SQL that would fail or,
//! worse, silently ignore part of the request.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DialectError;

/// SQL value types used for casts and native function signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    Integer,
    Double,
    Boolean,
    DateTime,
}

/// Column types used by the schema scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// 64-bit signed ids.
    Id,
    /// Unbounded text.
    Text,
    /// Short indexed text (digests, language tags, type tags).
    Key,
    Double,
    BigInt,
    Boolean,
    /// Millisecond-resolution timestamps.
    Timestamp,
}

/// A relational database flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    PostgreSql,
    MySql,
    H2,
    #[default]
    Sqlite,
}

impl Dialect {
    pub const ALL: [Dialect; 4] = [Dialect::PostgreSql, Dialect::MySql, Dialect::H2, Dialect::Sqlite];

    pub fn name(self) -> &'static str {
        match self {
            Dialect::PostgreSql => "postgresql",
            Dialect::MySql => "mysql",
            Dialect::H2 => "h2",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Identifier of the database driver this dialect talks to.
    pub fn driver_name(self) -> &'static str {
        match self {
            Dialect::PostgreSql => "postgres",
            Dialect::MySql => "mysql",
            Dialect::H2 => "h2",
            Dialect::Sqlite => "rusqlite",
        }
    }

    /// Whether the driver for this dialect is compiled into the crate.
    pub fn is_driver_linked(self) -> bool {
        matches!(self, Dialect::Sqlite)
    }

    /// Whether multi-row batched inserts may be used.
    pub fn is_batch_supported(self) -> bool {
        true
    }

    /// Largest number of bind parameters one statement may carry.
    pub fn max_bind_parameters(self) -> usize {
        match self {
            Dialect::PostgreSql | Dialect::MySql => 65_535,
            Dialect::H2 => 32_767,
            Dialect::Sqlite => 32_766,
        }
    }

    /// Whether result sets can be read page by page from a server-side cursor.
    pub fn supports_cursors(self) -> bool {
        matches!(self, Dialect::PostgreSql | Dialect::Sqlite)
    }

    pub fn supports_arrays(self) -> bool {
        matches!(self, Dialect::PostgreSql | Dialect::H2)
    }

    /// Cheap statement used to check a connection is alive.
    pub fn validation_query(self) -> &'static str {
        "SELECT 1"
    }

    /// Whether a single regex flag (`i`, `s`, `m`, `x`) can be pushed into SQL.
    pub fn is_regexp_flag_supported(self, flag: char) -> bool {
        match self {
            Dialect::PostgreSql | Dialect::MySql => flag == 'i',
            Dialect::H2 => matches!(flag, 'i' | 's' | 'm'),
            Dialect::Sqlite => matches!(flag, 'i' | 's' | 'm' | 'x'),
        }
    }

    /// Whether every flag in `flags` is supported.
    pub fn supports_regexp_flags(self, flags: &str) -> bool {
        flags.chars().all(|f| self.is_regexp_flag_supported(f))
    }

    /// SQL boolean expression matching `text` against the regex `pattern`.
    ///
    /// `text` and `pattern` are SQL expressions (columns or bind markers).
    pub fn regexp_expression(
        self,
        text: &str,
        pattern: &str,
        flags: &str,
    ) -> Result<String, DialectError> {
        if let Some(bad) = flags.chars().find(|f| !self.is_regexp_flag_supported(*f)) {
            return Err(self.unsupported(format!("regex flag '{bad}'")));
        }
        let insensitive = flags.contains('i');
        Ok(match self {
            Dialect::PostgreSql if insensitive => format!("{text} ~* {pattern}"),
            Dialect::PostgreSql => format!("{text} ~ {pattern}"),
            Dialect::MySql => {
                let mode = if insensitive { 'i' } else { 'c' };
                format!("REGEXP_LIKE({text}, {pattern}, '{mode}')")
            }
            Dialect::H2 if flags.is_empty() => format!("REGEXP_LIKE({text}, {pattern})"),
            Dialect::H2 => {
                // H2 spells dotall as 'n'.
                let mode: String = flags.chars().map(|f| if f == 's' { 'n' } else { f }).collect();
                format!("REGEXP_LIKE({text}, {pattern}, '{mode}')")
            }
            Dialect::Sqlite => format!("kiwi_regexp({text}, {pattern}, '{flags}')"),
        })
    }

    /// Case-insensitive `LIKE`.
    pub fn ilike(self, text: &str, pattern: &str) -> String {
        match self {
            Dialect::PostgreSql | Dialect::H2 => format!("{text} ILIKE {pattern}"),
            Dialect::MySql | Dialect::Sqlite => format!("LOWER({text}) LIKE LOWER({pattern})"),
        }
    }

    /// String concatenation of SQL expressions.
    pub fn concat(self, args: &[&str]) -> String {
        match self {
            Dialect::MySql => format!("CONCAT({})", args.join(", ")),
            _ => format!("({})", args.join(" || ")),
        }
    }

    /// String aggregation of `value` joined by the literal `separator`.
    pub fn group_concat(
        self,
        value: &str,
        separator: &str,
        distinct: bool,
    ) -> Result<String, DialectError> {
        let sep = quote_literal(separator);
        let d = if distinct { "DISTINCT " } else { "" };
        Ok(match self {
            Dialect::PostgreSql => format!("STRING_AGG({d}{value}, {sep})"),
            Dialect::MySql | Dialect::H2 => format!("GROUP_CONCAT({d}{value} SEPARATOR {sep})"),
            Dialect::Sqlite if distinct && separator != "," => {
                return Err(self.unsupported("GROUP_CONCAT(DISTINCT ..) with a custom separator"));
            }
            Dialect::Sqlite if distinct => format!("GROUP_CONCAT(DISTINCT {value})"),
            Dialect::Sqlite => format!("GROUP_CONCAT({value}, {sep})"),
        })
    }

    /// Cast an SQL expression to `ty`.
    pub fn cast(self, expr: &str, ty: ValueType) -> String {
        let target = match (self, ty) {
            (Dialect::MySql, ValueType::String) => "CHAR",
            (Dialect::H2, ValueType::String) => "VARCHAR",
            (_, ValueType::String) => "TEXT",
            (Dialect::MySql, ValueType::Integer) => "SIGNED",
            (Dialect::Sqlite, ValueType::Integer) => "INTEGER",
            (_, ValueType::Integer) => "BIGINT",
            (Dialect::PostgreSql, ValueType::Double) => "DOUBLE PRECISION",
            (Dialect::Sqlite, ValueType::Double) => "REAL",
            (_, ValueType::Double) => "DOUBLE",
            (Dialect::MySql, ValueType::Boolean) => "UNSIGNED",
            (Dialect::Sqlite, ValueType::Boolean) => "INTEGER",
            (_, ValueType::Boolean) => "BOOLEAN",
            (Dialect::MySql, ValueType::DateTime) => "DATETIME(3)",
            (Dialect::Sqlite, ValueType::DateTime) => "INTEGER",
            (_, ValueType::DateTime) => "TIMESTAMP",
        };
        format!("CAST({expr} AS {target})")
    }

    /// DDL spelling of a column type.
    pub fn column_type(self, ty: ColumnType) -> &'static str {
        match (self, ty) {
            (Dialect::Sqlite, ColumnType::Id | ColumnType::BigInt) => "INTEGER",
            (_, ColumnType::Id | ColumnType::BigInt) => "BIGINT",
            (Dialect::MySql, ColumnType::Text) => "LONGTEXT",
            (Dialect::H2, ColumnType::Text) => "VARCHAR",
            (_, ColumnType::Text) => "TEXT",
            (_, ColumnType::Key) => "VARCHAR(128)",
            (Dialect::PostgreSql, ColumnType::Double) => "DOUBLE PRECISION",
            (Dialect::Sqlite, ColumnType::Double) => "REAL",
            (_, ColumnType::Double) => "DOUBLE",
            (_, ColumnType::Boolean) => "BOOLEAN",
            (Dialect::PostgreSql, ColumnType::Timestamp) => "TIMESTAMP(3)",
            (Dialect::MySql, ColumnType::Timestamp) => "DATETIME(3)",
            (Dialect::H2, ColumnType::Timestamp) => "TIMESTAMP(3)",
            (Dialect::Sqlite, ColumnType::Timestamp) => "INTEGER",
        }
    }

    pub(crate) fn unsupported(self, feature: impl Into<String>) -> DialectError {
        DialectError::UnsupportedFeature {
            dialect: self.name().to_string(),
            feature: feature.into(),
        }
    }
}

/// Quote a string as an SQL literal.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = DialectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Ok(Dialect::PostgreSql),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "h2" => Ok(Dialect::H2),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            _ => Err(DialectError::UnknownDialect { name: s.to_string() }),
        }
    }
}
