//! Native function push-down.
//!
//! A query evaluator that wants to run a function inside the database asks
//! the [`FunctionRegistry`] for it, checks [`NativeFunction::is_supported`]
//! for the active dialect and then renders the SQL fragment with
//! [`NativeFunction::native`]. Unsupported combinations are errors, so the
//! evaluator can fall back to in-memory evaluation.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::error::DialectError;

use super::dialect::{Dialect, ValueType};

/// A function that can be rendered as dialect SQL.
pub trait NativeFunction: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_supported(&self, dialect: Dialect) -> bool;

    /// Render the SQL fragment for already-rendered argument expressions.
    fn native(&self, dialect: Dialect, args: &[&str]) -> Result<String, DialectError>;

    /// Declared types of the arguments, in order.
    fn argument_types(&self) -> &'static [ValueType];

    fn return_type(&self) -> ValueType;

    /// Accepted argument counts.
    fn arity(&self) -> RangeInclusive<usize> {
        let n = self.argument_types().len();
        n..=n
    }
}

fn check(
    f: &dyn NativeFunction,
    dialect: Dialect,
    args: &[&str],
) -> Result<(), DialectError> {
    let arity = f.arity();
    if !arity.contains(&args.len()) {
        let expected = if arity.start() == arity.end() {
            arity.start().to_string()
        } else if *arity.end() == usize::MAX {
            format!("at least {}", arity.start())
        } else {
            format!("{}..={}", arity.start(), arity.end())
        };
        return Err(DialectError::Arity {
            function: f.name().to_string(),
            expected,
            actual: args.len(),
        });
    }
    if !f.is_supported(dialect) {
        return Err(dialect.unsupported(format!("function {}", f.name())));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Built-in functions
// ---------------------------------------------------------------------------

/// `regex(text, pattern[, flags])`. Flags are passed as bare letters.
pub struct RegexFn;

impl NativeFunction for RegexFn {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn is_supported(&self, _dialect: Dialect) -> bool {
        true
    }

    fn native(&self, dialect: Dialect, args: &[&str]) -> Result<String, DialectError> {
        check(self, dialect, args)?;
        dialect.regexp_expression(args[0], args[1], args.get(2).copied().unwrap_or(""))
    }

    fn argument_types(&self) -> &'static [ValueType] {
        &[ValueType::String, ValueType::String, ValueType::String]
    }

    fn return_type(&self) -> ValueType {
        ValueType::Boolean
    }

    fn arity(&self) -> RangeInclusive<usize> {
        2..=3
    }
}

pub struct ConcatFn;

impl NativeFunction for ConcatFn {
    fn name(&self) -> &'static str {
        "concat"
    }

    fn is_supported(&self, _dialect: Dialect) -> bool {
        true
    }

    fn native(&self, dialect: Dialect, args: &[&str]) -> Result<String, DialectError> {
        check(self, dialect, args)?;
        Ok(dialect.concat(args))
    }

    fn argument_types(&self) -> &'static [ValueType] {
        &[ValueType::String]
    }

    fn return_type(&self) -> ValueType {
        ValueType::String
    }

    fn arity(&self) -> RangeInclusive<usize> {
        1..=usize::MAX
    }
}

/// Single-argument string functions that are spelled the same everywhere
/// except for `strlen` on SQLite.
pub struct StringFn {
    name: &'static str,
    sql: &'static str,
    returns: ValueType,
}

impl StringFn {
    pub const LCASE: StringFn = StringFn {
        name: "lcase",
        sql: "LOWER",
        returns: ValueType::String,
    };
    pub const UCASE: StringFn = StringFn {
        name: "ucase",
        sql: "UPPER",
        returns: ValueType::String,
    };
    pub const STRLEN: StringFn = StringFn {
        name: "strlen",
        sql: "CHAR_LENGTH",
        returns: ValueType::Integer,
    };
}

impl NativeFunction for StringFn {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_supported(&self, _dialect: Dialect) -> bool {
        true
    }

    fn native(&self, dialect: Dialect, args: &[&str]) -> Result<String, DialectError> {
        check(self, dialect, args)?;
        let sql = match (self.name, dialect) {
            ("strlen", Dialect::Sqlite) => "LENGTH",
            _ => self.sql,
        };
        Ok(format!("{sql}({})", args[0]))
    }

    fn argument_types(&self) -> &'static [ValueType] {
        &[ValueType::String]
    }

    fn return_type(&self) -> ValueType {
        self.returns
    }
}

/// `contains(haystack, needle)`.
pub struct ContainsFn;

impl NativeFunction for ContainsFn {
    fn name(&self) -> &'static str {
        "contains"
    }

    fn is_supported(&self, _dialect: Dialect) -> bool {
        true
    }

    fn native(&self, dialect: Dialect, args: &[&str]) -> Result<String, DialectError> {
        check(self, dialect, args)?;
        let (haystack, needle) = (args[0], args[1]);
        Ok(match dialect {
            Dialect::PostgreSql => format!("POSITION({needle} IN {haystack}) > 0"),
            Dialect::MySql | Dialect::H2 => format!("LOCATE({needle}, {haystack}) > 0"),
            Dialect::Sqlite => format!("INSTR({haystack}, {needle}) > 0"),
        })
    }

    fn argument_types(&self) -> &'static [ValueType] {
        &[ValueType::String, ValueType::String]
    }

    fn return_type(&self) -> ValueType {
        ValueType::Boolean
    }
}

/// `group_concat(value[, separator])`; the separator is a bare string.
pub struct GroupConcatFn {
    pub distinct: bool,
}

impl NativeFunction for GroupConcatFn {
    fn name(&self) -> &'static str {
        if self.distinct {
            "group_concat_distinct"
        } else {
            "group_concat"
        }
    }

    fn is_supported(&self, _dialect: Dialect) -> bool {
        true
    }

    fn native(&self, dialect: Dialect, args: &[&str]) -> Result<String, DialectError> {
        check(self, dialect, args)?;
        dialect.group_concat(args[0], args.get(1).copied().unwrap_or(" "), self.distinct)
    }

    fn argument_types(&self) -> &'static [ValueType] {
        &[ValueType::String, ValueType::String]
    }

    fn return_type(&self) -> ValueType {
        ValueType::String
    }

    fn arity(&self) -> RangeInclusive<usize> {
        1..=2
    }
}

/// `fulltext(text, query)`: natural-language full-text match.
pub struct FullTextFn;

impl NativeFunction for FullTextFn {
    fn name(&self) -> &'static str {
        "fulltext"
    }

    fn is_supported(&self, dialect: Dialect) -> bool {
        matches!(dialect, Dialect::PostgreSql | Dialect::MySql)
    }

    fn native(&self, dialect: Dialect, args: &[&str]) -> Result<String, DialectError> {
        check(self, dialect, args)?;
        let (text, query) = (args[0], args[1]);
        match dialect {
            Dialect::PostgreSql => Ok(format!("to_tsvector({text}) @@ plainto_tsquery({query})")),
            Dialect::MySql => Ok(format!("MATCH({text}) AGAINST({query} IN NATURAL LANGUAGE MODE)")),
            other => Err(other.unsupported("function fulltext")),
        }
    }

    fn argument_types(&self) -> &'static [ValueType] {
        &[ValueType::String, ValueType::String]
    }

    fn return_type(&self) -> ValueType {
        ValueType::Boolean
    }
}

/// `geo_within(geometry, region)` over WKT text.
pub struct GeoWithinFn;

impl NativeFunction for GeoWithinFn {
    fn name(&self) -> &'static str {
        "geo_within"
    }

    fn is_supported(&self, dialect: Dialect) -> bool {
        dialect == Dialect::PostgreSql
    }

    fn native(&self, dialect: Dialect, args: &[&str]) -> Result<String, DialectError> {
        check(self, dialect, args)?;
        Ok(format!(
            "ST_Within(ST_GeomFromText({}), ST_GeomFromText({}))",
            args[0], args[1]
        ))
    }

    fn argument_types(&self) -> &'static [ValueType] {
        &[ValueType::String, ValueType::String]
    }

    fn return_type(&self) -> ValueType {
        ValueType::Boolean
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Native functions by name.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<&'static str, Arc<dyn NativeFunction>>,
}

impl FunctionRegistry {
    /// A registry holding every built-in function.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(RegexFn));
        registry.register(Arc::new(ConcatFn));
        registry.register(Arc::new(StringFn::LCASE));
        registry.register(Arc::new(StringFn::UCASE));
        registry.register(Arc::new(StringFn::STRLEN));
        registry.register(Arc::new(ContainsFn));
        registry.register(Arc::new(GroupConcatFn { distinct: false }));
        registry.register(Arc::new(GroupConcatFn { distinct: true }));
        registry.register(Arc::new(FullTextFn));
        registry.register(Arc::new(GeoWithinFn));
        registry
    }

    /// Add or replace a function.
    pub fn register(&mut self, function: Arc<dyn NativeFunction>) {
        self.functions.insert(function.name(), function);
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn NativeFunction>, DialectError> {
        self.functions
            .get(name)
            .ok_or_else(|| DialectError::UnknownFunction {
                name: name.to_string(),
            })
    }

    /// Render `name(args)` for `dialect`.
    pub fn native(&self, dialect: Dialect, name: &str, args: &[&str]) -> Result<String, DialectError> {
        self.get(name)?.native(dialect, args)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.functions.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = FunctionRegistry::with_builtins();
        for name in ["regex", "concat", "lcase", "ucase", "strlen", "contains", "group_concat", "fulltext", "geo_within"] {
            assert!(registry.get(name).is_ok(), "{name}");
        }
        assert!(matches!(
            registry.get("soundex"),
            Err(DialectError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn fulltext_and_geo_are_dialect_specific() {
        let registry = FunctionRegistry::with_builtins();
        assert!(registry.native(Dialect::PostgreSql, "fulltext", &["o.svalue", "?"]).unwrap().contains("@@"));
        assert!(registry.native(Dialect::MySql, "fulltext", &["o.svalue", "?"]).unwrap().starts_with("MATCH"));
        assert!(matches!(
            registry.native(Dialect::Sqlite, "fulltext", &["a", "b"]),
            Err(DialectError::UnsupportedFeature { .. })
        ));
        assert!(matches!(
            registry.native(Dialect::H2, "geo_within", &["a", "b"]),
            Err(DialectError::UnsupportedFeature { .. })
        ));
        assert!(registry.get("geo_within").unwrap().is_supported(Dialect::PostgreSql));
    }

    #[test]
    fn regex_function_respects_flag_support() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(
            registry.native(Dialect::PostgreSql, "regex", &["a", "?", "i"]).unwrap(),
            "a ~* ?"
        );
        assert!(registry.native(Dialect::MySql, "regex", &["a", "?", "m"]).is_err());
    }

    #[test]
    fn arity_is_checked() {
        let registry = FunctionRegistry::with_builtins();
        let err = registry.native(Dialect::Sqlite, "lcase", &[]).unwrap_err();
        assert!(matches!(err, DialectError::Arity { actual: 0, .. }));
        assert_eq!(
            registry.native(Dialect::MySql, "concat", &["a", "b", "c"]).unwrap(),
            "CONCAT(a, b, c)"
        );
    }

    #[test]
    fn per_dialect_spelling() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(registry.native(Dialect::Sqlite, "strlen", &["x"]).unwrap(), "LENGTH(x)");
        assert_eq!(registry.native(Dialect::H2, "strlen", &["x"]).unwrap(), "CHAR_LENGTH(x)");
        assert_eq!(
            registry.native(Dialect::Sqlite, "contains", &["a", "b"]).unwrap(),
            "INSTR(a, b) > 0"
        );
        assert_eq!(registry.get("strlen").unwrap().return_type(), ValueType::Integer);
    }
}
