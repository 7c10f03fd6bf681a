//! Field names end up inside DDL and DML text, so every name passes through
//! [`validate`] before it reaches SQL and is emitted through [`quote`].

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::error::codes;
use crate::AppError;

pub const MAX_LEN: usize = 63;

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex compiles"));

const INTERNAL_NAMES: &[&str] = &["rowid", "oid", "_rowid_"];

// https://www.sqlite.org/lang_keywords.html
const SQLITE_KEYWORDS: &[&str] = &[
    "ABORT", "ACTION", "ADD", "AFTER", "ALL", "ALTER", "ALWAYS", "ANALYZE", "AND", "AS", "ASC",
    "ATTACH", "AUTOINCREMENT", "BEFORE", "BEGIN", "BETWEEN", "BY", "CASCADE", "CASE", "CAST",
    "CHECK", "COLLATE", "COLUMN", "COMMIT", "CONFLICT", "CONSTRAINT", "CREATE", "CROSS",
    "CURRENT", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "DATABASE", "DEFAULT",
    "DEFERRABLE", "DEFERRED", "DELETE", "DESC", "DETACH", "DISTINCT", "DO", "DROP", "EACH",
    "ELSE", "END", "ESCAPE", "EXCEPT", "EXCLUDE", "EXCLUSIVE", "EXISTS", "EXPLAIN", "FAIL",
    "FILTER", "FIRST", "FOLLOWING", "FOR", "FOREIGN", "FROM", "FULL", "GENERATED", "GLOB",
    "GROUP", "GROUPS", "HAVING", "IF", "IGNORE", "IMMEDIATE", "IN", "INDEX", "INDEXED",
    "INITIALLY", "INNER", "INSERT", "INSTEAD", "INTERSECT", "INTO", "IS", "ISNULL", "JOIN", "KEY",
    "LAST", "LEFT", "LIKE", "LIMIT", "MATCH", "MATERIALIZED", "NATURAL", "NO", "NOT", "NOTHING",
    "NOTNULL", "NULL", "NULLS", "OF", "OFFSET", "ON", "OR", "ORDER", "OTHERS", "OUTER", "OVER",
    "PARTITION", "PLAN", "PRAGMA", "PRECEDING", "PRIMARY", "QUERY", "RAISE", "RANGE",
    "RECURSIVE", "REFERENCES", "REGEXP", "REINDEX", "RELEASE", "RENAME", "REPLACE", "RESTRICT",
    "RETURNING", "RIGHT", "ROLLBACK", "ROW", "ROWS", "SAVEPOINT", "SELECT", "SET", "TABLE",
    "TEMP", "TEMPORARY", "THEN", "TIES", "TO", "TRANSACTION", "TRIGGER", "UNBOUNDED", "UNION",
    "UNIQUE", "UPDATE", "USING", "VACUUM", "VALUES", "VIEW", "VIRTUAL", "WHEN", "WHERE",
    "WINDOW", "WITH", "WITHOUT",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("field name must not be empty")]
    Empty,
    #[error("field name is longer than 63 characters")]
    TooLong,
    #[error("field name may only contain letters, digits and underscores, and must not start with a digit")]
    InvalidCharacters,
    #[error("'{0}' is a reserved word")]
    Reserved(String),
}

impl From<IdentifierError> for AppError {
    fn from(error: IdentifierError) -> Self {
        let mut app_error = AppError::new(codes::INVALID_IDENTIFIER, error.to_string());
        if let IdentifierError::Reserved(word) = &error {
            app_error = app_error.with_context("reserved", word.clone());
        }
        app_error
    }
}

/// Check `name` against the identifier grammar used for field names.
pub fn validate(name: &str) -> Result<(), IdentifierError> {
    if name.is_empty() {
        return Err(IdentifierError::Empty);
    }
    if name.len() > MAX_LEN {
        return Err(IdentifierError::TooLong);
    }
    if !IDENT_RE.is_match(name) {
        return Err(IdentifierError::InvalidCharacters);
    }
    let upper = name.to_ascii_uppercase();
    if SQLITE_KEYWORDS.contains(&upper.as_str())
        || INTERNAL_NAMES.iter().any(|n| n.eq_ignore_ascii_case(name))
        || upper.starts_with("SQLITE_")
    {
        return Err(IdentifierError::Reserved(name.to_string()));
    }
    Ok(())
}

pub fn quote(name: &str) -> String {
    let escaped = name.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        for name in ["warranty_months", "_internal", "SKU2", "a"] {
            assert_eq!(validate(name), Ok(()), "{name}");
        }
    }

    #[test]
    fn rejects_injection_shaped_names() {
        assert_eq!(
            validate("x; DROP TABLE products"),
            Err(IdentifierError::InvalidCharacters)
        );
        assert_eq!(validate("a\"b"), Err(IdentifierError::InvalidCharacters));
        assert_eq!(validate("9lives"), Err(IdentifierError::InvalidCharacters));
        assert_eq!(validate("naïve"), Err(IdentifierError::InvalidCharacters));
        assert_eq!(validate(""), Err(IdentifierError::Empty));
        assert_eq!(validate(&"a".repeat(64)), Err(IdentifierError::TooLong));
    }

    #[test]
    fn rejects_reserved_words_case_insensitively() {
        for name in ["select", "Table", "ROWID", "sqlite_master", "order"] {
            assert!(
                matches!(validate(name), Err(IdentifierError::Reserved(_))),
                "{name}"
            );
        }
    }

    #[test]
    fn quote_doubles_embedded_quotes() {
        assert_eq!(quote("price"), "\"price\"");
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }
}
