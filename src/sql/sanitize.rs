//! SQL Identifier and Literal Sanitization Utilities
//!
//! Table and column names come from callers and from the catalog, so every
//! name is quoted before it reaches statement text.

use std::sync::LazyLock;

use regex::Regex;

static TABLE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*)?$")
        .expect("table name pattern is valid")
});

/// Quote a SQL identifier to make it safe for use in queries
///
/// # Example
/// ```
/// use pg_record_sync::sql::quote_identifier;
///
/// assert_eq!(quote_identifier("my_table"), "\"my_table\"");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    let escaped = identifier.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Quote a possibly schema-qualified table name (`schema.table`)
pub fn quote_table_name(name: &str) -> String {
    name.split('.')
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(".")
}

/// Render a string as a single-quoted SQL literal, doubling embedded quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Validate a table name supplied by the caller
///
/// Accepts `table` or `schema.table`, where each part starts with a letter or
/// underscore and contains only letters, digits, `_` and `$`.
///
/// # Example
/// ```
/// use pg_record_sync::sql::validate_table_name;
///
/// assert!(validate_table_name("products").is_ok());
/// assert!(validate_table_name("public.products").is_ok());
/// assert!(validate_table_name("products; DROP TABLE x").is_err());
/// ```
pub fn validate_table_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Table name cannot be empty".to_string());
    }

    if !TABLE_NAME_RE.is_match(name) {
        return Err(format!(
            "Table name '{}' is invalid. Use letters, digits and underscores, optionally qualified as schema.table.",
            name
        ));
    }

    Ok(())
}
