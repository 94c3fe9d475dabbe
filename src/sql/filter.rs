//! Filter building for SQL WHERE clauses
//!
//! Converts a caller-supplied [`Filter`] into an extra WHERE fragment that is
//! appended to a read or collection query.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};
use crate::schema::TableSchema;
use crate::sql::sanitize::{quote_identifier, quote_literal};
use crate::types::{ColumnKind, text_of};

/// Additional predicate for reads
///
/// `Raw` fragments are inserted into the statement verbatim. They are never
/// quoted or parameterized, so they must not carry untrusted input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    /// SQL fragments, ANDed together
    Raw(Vec<String>),
    /// Field/value equality pairs, ANDed together
    Fields(Map<String, Value>),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::Fields(Map::new())
    }
}

impl Filter {
    /// Filter from raw SQL fragments
    pub fn raw<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::Raw(fragments.into_iter().map(Into::into).collect())
    }

    /// Empty field filter, to be extended with [`Filter::eq`]
    pub fn fields() -> Self {
        Filter::Fields(Map::new())
    }

    /// Add an equality pair; turns a raw filter into a field filter
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = match self {
            Filter::Fields(map) => map,
            Filter::Raw(_) => Map::new(),
        };
        map.insert(field.into(), value.into());
        Filter::Fields(map)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Filter::Raw(fragments) => fragments.iter().all(|f| f.trim().is_empty()),
            Filter::Fields(map) => map.is_empty(),
        }
    }
}

impl From<Vec<String>> for Filter {
    fn from(fragments: Vec<String>) -> Self {
        Filter::Raw(fragments)
    }
}

impl From<Vec<&str>> for Filter {
    fn from(fragments: Vec<&str>) -> Self {
        Filter::raw(fragments)
    }
}

impl From<Map<String, Value>> for Filter {
    fn from(map: Map<String, Value>) -> Self {
        Filter::Fields(map)
    }
}

/// Render a filter as `prefix` followed by its ANDed predicates
///
/// An empty filter renders as the empty string, without the prefix.
///
/// # Example
/// ```
/// use pg_record_sync::schema::{ColumnDescriptor, TableSchema};
/// use pg_record_sync::sql::filter::{build_filter, Filter};
///
/// let schema = TableSchema::new("test", vec![
///     ColumnDescriptor::new("one", "text"),
///     ColumnDescriptor::new("two", "integer"),
/// ]);
/// let filter = Filter::fields().eq("one", "foo").eq("two", 2);
///
/// let sql = build_filter(&filter, &schema, "attributes", " WHERE ").unwrap();
/// assert_eq!(sql, " WHERE \"one\" = 'foo' AND \"two\" = 2");
/// ```
pub fn build_filter(
    filter: &Filter,
    schema: &TableSchema,
    extension_column: &str,
    prefix: &str,
) -> Result<String> {
    let predicates = build_predicates(filter, schema, extension_column)?;
    Ok(join_predicates(&predicates, prefix))
}

/// `prefix` followed by the predicates joined with AND, or nothing when empty
pub fn join_predicates(predicates: &[String], prefix: &str) -> String {
    if predicates.is_empty() {
        return String::new();
    }
    format!("{}{}", prefix, predicates.join(" AND "))
}

/// The ANDed predicates of a filter, unjoined
pub fn build_predicates(
    filter: &Filter,
    schema: &TableSchema,
    extension_column: &str,
) -> Result<Vec<String>> {
    match filter {
        // parenthesized so an OR inside a fragment cannot escape the AND chain
        Filter::Raw(fragments) => Ok(fragments
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .map(|f| format!("({})", f))
            .collect()),
        Filter::Fields(map) => map
            .iter()
            .map(|(field, value)| field_predicate(schema, extension_column, field, value))
            .collect(),
    }
}

pub(crate) fn field_predicate(
    schema: &TableSchema,
    extension_column: &str,
    field: &str,
    value: &Value,
) -> Result<String> {
    if let Some(column) = schema.column(field) {
        let lhs = quote_identifier(&column.name);
        if value.is_null() {
            return Ok(format!("{} IS NULL", lhs));
        }
        // json has no equality operator
        if matches!(column.kind(), ColumnKind::Json | ColumnKind::Jsonb) {
            return Ok(format!(
                "{}::jsonb = {}::jsonb",
                lhs,
                quote_literal(&value.to_string())
            ));
        }
        let rendered = match value {
            _ if column.kind().is_text() => quote_literal(&text_of(value)),
            Value::Bool(_) | Value::Number(_) => value.to_string(),
            Value::String(s) => quote_literal(s),
            structured => quote_literal(&structured.to_string()),
        };
        return Ok(format!("{} = {}", lhs, rendered));
    }

    if schema.has_extension_column(extension_column) {
        let lhs = format!(
            "{} -> {}",
            quote_identifier(extension_column),
            quote_literal(field)
        );
        return Ok(match value {
            Value::Null => format!("{} IS NULL", lhs),
            other => format!("{} = {}", lhs, quote_literal(&text_of(other))),
        });
    }

    Err(SyncError::validation(format!(
        "Filter field '{}' is not a column of '{}'",
        field, schema.table
    )))
}
