//! Nested collection scopes
//!
//! A collection addressed as `/parent/<id>/child` holds the rows of `child`
//! whose `parent_id` column equals `<id>`. Records created through the scope
//! get that foreign key assigned.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::record::Record;
use crate::schema::TableSchema;
use crate::sql::filter::field_predicate;

/// Foreign key restriction of a nested collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    /// Column referencing the parent, e.g. `reltest_id`
    pub foreign_key: String,
    /// Identifier of the parent row
    pub parent_id: Value,
}

impl Scope {
    pub fn new(foreign_key: impl Into<String>, parent_id: impl Into<Value>) -> Self {
        Self {
            foreign_key: foreign_key.into(),
            parent_id: parent_id.into(),
        }
    }

    /// Split a collection path into its table and optional scope
    ///
    /// `/test` is the whole table. `/reltest/1/test` is the rows of `test`
    /// with `reltest_id = 1`. A numeric parent segment becomes a number.
    ///
    /// # Example
    /// ```
    /// use pg_record_sync::Scope;
    ///
    /// let (table, scope) = Scope::from_path("/reltest/1/test_rel").unwrap();
    /// assert_eq!(table, "test_rel");
    /// assert_eq!(scope, Some(Scope::new("reltest_id", 1)));
    /// ```
    pub fn from_path(path: &str) -> Result<(String, Option<Scope>)> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match segments.as_slice() {
            [table] if !table.is_empty() => Ok((table.to_string(), None)),
            [parent, id, table] if [parent, id, table].iter().all(|s| !s.is_empty()) => {
                let parent_id = id
                    .parse::<i64>()
                    .map(Value::from)
                    .unwrap_or_else(|_| Value::String(id.to_string()));
                let scope = Scope::new(format!("{}_id", parent), parent_id);
                Ok((table.to_string(), Some(scope)))
            }
            _ => Err(SyncError::validation(format!(
                "Unsupported collection path '{}'",
                path
            ))),
        }
    }

    /// Assign the parent identifier to a record's foreign key field
    pub fn stamp(&self, record: &mut Record) {
        record.set(self.foreign_key.clone(), self.parent_id.clone());
    }

    /// WHERE predicate restricting `schema` to this scope
    ///
    /// The foreign key must be a real column of the table.
    pub fn predicate(&self, schema: &TableSchema) -> Result<String> {
        if !schema.is_known(&self.foreign_key) {
            return Err(SyncError::validation(format!(
                "Scope column '{}' is not a column of '{}'",
                self.foreign_key, schema.table
            )));
        }
        field_predicate(schema, "", &self.foreign_key, &self.parent_id)
    }
}
