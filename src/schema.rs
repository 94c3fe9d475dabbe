//! Table schema introspection and caching
//!
//! Column metadata is read from the system catalog the first time a table is
//! used and kept for the lifetime of the cache. Entries are never invalidated;
//! a failed introspection is not cached, so the next use retries it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sqlx::Row;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::connection::Connector;
use crate::error::{Result, SyncError};
use crate::sql::sanitize::{quote_table_name, validate_table_name};
use crate::types::ColumnKind;

/// Catalog query listing live columns of one relation in physical order
const INTROSPECT_SQL: &str = "SELECT a.attname::text AS name, \
        format_type(a.atttypid, a.atttypmod) AS data_type, \
        pg_get_expr(d.adbin, d.adrelid) AS default_value, \
        a.attnotnull AS not_null \
    FROM pg_attribute a \
    LEFT JOIN pg_attrdef d ON a.attrelid = d.adrelid AND a.attnum = d.adnum \
    WHERE a.attrelid = $1::text::regclass AND a.attnum > 0 AND NOT a.attisdropped \
    ORDER BY a.attnum";

/// Metadata for one table column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Declared type as rendered by `format_type`, e.g. `character varying(64)`
    #[serde(rename = "type")]
    pub data_type: String,
    /// Default expression, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(rename = "notNull", default)]
    pub not_null: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            default: None,
            not_null: false,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn kind(&self) -> ColumnKind {
        ColumnKind::from_declared_type(&self.data_type)
    }
}

/// Ordered column set of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether a field name matches a declared column
    pub fn is_known(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// True iff the table declares `column_name` with type hstore
    pub fn has_extension_column(&self, column_name: &str) -> bool {
        self.column(column_name)
            .is_some_and(|c| c.kind() == ColumnKind::Hstore)
    }

    /// Select list covering every column, with non-native types cast to text
    pub fn projection(&self) -> String {
        if self.columns.is_empty() {
            return "*".to_string();
        }
        self.columns
            .iter()
            .map(|c| c.kind().projection(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Per-table memo of column metadata, shared by all operations of a store
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<Arc<TableSchema>>>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, table: &str) -> Arc<OnceCell<Arc<TableSchema>>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.entry(table.to_string()).or_default().clone()
    }

    /// Columns of `table`, introspecting on first use
    ///
    /// Concurrent first uses of the same table share one introspection query.
    pub async fn columns_for(&self, connector: &Connector, table: &str) -> Result<Arc<TableSchema>> {
        validate_table_name(table).map_err(SyncError::Validation)?;

        let cell = self.cell(table);
        if let Some(schema) = cell.get() {
            debug!(table, "schema cache hit");
            return Ok(schema.clone());
        }

        let schema = cell
            .get_or_try_init(|| async {
                debug!(table, "schema cache miss, introspecting");
                match introspect(connector, table).await {
                    Ok(schema) => Ok(Arc::new(schema)),
                    Err(e) => {
                        warn!(table, error = %e, "schema introspection failed");
                        Err(e)
                    }
                }
            })
            .await?;

        Ok(schema.clone())
    }

    /// Cached columns, without touching the database
    pub fn get(&self, table: &str) -> Option<Arc<TableSchema>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(table).and_then(|cell| cell.get().cloned())
    }

    /// Seed the cache with known metadata; an existing entry is kept
    pub fn prime(&self, schema: TableSchema) -> Arc<TableSchema> {
        let cell = self.cell(&schema.table);
        let schema = Arc::new(schema);
        match cell.set(schema.clone()) {
            Ok(()) => schema,
            Err(_) => cell.get().cloned().unwrap_or(schema),
        }
    }

    /// Whether the cached schema of `table` has the hstore extension column
    pub fn has_extension_column(&self, table: &str, column_name: &str) -> bool {
        self.get(table)
            .is_some_and(|s| s.has_extension_column(column_name))
    }

    /// Number of tables with cached metadata
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn introspect(connector: &Connector, table: &str) -> Result<TableSchema> {
    let relation = quote_table_name(table);
    let mut conn = connector.connect().await?;

    let rows = connector
        .bounded(sqlx::query(INTROSPECT_SQL).bind(&relation).fetch_all(&mut conn))
        .await;
    connector.release(conn).await;

    let columns = rows?
        .iter()
        .map(|row| -> Result<ColumnDescriptor> {
            Ok(ColumnDescriptor {
                name: row.try_get("name")?,
                data_type: row.try_get("data_type")?,
                default: row.try_get("default_value")?,
                not_null: row.try_get("not_null")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(table, columns = columns.len(), "introspected table");
    Ok(TableSchema::new(table, columns))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_schema() -> TableSchema {
        TableSchema::new(
            "test_hstore",
            vec![
                ColumnDescriptor::new("id", "integer")
                    .with_default("nextval('test_hstore_id_seq'::regclass)")
                    .not_null(),
                ColumnDescriptor::new("one", "character varying(64)"),
                ColumnDescriptor::new("two", "integer"),
                ColumnDescriptor::new("attributes", "hstore"),
            ],
        )
    }

    #[test]
    fn test_known_columns() {
        let schema = test_schema();
        assert!(schema.is_known("id"));
        assert!(schema.is_known("one"));
        assert!(!schema.is_known("three"));
        assert_eq!(schema.column("two").unwrap().kind(), ColumnKind::Integer);
    }

    #[test]
    fn test_has_extension_column_requires_hstore_type() {
        assert!(test_schema().has_extension_column("attributes"));

        let text_attributes = TableSchema::new(
            "t",
            vec![ColumnDescriptor::new("attributes", "text")],
        );
        assert!(!text_attributes.has_extension_column("attributes"));
        assert!(!test_schema().has_extension_column("extra"));
    }

    #[test]
    fn test_projection() {
        assert_eq!(
            test_schema().projection(),
            "\"id\", \"one\", \"two\", \"attributes\"::text AS \"attributes\""
        );
        assert_eq!(TableSchema::new("t", vec![]).projection(), "*");
    }

    #[test]
    fn test_descriptor_serialization() {
        let json = serde_json::to_value(ColumnDescriptor::new("one", "text")).unwrap();
        assert_eq!(json, serde_json::json!({"name": "one", "type": "text", "notNull": false}));
    }

    #[test]
    fn test_cache_prime_and_get() {
        let cache = SchemaCache::new();
        assert!(cache.is_empty());
        assert!(cache.get("test_hstore").is_none());

        cache.prime(test_schema());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("test_hstore").unwrap().columns.len(), 4);
        assert!(cache.has_extension_column("test_hstore", "attributes"));
        assert!(!cache.has_extension_column("other", "attributes"));
    }

    #[test]
    fn test_prime_keeps_existing_entry() {
        let cache = SchemaCache::new();
        cache.prime(test_schema());

        let kept = cache.prime(TableSchema::new("test_hstore", vec![]));

        assert_eq!(kept.columns.len(), 4);
        assert_eq!(cache.get("test_hstore").unwrap().columns.len(), 4);
    }

    #[tokio::test]
    async fn test_columns_for_uses_cached_entry() {
        // Unconfigured connector: any database access would fail
        let connector = Connector::new(&crate::config::StoreConfig::builder().build());
        let cache = SchemaCache::new();
        cache.prime(test_schema());

        let schema = cache.columns_for(&connector, "test_hstore").await.unwrap();
        assert_eq!(schema.table, "test_hstore");
    }

    #[tokio::test]
    async fn test_columns_for_failure_is_not_cached() {
        let connector = Connector::new(&crate::config::StoreConfig::builder().build());
        let cache = SchemaCache::new();

        let err = cache.columns_for(&connector, "test").await.unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
        assert!(cache.get("test").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_columns_for_rejects_bad_table_name() {
        let connector = Connector::new(&crate::config::StoreConfig::builder().build());
        let cache = SchemaCache::new();

        let err = cache
            .columns_for(&connector, "test; DROP TABLE test")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }
}
