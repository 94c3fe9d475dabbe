//! RecordStore - Main entry point for record synchronization
//!
//! Translates create / read / update / delete / read-collection calls on
//! records into one SQL statement each. Field names are checked against the
//! table's cached column metadata; fields without a column go to the hstore
//! extension column when the table declares one.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use tracing::{debug, instrument};

use crate::config::StoreConfig;
use crate::connection::Connector;
use crate::error::{Result, SyncError};
use crate::extension;
use crate::record::Record;
use crate::schema::{SchemaCache, TableSchema};
use crate::scope::Scope;
use crate::sql::filter::{Filter, build_filter, build_predicates, join_predicates};
use crate::sql::statement::{Partition, Statement, StatementBuilder, partition};

/// Operation requested by the host framework's sync hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMethod {
    Create,
    Read,
    Update,
    Delete,
}

impl FromStr for SyncMethod {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(SyncMethod::Create),
            "read" => Ok(SyncMethod::Read),
            "update" | "patch" => Ok(SyncMethod::Update),
            "delete" => Ok(SyncMethod::Delete),
            other => Err(SyncError::validation(format!(
                "Unknown sync method '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for SyncMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncMethod::Create => "create",
            SyncMethod::Read => "read",
            SyncMethod::Update => "update",
            SyncMethod::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Record persistence on top of PostgreSQL
///
/// Holds no connection between calls: each operation opens one, runs a single
/// statement and closes it. Column metadata is shared through a [`SchemaCache`].
pub struct RecordStore {
    /// Connection provider
    connector: Connector,
    /// Column metadata per table
    schemas: Arc<SchemaCache>,
    /// Store configuration
    config: StoreConfig,
}

impl RecordStore {
    /// Create a store with its own schema cache
    ///
    /// No connection is made until the first operation.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_schema_cache(config, Arc::new(SchemaCache::new()))
    }

    /// Create a store that shares an existing schema cache
    pub fn with_schema_cache(config: StoreConfig, schemas: Arc<SchemaCache>) -> Self {
        Self {
            connector: Connector::new(&config),
            schemas,
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn schema_cache(&self) -> &Arc<SchemaCache> {
        &self.schemas
    }

    /// Column metadata for a table, introspected on first use
    pub async fn columns_for(&self, table: &str) -> Result<Arc<TableSchema>> {
        self.schemas.columns_for(&self.connector, table).await
    }

    /// Whether the table declares the hstore extension column
    pub async fn has_extension_column(&self, table: &str) -> Result<bool> {
        Ok(self
            .columns_for(table)
            .await?
            .has_extension_column(&self.config.extension_column))
    }

    // =========================================================================
    // Record Operations
    // =========================================================================

    /// Insert a record and return the stored row
    ///
    /// Unknown fields go to the extension column if the table has one and
    /// are dropped otherwise.
    #[instrument(skip(self, record), fields(operation = "create", table = %record.table))]
    pub async fn create(&self, record: &Record) -> Result<Record> {
        let schema = self.columns_for(&record.table).await?;
        let partition = partition(&schema, record.fields(), &self.config.extension_column)?;
        log_dropped(&partition);

        let statement = self.builder(&schema).insert(&partition)?;
        let row = self
            .fetch_optional(statement)
            .await?
            .ok_or_else(|| SyncError::decode("INSERT returned no row"))?;

        self.to_record(&schema, &row)
    }

    /// Fetch a record by identifier, optionally narrowed by a filter
    #[instrument(skip(self, record, filter), fields(operation = "read", table = %record.table))]
    pub async fn read(&self, record: &Record, filter: Option<&Filter>) -> Result<Record> {
        let id = require_id(record)?;
        let schema = self.columns_for(&record.table).await?;

        let fragment = match filter {
            Some(filter) => build_filter(filter, &schema, &self.config.extension_column, " AND ")?,
            None => String::new(),
        };

        let statement = self.builder(&schema).select_by_id(id, &fragment)?;
        match self.fetch_optional(statement).await? {
            Some(row) => self.to_record(&schema, &row),
            None => Err(not_found(record, id)),
        }
    }

    /// Write a record's fields to its existing row
    ///
    /// Extension fields, when present, replace the stored extension value.
    #[instrument(skip(self, record), fields(operation = "update", table = %record.table))]
    pub async fn update(&self, record: &Record) -> Result<Record> {
        let id = require_id(record)?;
        let schema = self.columns_for(&record.table).await?;
        let partition = partition(&schema, record.fields(), &self.config.extension_column)?;
        log_dropped(&partition);

        let statement = self.builder(&schema).update(&partition, id)?;
        match self.fetch_optional(statement).await? {
            Some(row) => self.to_record(&schema, &row),
            None => Err(not_found(record, id)),
        }
    }

    /// Delete a record's row by identifier
    #[instrument(skip(self, record), fields(operation = "delete", table = %record.table))]
    pub async fn delete(&self, record: &Record) -> Result<()> {
        let id = require_id(record)?;
        let schema = self.columns_for(&record.table).await?;

        let statement = self.builder(&schema).delete(id)?;
        match self.fetch_optional(statement).await? {
            Some(_) => Ok(()),
            None => Err(not_found(record, id)),
        }
    }

    /// Fetch every row of a table, ordered by identifier
    ///
    /// Rows are decoded like single reads, extension fields included.
    #[instrument(skip(self, filter), fields(operation = "read_collection"))]
    pub async fn read_collection(&self, table: &str, filter: Option<&Filter>) -> Result<Vec<Record>> {
        self.collection(table, None, filter).await
    }

    /// Fetch the rows of a table belonging to one parent, ordered by identifier
    ///
    /// The scope predicate is ANDed with the filter.
    #[instrument(skip(self, filter), fields(operation = "read_collection", foreign_key = %scope.foreign_key))]
    pub async fn read_scoped_collection(
        &self,
        table: &str,
        scope: &Scope,
        filter: Option<&Filter>,
    ) -> Result<Vec<Record>> {
        self.collection(table, Some(scope), filter).await
    }

    /// Fetch a collection addressed by path, `/table` or `/parent/<id>/table`
    pub async fn read_collection_at(&self, path: &str, filter: Option<&Filter>) -> Result<Vec<Record>> {
        let (table, scope) = Scope::from_path(path)?;
        self.collection(&table, scope.as_ref(), filter).await
    }

    /// Create a record inside a nested collection, assigning its foreign key
    pub async fn create_in_scope(&self, scope: &Scope, record: &Record) -> Result<Record> {
        let mut record = record.clone();
        scope.stamp(&mut record);
        self.create(&record).await
    }

    /// Create the record when it has no identifier, update it otherwise
    pub async fn save(&self, record: &Record) -> Result<Record> {
        if record.is_new() {
            self.create(record).await
        } else {
            self.update(record).await
        }
    }

    /// Dispatch a sync request; delete yields `None`
    pub async fn sync(
        &self,
        method: SyncMethod,
        record: &Record,
        filter: Option<&Filter>,
    ) -> Result<Option<Record>> {
        match method {
            SyncMethod::Create => self.create(record).await.map(Some),
            SyncMethod::Read => self.read(record, filter).await.map(Some),
            SyncMethod::Update => self.update(record).await.map(Some),
            SyncMethod::Delete => self.delete(record).await.map(|()| None),
        }
    }

    // =========================================================================
    // Helper Methods
    // =========================================================================

    async fn collection(
        &self,
        table: &str,
        scope: Option<&Scope>,
        filter: Option<&Filter>,
    ) -> Result<Vec<Record>> {
        let schema = self.columns_for(table).await?;

        let mut predicates = Vec::new();
        if let Some(scope) = scope {
            predicates.push(scope.predicate(&schema)?);
        }
        if let Some(filter) = filter {
            predicates.extend(build_predicates(
                filter,
                &schema,
                &self.config.extension_column,
            )?);
        }
        let fragment = join_predicates(&predicates, " WHERE ");

        let statement = self.builder(&schema).select_all(&fragment);
        let rows = self.fetch_all(statement).await?;
        debug!(table, rows = rows.len(), "collection fetched");

        rows.iter().map(|row| self.to_record(&schema, row)).collect()
    }

    fn builder<'a>(&'a self, schema: &'a TableSchema) -> StatementBuilder<'a> {
        StatementBuilder::new(schema, &self.config.extension_column)
    }

    async fn fetch_optional(&self, statement: Statement) -> Result<Option<PgRow>> {
        let Statement { sql, params } = statement;
        debug!(%sql, params = params.len(), "executing statement");

        let mut query = sqlx::query(&sql);
        for param in params {
            query = param.bind(query);
        }

        let mut conn = self.connector.connect().await?;
        let row = self.connector.bounded(query.fetch_optional(&mut conn)).await;
        self.connector.release(conn).await;
        row
    }

    async fn fetch_all(&self, statement: Statement) -> Result<Vec<PgRow>> {
        let Statement { sql, params } = statement;
        debug!(%sql, params = params.len(), "executing statement");

        let mut query = sqlx::query(&sql);
        for param in params {
            query = param.bind(query);
        }

        let mut conn = self.connector.connect().await?;
        let rows = self.connector.bounded(query.fetch_all(&mut conn)).await;
        self.connector.release(conn).await;
        rows
    }

    /// Decode a row into a record, merging extension fields under known columns
    fn to_record(&self, schema: &TableSchema, row: &PgRow) -> Result<Record> {
        let extension_column = schema
            .has_extension_column(&self.config.extension_column)
            .then_some(self.config.extension_column.as_str());

        let mut fields = Map::new();
        let mut extension_text = None;

        for column in &schema.columns {
            let value = column.kind().decode(row, &column.name)?;
            if extension_column == Some(column.name.as_str()) {
                if let Value::String(text) = value {
                    extension_text = Some(text);
                }
                continue;
            }
            fields.insert(column.name.clone(), value);
        }

        if let Some(text) = extension_text {
            extension::merge_text(&mut fields, &text, &self.config.extension_column)?;
        }

        Ok(Record::from_fields(schema.table.clone(), fields))
    }
}

fn require_id(record: &Record) -> Result<&Value> {
    record.id().ok_or_else(|| {
        SyncError::validation(format!(
            "Record in '{}' has no identifier",
            record.table
        ))
    })
}

fn not_found(record: &Record, id: &Value) -> SyncError {
    SyncError::not_found(format!("{} with id {}", record.table, id))
}

fn log_dropped(partition: &Partition<'_>) {
    if !partition.dropped.is_empty() {
        debug!(fields = ?partition.dropped, "dropping fields without a column");
    }
}
