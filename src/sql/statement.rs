//! Statement generation for record operations
//!
//! Builds the parameterized INSERT / SELECT / UPDATE / DELETE text for one
//! table together with its bind parameters. Nothing here touches the
//! database, so every statement shape can be checked in isolation.

use serde_json::{Map, Value};

use crate::error::{Result, SyncError};
use crate::extension;
use crate::record::ID_FIELD;
use crate::schema::{ColumnDescriptor, TableSchema};
use crate::sql::sanitize::{quote_identifier, quote_table_name};
use crate::types::SqlParam;

/// SQL text plus the parameters for its positional placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// Record fields split against a table's columns
#[derive(Debug)]
pub struct Partition<'a> {
    /// Fields with a matching column, in record order
    pub known: Vec<(&'a ColumnDescriptor, &'a Value)>,
    /// Fields routed to the extension column
    pub extension: Map<String, Value>,
    /// The extension column, when the table has one
    pub extension_column: Option<&'a ColumnDescriptor>,
    /// Fields with nowhere to go (no column, no extension column)
    pub dropped: Vec<&'a str>,
}

/// Split record fields into known columns and extension fields
///
/// A field named like the extension column is rejected, since the column is
/// managed by the codec. A null identifier is skipped so the column default
/// assigns one.
pub fn partition<'a>(
    schema: &'a TableSchema,
    fields: &'a Map<String, Value>,
    extension_column: &str,
) -> Result<Partition<'a>> {
    let ext_column = schema
        .column(extension_column)
        .filter(|_| schema.has_extension_column(extension_column));

    let mut partition = Partition {
        known: Vec::new(),
        extension: Map::new(),
        extension_column: ext_column,
        dropped: Vec::new(),
    };

    for (name, value) in fields {
        if ext_column.is_some_and(|ext| ext.name == *name) {
            return Err(SyncError::validation(format!(
                "Field '{}' collides with the extension column",
                name
            )));
        }

        if name == ID_FIELD && value.is_null() {
            continue;
        }

        match schema.column(name) {
            Some(column) => partition.known.push((column, value)),
            None if ext_column.is_some() => {
                partition.extension.insert(name.clone(), value.clone());
            }
            None => partition.dropped.push(name.as_str()),
        }
    }

    Ok(partition)
}

/// Statement generator for one table
pub struct StatementBuilder<'a> {
    schema: &'a TableSchema,
    extension_column: &'a str,
}

impl<'a> StatementBuilder<'a> {
    pub fn new(schema: &'a TableSchema, extension_column: &'a str) -> Self {
        Self {
            schema,
            extension_column,
        }
    }

    fn table(&self) -> String {
        quote_table_name(&self.schema.table)
    }

    fn id_column(&self) -> Result<&'a ColumnDescriptor> {
        self.schema.column(ID_FIELD).ok_or_else(|| {
            SyncError::validation(format!(
                "Table '{}' has no '{}' column",
                self.schema.table, ID_FIELD
            ))
        })
    }

    /// `"id" = $n` with the identifier bound to its declared type
    fn id_predicate(&self, id: &Value, index: usize) -> Result<(String, SqlParam)> {
        let column = self.id_column()?;
        let kind = column.kind();
        Ok((
            format!(
                "{} = {}",
                quote_identifier(&column.name),
                kind.placeholder(index, &column.data_type)
            ),
            SqlParam::from_value(kind, &column.name, id)?,
        ))
    }

    /// INSERT of all known fields plus the encoded extension fields
    ///
    /// Falls back to `DEFAULT VALUES` when nothing would be set.
    pub fn insert(&self, partition: &Partition<'_>) -> Result<Statement> {
        let mut columns = Vec::new();
        let mut placeholders = Vec::new();
        let mut params = Vec::new();

        for (column, value) in &partition.known {
            let kind = column.kind();
            columns.push(quote_identifier(&column.name));
            placeholders.push(kind.placeholder(params.len() + 1, &column.data_type));
            params.push(SqlParam::from_value(kind, &column.name, value)?);
        }

        if let Some((column, encoded)) = self.encoded_extension(partition) {
            columns.push(quote_identifier(&column.name));
            placeholders.push(column.kind().placeholder(params.len() + 1, &column.data_type));
            params.push(SqlParam::Text(Some(encoded)));
        }

        let values = if columns.is_empty() {
            " DEFAULT VALUES".to_string()
        } else {
            format!(" ({}) VALUES ({})", columns.join(", "), placeholders.join(", "))
        };

        Ok(Statement {
            sql: format!(
                "INSERT INTO {}{} RETURNING {}",
                self.table(),
                values,
                self.schema.projection()
            ),
            params,
        })
    }

    /// SELECT of one row by identifier, with an optional extra fragment
    pub fn select_by_id(&self, id: &Value, filter_fragment: &str) -> Result<Statement> {
        let (predicate, id_param) = self.id_predicate(id, 1)?;
        Ok(Statement {
            sql: format!(
                "SELECT {} FROM {} WHERE {}{}",
                self.schema.projection(),
                self.table(),
                predicate,
                filter_fragment
            ),
            params: vec![id_param],
        })
    }

    /// UPDATE of the known fields (identifier excluded) and extension fields
    ///
    /// A record with nothing to set still produces a valid statement, so a
    /// missing row is reported the same way.
    pub fn update(&self, partition: &Partition<'_>, id: &Value) -> Result<Statement> {
        let mut assignments = Vec::new();
        let mut params = Vec::new();

        for (column, value) in &partition.known {
            if column.name == ID_FIELD {
                continue;
            }
            let kind = column.kind();
            assignments.push(format!(
                "{} = {}",
                quote_identifier(&column.name),
                kind.placeholder(params.len() + 1, &column.data_type)
            ));
            params.push(SqlParam::from_value(kind, &column.name, value)?);
        }

        if let Some((column, encoded)) = self.encoded_extension(partition) {
            assignments.push(format!(
                "{} = {}",
                quote_identifier(&column.name),
                column.kind().placeholder(params.len() + 1, &column.data_type)
            ));
            params.push(SqlParam::Text(Some(encoded)));
        }

        if assignments.is_empty() {
            let id_column = quote_identifier(&self.id_column()?.name);
            assignments.push(format!("{} = {}", id_column, id_column));
        }

        let (predicate, id_param) = self.id_predicate(id, params.len() + 1)?;
        params.push(id_param);

        Ok(Statement {
            sql: format!(
                "UPDATE {} SET {} WHERE {} RETURNING {}",
                self.table(),
                assignments.join(", "),
                predicate,
                self.schema.projection()
            ),
            params,
        })
    }

    /// DELETE of one row by identifier, returning the identifier
    pub fn delete(&self, id: &Value) -> Result<Statement> {
        let (predicate, id_param) = self.id_predicate(id, 1)?;
        Ok(Statement {
            sql: format!(
                "DELETE FROM {} WHERE {} RETURNING {}",
                self.table(),
                predicate,
                quote_identifier(ID_FIELD)
            ),
            params: vec![id_param],
        })
    }

    /// SELECT of the whole table ordered by identifier
    pub fn select_all(&self, filter_fragment: &str) -> Statement {
        Statement {
            sql: format!(
                "SELECT {} FROM {}{} ORDER BY {} ASC",
                self.schema.projection(),
                self.table(),
                filter_fragment,
                quote_identifier(ID_FIELD)
            ),
            params: Vec::new(),
        }
    }

    fn encoded_extension<'p>(
        &self,
        partition: &Partition<'p>,
    ) -> Option<(&'p ColumnDescriptor, String)> {
        if partition.extension.is_empty() {
            return None;
        }
        partition
            .extension_column
            .filter(|c| c.name == self.extension_column)
            .map(|c| (c, extension::encode(&partition.extension)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plain_schema() -> TableSchema {
        TableSchema::new(
            "test",
            vec![
                ColumnDescriptor::new("id", "integer")
                    .with_default("nextval('test_id_seq'::regclass)")
                    .not_null(),
                ColumnDescriptor::new("one", "character varying(64)"),
                ColumnDescriptor::new("two", "integer"),
            ],
        )
    }

    fn hstore_schema() -> TableSchema {
        TableSchema::new(
            "test_hstore",
            vec![
                ColumnDescriptor::new("id", "integer").not_null(),
                ColumnDescriptor::new("one", "character varying(64)"),
                ColumnDescriptor::new("two", "character varying(64)"),
                ColumnDescriptor::new("attributes", "hstore"),
            ],
        )
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    const HSTORE_PROJECTION: &str =
        "\"id\", \"one\", \"two\", \"attributes\"::text AS \"attributes\"";

    // ==================== Partition ====================

    #[test]
    fn test_partition_known_and_dropped() {
        let schema = plain_schema();
        let f = fields(json!({"one": "one", "two": 2, "bad": "bad"}));
        let p = partition(&schema, &f, "attributes").unwrap();

        let known: Vec<&str> = p.known.iter().map(|(c, _)| c.name.as_str()).collect();
        assert_eq!(known, vec!["one", "two"]);
        assert!(p.extension.is_empty());
        assert!(p.extension_column.is_none());
        assert_eq!(p.dropped, vec!["bad"]);
    }

    #[test]
    fn test_partition_routes_unknown_fields_to_extension() {
        let schema = hstore_schema();
        let f = fields(json!({"id": 1, "one": "a", "extra": "b"}));
        let p = partition(&schema, &f, "attributes").unwrap();

        let known: Vec<&str> = p.known.iter().map(|(c, _)| c.name.as_str()).collect();
        assert_eq!(known, vec!["id", "one"]);
        assert_eq!(p.extension, fields(json!({"extra": "b"})));
        assert!(p.dropped.is_empty());
    }

    #[test]
    fn test_partition_skips_null_id() {
        let schema = plain_schema();
        let f = fields(json!({"id": null, "one": "a"}));
        let p = partition(&schema, &f, "attributes").unwrap();

        let known: Vec<&str> = p.known.iter().map(|(c, _)| c.name.as_str()).collect();
        assert_eq!(known, vec!["one"]);
        assert!(p.dropped.is_empty());

        let statement = StatementBuilder::new(&schema, "attributes").insert(&p).unwrap();
        assert_eq!(
            statement.sql,
            "INSERT INTO \"test\" (\"one\") VALUES ($1) RETURNING \"id\", \"one\", \"two\""
        );
        assert_eq!(statement.params, vec![SqlParam::Text(Some("a".into()))]);
    }

    #[test]
    fn test_partition_rejects_extension_column_field() {
        let schema = hstore_schema();
        let f = fields(json!({"attributes": "x"}));
        let err = partition(&schema, &f, "attributes").unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    // ==================== INSERT ====================

    #[test]
    fn test_insert_known_columns() {
        let schema = plain_schema();
        let f = fields(json!({"one": "testone", "two": 2}));
        let p = partition(&schema, &f, "attributes").unwrap();
        let stmt = StatementBuilder::new(&schema, "attributes").insert(&p).unwrap();

        assert_eq!(
            stmt.sql,
            "INSERT INTO \"test\" (\"one\", \"two\") VALUES ($1, $2) RETURNING \"id\", \"one\", \"two\""
        );
        assert_eq!(
            stmt.params,
            vec![
                SqlParam::Text(Some("testone".to_string())),
                SqlParam::Integer(Some(2)),
            ]
        );
    }

    #[test]
    fn test_insert_empty_record_uses_default_values() {
        let schema = plain_schema();
        let f = Map::new();
        let p = partition(&schema, &f, "attributes").unwrap();
        let stmt = StatementBuilder::new(&schema, "attributes").insert(&p).unwrap();

        assert_eq!(
            stmt.sql,
            "INSERT INTO \"test\" DEFAULT VALUES RETURNING \"id\", \"one\", \"two\""
        );
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_insert_with_extension_fields() {
        let schema = hstore_schema();
        let f = fields(json!({"one": "a", "four": "testfour", "three": "testthree"}));
        let p = partition(&schema, &f, "attributes").unwrap();
        let stmt = StatementBuilder::new(&schema, "attributes").insert(&p).unwrap();

        assert_eq!(
            stmt.sql,
            format!(
                "INSERT INTO \"test_hstore\" (\"one\", \"attributes\") VALUES ($1, $2::hstore) RETURNING {}",
                HSTORE_PROJECTION
            )
        );
        assert_eq!(
            stmt.params[1],
            SqlParam::Text(Some(r#""four"=>"testfour", "three"=>"testthree""#.to_string()))
        );
    }

    #[test]
    fn test_insert_rejects_unconvertible_value() {
        let schema = plain_schema();
        let f = fields(json!({"two": "not a number"}));
        let p = partition(&schema, &f, "attributes").unwrap();
        let err = StatementBuilder::new(&schema, "attributes").insert(&p).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    // ==================== SELECT ====================

    #[test]
    fn test_select_by_id() {
        let schema = plain_schema();
        let stmt = StatementBuilder::new(&schema, "attributes")
            .select_by_id(&json!(123), "")
            .unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT \"id\", \"one\", \"two\" FROM \"test\" WHERE \"id\" = $1"
        );
        assert_eq!(stmt.params, vec![SqlParam::Integer(Some(123))]);
    }

    #[test]
    fn test_select_by_id_with_filter_fragment() {
        let schema = plain_schema();
        let stmt = StatementBuilder::new(&schema, "attributes")
            .select_by_id(&json!(123), " AND \"one\" = 'one'")
            .unwrap();

        assert!(stmt.sql.ends_with("WHERE \"id\" = $1 AND \"one\" = 'one'"));
    }

    #[test]
    fn test_select_requires_id_column() {
        let schema = TableSchema::new("noid", vec![ColumnDescriptor::new("one", "text")]);
        let err = StatementBuilder::new(&schema, "attributes")
            .select_by_id(&json!(1), "")
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn test_select_all_orders_by_id() {
        let schema = plain_schema();
        let builder = StatementBuilder::new(&schema, "attributes");

        assert_eq!(
            builder.select_all("").sql,
            "SELECT \"id\", \"one\", \"two\" FROM \"test\" ORDER BY \"id\" ASC"
        );
        assert_eq!(
            builder.select_all(" WHERE (two = 2)").sql,
            "SELECT \"id\", \"one\", \"two\" FROM \"test\" WHERE (two = 2) ORDER BY \"id\" ASC"
        );
    }

    // ==================== UPDATE ====================

    #[test]
    fn test_update_excludes_id_from_set() {
        let schema = plain_schema();
        let f = fields(json!({"id": 7, "one": "updated", "two": 3}));
        let p = partition(&schema, &f, "attributes").unwrap();
        let stmt = StatementBuilder::new(&schema, "attributes")
            .update(&p, &json!(7))
            .unwrap();

        assert_eq!(
            stmt.sql,
            "UPDATE \"test\" SET \"one\" = $1, \"two\" = $2 WHERE \"id\" = $3 RETURNING \"id\", \"one\", \"two\""
        );
        assert_eq!(stmt.params.len(), 3);
        assert_eq!(stmt.params[2], SqlParam::Integer(Some(7)));
    }

    #[test]
    fn test_update_with_extension_fields() {
        let schema = hstore_schema();
        let f = fields(json!({"id": 7, "one": "updated", "four": "testfour", "three": "testthree"}));
        let p = partition(&schema, &f, "attributes").unwrap();
        let stmt = StatementBuilder::new(&schema, "attributes")
            .update(&p, &json!(7))
            .unwrap();

        assert_eq!(
            stmt.sql,
            format!(
                "UPDATE \"test_hstore\" SET \"one\" = $1, \"attributes\" = $2::hstore WHERE \"id\" = $3 RETURNING {}",
                HSTORE_PROJECTION
            )
        );
        assert_eq!(
            stmt.params[1],
            SqlParam::Text(Some(r#""four"=>"testfour", "three"=>"testthree""#.to_string()))
        );
    }

    #[test]
    fn test_update_with_only_id_keeps_statement_valid() {
        let schema = plain_schema();
        let f = fields(json!({"id": 7}));
        let p = partition(&schema, &f, "attributes").unwrap();
        let stmt = StatementBuilder::new(&schema, "attributes")
            .update(&p, &json!(7))
            .unwrap();

        assert_eq!(
            stmt.sql,
            "UPDATE \"test\" SET \"id\" = \"id\" WHERE \"id\" = $1 RETURNING \"id\", \"one\", \"two\""
        );
        assert_eq!(stmt.params, vec![SqlParam::Integer(Some(7))]);
    }

    // ==================== DELETE ====================

    #[test]
    fn test_delete_returns_id() {
        let schema = plain_schema();
        let stmt = StatementBuilder::new(&schema, "attributes")
            .delete(&json!("123"))
            .unwrap();

        assert_eq!(
            stmt.sql,
            "DELETE FROM \"test\" WHERE \"id\" = $1 RETURNING \"id\""
        );
        assert_eq!(stmt.params, vec![SqlParam::Integer(Some(123))]);
    }

    #[test]
    fn test_qualified_table_name() {
        let schema = TableSchema::new("app.test", plain_schema().columns);
        let stmt = StatementBuilder::new(&schema, "attributes")
            .delete(&json!(1))
            .unwrap();
        assert!(stmt.sql.starts_with("DELETE FROM \"app\".\"test\""));
    }
}
