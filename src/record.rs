//! Record type exchanged with the host model framework
//!
//! A record is a plain field mapping bound to one table. The store never
//! mutates a record in place; every operation returns a fresh one carrying
//! the row as the database reports it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the identifier field and column
pub const ID_FIELD: &str = "id";

/// A field mapping belonging to one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Table (resource) the record is stored in
    pub table: String,
    /// Field values, including `id` once persisted
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create an empty record for a table
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: Map::new(),
        }
    }

    /// Create a record from an existing field mapping
    pub fn from_fields(table: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            table: table.into(),
            fields,
        }
    }

    /// Create a record addressing an existing row by identifier
    pub fn with_id(table: impl Into<String>, id: impl Into<Value>) -> Self {
        Self::new(table).with(ID_FIELD, id)
    }

    /// Builder-style field assignment
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Assign a field, returning the previous value
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Identifier, if assigned and not null
    pub fn id(&self) -> Option<&Value> {
        self.fields.get(ID_FIELD).filter(|v| !v.is_null())
    }

    /// True until the record carries an identifier
    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}
