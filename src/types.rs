//! Core type mapping between PostgreSQL columns and record values
//!
//! Declared column types (as rendered by `format_type`) are classified into a
//! [`ColumnKind`], which decides how a `serde_json::Value` is bound as a
//! parameter and how a result column is decoded back into a value.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use sqlx::Row;
use sqlx::postgres::{PgArguments, PgRow};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::sql::sanitize::quote_identifier;

/// Query type produced by `sqlx::query` against PostgreSQL
pub type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, PgArguments>;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Classification of a declared column type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// text, character varying, character, name, citext
    Text,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Numeric,
    Boolean,
    Date,
    /// timestamp without time zone
    Timestamp,
    /// timestamp with time zone
    TimestampTz,
    Json,
    Jsonb,
    Uuid,
    Hstore,
    /// Anything else (arrays, enums, geometric types, ...), exchanged as text
    Other,
}

impl ColumnKind {
    /// Classify a type name as returned by `format_type(atttypid, atttypmod)`
    pub fn from_declared_type(declared: &str) -> Self {
        let ty = declared.trim().to_ascii_lowercase();

        if ty.ends_with("[]") {
            return ColumnKind::Other;
        }

        // format_type qualifies extension types living outside the search path
        let base = ty.rsplit('.').next().unwrap_or(&ty);

        match base {
            "text" | "name" | "citext" | "bpchar" | "varchar" | "character" => ColumnKind::Text,
            "smallint" => ColumnKind::SmallInt,
            "integer" => ColumnKind::Integer,
            "bigint" => ColumnKind::BigInt,
            "real" => ColumnKind::Real,
            "double precision" => ColumnKind::Double,
            "boolean" => ColumnKind::Boolean,
            "date" => ColumnKind::Date,
            "json" => ColumnKind::Json,
            "jsonb" => ColumnKind::Jsonb,
            "uuid" => ColumnKind::Uuid,
            "hstore" => ColumnKind::Hstore,
            _ if ty.starts_with("character varying") || ty.starts_with("character(") => {
                ColumnKind::Text
            }
            _ if ty.starts_with("numeric") => ColumnKind::Numeric,
            _ if ty.starts_with("timestamp") && ty.contains("with time zone") => {
                ColumnKind::TimestampTz
            }
            _ if ty.starts_with("timestamp") => ColumnKind::Timestamp,
            _ => ColumnKind::Other,
        }
    }

    /// Whether filter values for this kind are rendered as quoted literals
    pub fn is_text(&self) -> bool {
        matches!(self, ColumnKind::Text)
    }

    /// Kinds bound as text and cast server-side to the declared type
    fn binds_as_text(&self) -> bool {
        matches!(self, ColumnKind::Json | ColumnKind::Hstore | ColumnKind::Other)
    }

    /// Kinds that cannot be decoded natively and are projected as text
    fn selects_as_text(&self) -> bool {
        matches!(self, ColumnKind::Hstore | ColumnKind::Other)
    }

    /// Positional placeholder for a parameter bound to a column of this kind
    pub fn placeholder(&self, index: usize, declared_type: &str) -> String {
        if self.binds_as_text() {
            format!("${}::{}", index, declared_type)
        } else {
            format!("${}", index)
        }
    }

    /// Select-list entry for a column of this kind
    pub fn projection(&self, column_name: &str) -> String {
        let quoted = quote_identifier(column_name);
        if self.selects_as_text() {
            format!("{}::text AS {}", quoted, quoted)
        } else {
            quoted
        }
    }

    /// Decode one result column into a record value
    pub fn decode(&self, row: &PgRow, column_name: &str) -> Result<Value> {
        let name = column_name;
        let value = match self {
            ColumnKind::Text | ColumnKind::Hstore | ColumnKind::Other => row
                .try_get::<Option<String>, _>(name)?
                .map(Value::String),
            ColumnKind::SmallInt => row.try_get::<Option<i16>, _>(name)?.map(Value::from),
            ColumnKind::Integer => row.try_get::<Option<i32>, _>(name)?.map(Value::from),
            ColumnKind::BigInt => row.try_get::<Option<i64>, _>(name)?.map(Value::from),
            ColumnKind::Real => row
                .try_get::<Option<f32>, _>(name)?
                .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
                .map(Value::Number),
            ColumnKind::Double => row
                .try_get::<Option<f64>, _>(name)?
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            ColumnKind::Numeric => row
                .try_get::<Option<Decimal>, _>(name)?
                .map(numeric_value),
            ColumnKind::Boolean => row.try_get::<Option<bool>, _>(name)?.map(Value::Bool),
            ColumnKind::Date => row
                .try_get::<Option<NaiveDate>, _>(name)?
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
            ColumnKind::Timestamp => row
                .try_get::<Option<NaiveDateTime>, _>(name)?
                .map(|t| Value::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
            ColumnKind::TimestampTz => row
                .try_get::<Option<DateTime<Utc>>, _>(name)?
                .map(|t| Value::String(t.to_rfc3339())),
            ColumnKind::Json | ColumnKind::Jsonb => row.try_get::<Option<Value>, _>(name)?,
            ColumnKind::Uuid => row
                .try_get::<Option<Uuid>, _>(name)?
                .map(|u| Value::String(u.to_string())),
        };

        Ok(value.unwrap_or(Value::Null))
    }
}

/// A bind parameter converted to the Rust type matching its column
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(Option<String>),
    SmallInt(Option<i16>),
    Integer(Option<i32>),
    BigInt(Option<i64>),
    Real(Option<f32>),
    Double(Option<f64>),
    Numeric(Option<Decimal>),
    Boolean(Option<bool>),
    Date(Option<NaiveDate>),
    Timestamp(Option<NaiveDateTime>),
    TimestampTz(Option<DateTime<Utc>>),
    Jsonb(Option<Value>),
    Uuid(Option<Uuid>),
}

impl SqlParam {
    /// Convert a record value for binding to a column of the given kind
    pub fn from_value(kind: ColumnKind, column_name: &str, value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::null(kind));
        }

        let mismatch =
            |expected: &str| SyncError::validation(format!("Column '{}' expected {}", column_name, expected));

        Ok(match kind {
            ColumnKind::Text | ColumnKind::Json | ColumnKind::Hstore | ColumnKind::Other => {
                SqlParam::Text(Some(text_of(value)))
            }
            ColumnKind::SmallInt => {
                let v = integer_of(value).ok_or_else(|| mismatch("integer"))?;
                SqlParam::SmallInt(Some(
                    i16::try_from(v).map_err(|_| mismatch("smallint in range"))?,
                ))
            }
            ColumnKind::Integer => {
                let v = integer_of(value).ok_or_else(|| mismatch("integer"))?;
                SqlParam::Integer(Some(
                    i32::try_from(v).map_err(|_| mismatch("integer in range"))?,
                ))
            }
            ColumnKind::BigInt => {
                SqlParam::BigInt(Some(integer_of(value).ok_or_else(|| mismatch("integer"))?))
            }
            ColumnKind::Real => {
                SqlParam::Real(Some(float_of(value).ok_or_else(|| mismatch("number"))? as f32))
            }
            ColumnKind::Double => {
                SqlParam::Double(Some(float_of(value).ok_or_else(|| mismatch("number"))?))
            }
            ColumnKind::Numeric => {
                let text = match value {
                    Value::Number(n) => n.to_string(),
                    Value::String(s) => s.trim().to_string(),
                    _ => return Err(mismatch("decimal")),
                };
                let dec = Decimal::from_str(&text)
                    .or_else(|_| Decimal::from_scientific(&text))
                    .map_err(|_| mismatch("decimal"))?;
                SqlParam::Numeric(Some(dec))
            }
            ColumnKind::Boolean => {
                let v = value
                    .as_bool()
                    .or_else(|| {
                        value
                            .as_str()
                            .and_then(|s| match s.to_lowercase().as_str() {
                                "true" | "t" | "1" | "yes" => Some(true),
                                "false" | "f" | "0" | "no" => Some(false),
                                _ => None,
                            })
                    })
                    .ok_or_else(|| mismatch("boolean"))?;
                SqlParam::Boolean(Some(v))
            }
            ColumnKind::Date => {
                let s = value.as_str().ok_or_else(|| mismatch("date string"))?;
                let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map_err(|e| mismatch(&format!("date (YYYY-MM-DD): {}", e)))?;
                SqlParam::Date(Some(date))
            }
            ColumnKind::Timestamp => {
                let s = value.as_str().ok_or_else(|| mismatch("timestamp string"))?;
                let ts = parse_naive(s)
                    .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|t| t.naive_utc()))
                    .ok_or_else(|| mismatch("timestamp"))?;
                SqlParam::Timestamp(Some(ts))
            }
            ColumnKind::TimestampTz => {
                let s = value.as_str().ok_or_else(|| mismatch("timestamp string"))?;
                let ts = DateTime::parse_from_rfc3339(s)
                    .map(|t| t.with_timezone(&Utc))
                    .ok()
                    .or_else(|| parse_naive(s).map(|t| t.and_utc()))
                    .ok_or_else(|| mismatch("RFC 3339 timestamp"))?;
                SqlParam::TimestampTz(Some(ts))
            }
            ColumnKind::Jsonb => SqlParam::Jsonb(Some(value.clone())),
            ColumnKind::Uuid => {
                let s = value.as_str().ok_or_else(|| mismatch("uuid string"))?;
                SqlParam::Uuid(Some(
                    Uuid::parse_str(s).map_err(|e| mismatch(&format!("uuid: {}", e)))?,
                ))
            }
        })
    }

    /// Typed SQL NULL for a column kind
    pub fn null(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Text | ColumnKind::Json | ColumnKind::Hstore | ColumnKind::Other => {
                SqlParam::Text(None)
            }
            ColumnKind::SmallInt => SqlParam::SmallInt(None),
            ColumnKind::Integer => SqlParam::Integer(None),
            ColumnKind::BigInt => SqlParam::BigInt(None),
            ColumnKind::Real => SqlParam::Real(None),
            ColumnKind::Double => SqlParam::Double(None),
            ColumnKind::Numeric => SqlParam::Numeric(None),
            ColumnKind::Boolean => SqlParam::Boolean(None),
            ColumnKind::Date => SqlParam::Date(None),
            ColumnKind::Timestamp => SqlParam::Timestamp(None),
            ColumnKind::TimestampTz => SqlParam::TimestampTz(None),
            ColumnKind::Jsonb => SqlParam::Jsonb(None),
            ColumnKind::Uuid => SqlParam::Uuid(None),
        }
    }

    /// Attach this parameter to a query
    pub fn bind(self, query: PgQuery<'_>) -> PgQuery<'_> {
        match self {
            SqlParam::Text(v) => query.bind(v),
            SqlParam::SmallInt(v) => query.bind(v),
            SqlParam::Integer(v) => query.bind(v),
            SqlParam::BigInt(v) => query.bind(v),
            SqlParam::Real(v) => query.bind(v),
            SqlParam::Double(v) => query.bind(v),
            SqlParam::Numeric(v) => query.bind(v),
            SqlParam::Boolean(v) => query.bind(v),
            SqlParam::Date(v) => query.bind(v),
            SqlParam::Timestamp(v) => query.bind(v),
            SqlParam::TimestampTz(v) => query.bind(v),
            SqlParam::Jsonb(v) => query.bind(v),
            SqlParam::Uuid(v) => query.bind(v),
        }
    }
}

/// Text form of a value: strings as-is, everything else as JSON
pub(crate) fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JSON number when the decimal survives an f64 round trip, its text otherwise
pub(crate) fn numeric_value(d: Decimal) -> Value {
    d.to_f64()
        .filter(|f| Decimal::from_str(&f.to_string()).is_ok_and(|back| back == d))
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(d.to_string()))
}

fn integer_of(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
}

fn float_of(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
}

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}
