//! Error types for record synchronization

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while synchronizing records
#[derive(Debug, Error)]
pub enum SyncError {
    /// No row matched the identifier on read, update or delete
    #[error("Not found: {0}")]
    NotFound(String),

    /// The database rejected the statement (unknown column or relation, type mismatch, constraint)
    #[error("Statement rejected: {message}")]
    ConstraintOrSyntax {
        message: String,
        /// SQLSTATE code reported by the server, if any
        code: Option<String>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("SQL error: {0}")]
    Sql(sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Whether this error means the addressed row does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => Self::ConstraintOrSyntax {
                message: db.message().to_string(),
                code: db.code().map(|c| c.into_owned()),
            },
            sqlx::Error::RowNotFound => Self::NotFound("no rows returned".to_string()),
            sqlx::Error::Configuration(e) => Self::Configuration(e.to_string()),
            sqlx::Error::Io(e) => Self::Connection(e.to_string()),
            sqlx::Error::Tls(e) => Self::Connection(e.to_string()),
            sqlx::Error::Protocol(msg) => Self::Connection(msg),
            sqlx::Error::PoolTimedOut => Self::Connection("pool timed out".to_string()),
            sqlx::Error::PoolClosed => Self::Connection("pool closed".to_string()),
            other @ (sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::TypeNotFound { .. }) => Self::Decode(other.to_string()),
            other => Self::Sql(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
