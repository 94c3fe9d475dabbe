//! Connection provider
//!
//! Every operation opens its own connection and closes it when done; there is
//! no pooling. Connection attempts and statements are bounded by the
//! configured operation timeout.

use std::future::Future;
use std::time::Duration;

use sqlx::{ConnectOptions, Connection, PgConnection};
use tracing::debug;

use crate::config::{ConnectionConfig, StoreConfig};
use crate::error::{Result, SyncError};

/// Resolves connection settings into live connections on demand
#[derive(Debug, Clone)]
pub struct Connector {
    connection: ConnectionConfig,
    application_name: Option<String>,
    timeout: Duration,
}

impl Connector {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            connection: config.connection.clone(),
            application_name: config.application_name.clone(),
            timeout: config.operation_timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open a fresh connection
    ///
    /// Fails with `Configuration` when no connection settings were supplied.
    pub async fn connect(&self) -> Result<PgConnection> {
        let options = self
            .connection
            .connect_options(self.application_name.as_deref())?;

        debug!(host = options.get_host(), "opening connection");
        self.bounded(options.connect()).await.map_err(|e| match e {
            SyncError::ConstraintOrSyntax { message, .. } => SyncError::Connection(message),
            other => other,
        })
    }

    /// Run a driver future under the operation timeout
    pub async fn bounded<T, E, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        SyncError: From<E>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(SyncError::from),
            Err(_) => Err(SyncError::Timeout(self.timeout)),
        }
    }

    /// Close a connection once its single statement has run
    pub async fn release(&self, conn: PgConnection) {
        self.finish_close(conn.close()).await;
    }

    /// Await a close under the operation timeout; failures are only logged
    async fn finish_close<F>(&self, close: F) -> bool
    where
        F: Future<Output = std::result::Result<(), sqlx::Error>>,
    {
        match self.bounded(close).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "closing connection failed");
                false
            }
        }
    }
}
