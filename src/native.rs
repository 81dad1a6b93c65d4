//! The contract a native connector has to fulfil to sit under a proxy.

use std::fmt;

use async_trait::async_trait;

use crate::error::ConnectionStringError;

/// Current state of a native connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Open,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Closed => f.write_str("Closed"),
            ConnectionState::Open => f.write_str("Open"),
        }
    }
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
    Snapshot,
}

/// A native database connection.
///
/// Implementations own the real I/O: opening sessions, executing commands and
/// pooling. The proxy never looks behind this trait, it only forwards to it,
/// and errors raised here reach the caller unchanged.
#[async_trait]
pub trait NativeConnection: Send + Sync + Sized {
    /// Transaction handle returned by [`begin_transaction`](Self::begin_transaction).
    type Transaction: Send;

    /// Command handle returned by [`create_command`](Self::create_command).
    type Command: Send;

    /// Error raised by every fallible operation of the connector.
    type Error: std::error::Error + Send + Sync + From<ConnectionStringError> + 'static;

    /// Create a closed connection, optionally configured by a connection string.
    fn new(connection_string: Option<&str>) -> Result<Self, Self::Error>;

    /// The connection string currently in effect.
    fn connection_string(&self) -> &str;

    /// Replace the connection string.
    fn set_connection_string(&mut self, connection_string: &str) -> Result<(), Self::Error>;

    fn state(&self) -> ConnectionState;

    /// Name of the current database (catalog).
    fn database(&self) -> &str;

    /// Name of the server instance the connection points at.
    fn data_source(&self) -> &str;

    /// Version reported by the server; only known while open.
    fn server_version(&self) -> Option<&str>;

    async fn open(&mut self) -> Result<(), Self::Error>;

    async fn close(&mut self) -> Result<(), Self::Error>;

    async fn change_database(&mut self, database: &str) -> Result<(), Self::Error>;

    async fn begin_transaction(
        &self,
        isolation_level: IsolationLevel,
    ) -> Result<Self::Transaction, Self::Error>;

    fn create_command(&self) -> Self::Command;

    /// Release every resource held by the connection.
    async fn dispose(self) -> Result<(), Self::Error>;

    /// Empty every connection pool the connector maintains in this process.
    async fn clear_all_pools() -> Result<(), Self::Error>;

    /// Empty the pool `connection` was drawn from.
    async fn clear_pool(connection: &Self) -> Result<(), Self::Error>;
}
