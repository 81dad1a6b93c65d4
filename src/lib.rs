//! # sql-connection-proxy
//!
//! A drop-in wrapper around a native database connection that logs its
//! lifecycle and pins a handful of connection-string options.
//!
//! ## Features
//!
//! - **Lifecycle Logging**: Open, Close and Dispose are reported to the
//!   `SqlConnectionProxy` logger, tagged with the file, line and component
//!   that created the proxy
//! - **Forced Options**: Every connection string is rewritten with
//!   `Pooling=False`, `MultipleActiveResultSets=True`,
//!   `Asynchronous Processing=True` and `Application Name=LeaseWeb`
//! - **Lazy Open**: `materialize` opens the connection on first use and hands
//!   back the native handle
//! - **Pluggable Connectors**: Any [`NativeConnection`] works underneath; a
//!   SeaORM-backed connector is included
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sql_connection_proxy::{ConnectionProxy, SeaOrmConnection};
//!
//! let mut proxy = ConnectionProxy::<SeaOrmConnection>::new(Some(
//!     "Provider=postgres;Server=db01;Database=sales;User Id=app;Password=secret",
//! ))?;
//!
//! proxy.open().await?;
//! let transaction = proxy.begin_transaction().await?;
//! // ...
//! transaction.commit().await?;
//! proxy.close().await?;
//! proxy.dispose().await?;
//! ```
//!
//! ## Log Records
//!
//! Records are emitted through `tracing` with target `SqlConnectionProxy`.
//! Open is logged at INFO, Close at WARN and Dispose at ERROR, following the
//! severity bands of the original log levels:
//!
//! | Field | Description |
//! |-------|-------------|
//! | `category` | Always `ConnectionProxy` |
//! | `event` | `SqlConnection.Open`, `SqlConnection.Close` or `SqlConnection.Dispose` |
//! | `severity` | 50000, 60000 or 70000 |
//! | `component` | Component that created the proxy |
//! | `file` | Base name of the source file that created the proxy |
//! | `line` | Line that created the proxy |
//! | `error` | Error attached to the record, when there is one |
//!
//! The message body is `<root><assembly>..</assembly><file>..</file><line>..</line></root>`.

mod backend;
mod config;
mod connection_string;
mod error;
mod lifecycle;
mod native;
mod proxy;

pub use backend::{Provider, SeaOrmCommand, SeaOrmConnection};
pub use config::ProxyConfig;
pub use connection_string::{
    normalize, normalize_with, ConnectionStringBuilder, Keyword, APPLICATION_NAME,
};
pub use error::ConnectionStringError;
pub use lifecycle::{CallSite, LifecycleEvent, LogPayload, CATEGORY, LOGGER_NAME};
pub use native::{ConnectionState, IsolationLevel, NativeConnection};
pub use proxy::{materialize, ConnectionProxy};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        connection_proxy, ConnectionProxy, ConnectionState, IsolationLevel, NativeConnection,
        ProxyConfig, SeaOrmConnection,
    };
}
