//! Basic example showing how to use sql-connection-proxy.
//!
//! Run with: cargo run --example basic

use sql_connection_proxy::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,SqlConnectionProxy=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let connection_string = std::env::var("CONNECTION_STRING")
        .unwrap_or_else(|_| "Provider=sqlite;Data Source=:memory:;Pooling=True".into());

    // Option 1: Record the caller's file and line
    let mut proxy = ConnectionProxy::<SeaOrmConnection>::new(Some(connection_string.as_str()))?;

    // Option 2: Also stamp the calling crate as the component
    // let mut proxy = connection_proxy!(SeaOrmConnection, Some(connection_string.as_str()))?;

    // Option 3: With custom configuration
    // let mut proxy = ConnectionProxy::<SeaOrmConnection>::with_config(
    //     Some(connection_string.as_str()),
    //     ProxyConfig::default().with_component("billing"),
    // )?;

    // Pooling=True above has been rewritten
    tracing::info!(connection_string = %proxy.connection_string(), "Normalized connection string");

    proxy.open().await?;
    tracing::info!(
        version = proxy.server_version().unwrap_or("unknown"),
        "Connected"
    );

    let mut command = proxy.create_command();
    command.set_text("SELECT 1");
    command.query_one().await?;

    let transaction = proxy.begin_transaction().await?;
    transaction.commit().await?;

    proxy.close().await?;
    proxy.dispose().await?;

    Ok(())
}
