//! depcache-admin entry point.
//!
//! Boots an MCP server on stdio that inspects and invalidates a depcache
//! SQLite store. Logging goes to stderr to avoid interfering with the JSON-RPC
//! protocol on stdout.

use anyhow::Result;
use depcache_core::{CacheConfig, KeyDeriver, SqliteStore};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = CacheConfig::load()?;
    let db_path = config.require_db_path()?;
    let store = SqliteStore::open(db_path).await?;

    tracing::info!(db_path = %db_path.display(), "Starting depcache-admin on stdio transport");

    let deriver = KeyDeriver::with_algorithm(config.hash_algorithm);
    let handler = handler::DepcacheAdmin::new(store, deriver, config.default_salt.clone());
    let server = serve_server(handler, stdio()).await?;

    server.waiting().await?;

    Ok(())
}
