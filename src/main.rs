//! snapkv server entry point.
//!
//! Loads the configured snapshot (if any) into a fresh store, starts the
//! expiry sweeper and serves clients until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use snapkv::config::ServerConfig;
use snapkv::connection::ConnectionStats;
use snapkv::server::serve;
use snapkv::snapshot::{self, SnapshotError};
use snapkv::storage::{ExpirySweeper, StorageEngine};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(ServerConfig::parse());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("snapkv=info")),
        )
        .with_target(false)
        .init();

    info!(version = snapkv::VERSION, "Starting snapkv");

    // Create the storage engine (shared across all connections)
    let storage = Arc::new(StorageEngine::new());

    if let Some(path) = config.snapshot_path() {
        match snapshot::load_into(&storage, &path) {
            Ok(_) => {}
            Err(SnapshotError::CorruptFormat(reason)) => {
                warn!(path = %path.display(), %reason, "Snapshot is corrupt, starting empty");
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to load snapshot {}", path.display()));
            }
        }
    }

    let _sweeper = ExpirySweeper::start(Arc::clone(&storage), config.sweep_config());

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(address = %config.bind_address(), "Ready to accept connections");

    tokio::select! {
        _ = serve(listener, Arc::clone(&storage), Arc::clone(&config), Arc::clone(&stats)) => {}
        res = signal::ctrl_c() => {
            res.context("failed to listen for Ctrl+C")?;
            info!("Shutdown signal received, stopping server...");
        }
    }

    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        keys = storage.len(),
        "Server shutdown complete"
    );
    Ok(())
}
