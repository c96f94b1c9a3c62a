//! # snapkv - An In-Memory Key-Value Server with Snapshot Bootstrap
//!
//! snapkv speaks the Redis wire protocol (RESP) over TCP, keeps its data in
//! an in-memory store with per-key expiry, and can preload that store from
//! an RDB-style snapshot file at startup.
//!
//! ## Features
//!
//! - **Redis-Compatible**: RESP framing, usable from `redis-cli`
//! - **Streaming Decoder**: a frame split across any number of reads is
//!   reassembled, never rejected
//! - **TTL Support**: millisecond expiry with lazy checks and a background sweep
//! - **Snapshot Bootstrap**: keys and absolute deadlines loaded from disk
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              snapkv                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐   │
//! │  │   RESP      │    │              StorageEngine                   │   │
//! │  │   Parser    │    │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │   │
//! │  └─────────────┘    │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...64   │ │   │
//! │                     │  │RwLock  │ │RwLock  │ │RwLock  │ │shards  │ │   │
//! │  ┌─────────────┐    │  └────────┘ └────────┘ └────────┘ └────────┘ │   │
//! │  │  Snapshot   │───>│                                              │   │
//! │  │  Loader     │    └──────────────────────────────────────────────┘   │
//! │  └─────────────┘                              ▲                         │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │           ExpirySweeper                         │ │
//! │                     │      (Background Tokio Task)                    │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use snapkv::config::ServerConfig;
//! use snapkv::connection::ConnectionStats;
//! use snapkv::server::serve;
//! use snapkv::storage::{start_expiry_sweeper, StorageEngine};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let config = Arc::new(ServerConfig::default());
//!     let storage = Arc::new(StorageEngine::new());
//!     let _sweeper = start_expiry_sweeper(Arc::clone(&storage));
//!     let stats = Arc::new(ConnectionStats::new());
//!
//!     let listener = TcpListener::bind(config.bind_address()).await?;
//!     serve(listener, storage, config, stats).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING [message]`
//! - `ECHO message`
//! - `SET key value [PX milliseconds]`
//! - `GET key`
//! - `KEYS pattern`
//! - `CONFIG GET dir|dbfilename`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP decoder, reply encoder and types
//! - [`storage`]: Thread-safe storage engine with TTL support
//! - [`snapshot`]: RDB snapshot reader and bootstrap
//! - [`commands`]: Command dispatch
//! - [`connection`]: Client connection management
//! - [`server`]: Accept loop
//! - [`config`]: Command-line configuration

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod snapshot;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandError, CommandHandler};
pub use config::ServerConfig;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{Command, DecodeResult, ParseError, RespParser, RespValue};
pub use snapshot::{load_into, SnapshotError, SnapshotReader};
pub use storage::{start_expiry_sweeper, ExpirySweeper, StorageEngine, SweepConfig};

/// The default port snapkv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host snapkv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of snapkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
