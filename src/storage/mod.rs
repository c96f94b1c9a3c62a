//! Storage Module
//!
//! The Expiring Store and its background sweeper.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! - **Lazy Expiry**: every read path re-checks the entry's deadline
//! - **Active Expiry**: the sweeper reclaims dead entries nobody reads

pub mod engine;
pub mod expiry;

pub use engine::{Entry, StorageEngine};
pub use expiry::{start_expiry_sweeper, ExpirySweeper, SweepConfig, DEFAULT_SWEEP_INTERVAL};
