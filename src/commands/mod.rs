//! Command Handler Module
//!
//! The command processing layer. It receives decoded commands, executes them
//! against the storage engine and returns the reply to write back.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Validate     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`, `ECHO`
//! - `SET` (with optional `PX`), `GET`
//! - `KEYS`
//! - `CONFIG GET`

pub mod handler;

pub use handler::{CommandError, CommandHandler};
