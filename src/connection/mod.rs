//! Connection Handler Module
//!
//! Manages individual client connections. Each accepted connection is
//! handled by its own async task, which exclusively owns its stream and its
//! decode buffer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (server.rs)                              │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read bytes  │───>│ Decode RESP │───>│ Execute cmd │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Send reply  │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Policy
//!
//! - Application errors are answered with `-ERR ...` and the connection
//!   stays open.
//! - A malformed frame closes the connection without a reply.
//! - A connection that buffers more than its limit without completing a
//!   frame is closed.

pub mod handler;

pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionStats, MAX_BUFFER_SIZE,
};
