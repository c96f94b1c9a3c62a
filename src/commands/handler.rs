//! Command Handler Module
//!
//! Turns a decoded [`Command`] into a reply. Dispatch is a pure function of
//! the command, the store and the startup configuration; `SET` is the only
//! command that mutates anything.
//!
//! ## Supported Commands
//!
//! - `PING [message]` - Test connection
//! - `ECHO message` - Echo message
//! - `SET key value [PX milliseconds]` - Set a key
//! - `GET key` - Get a key's value
//! - `KEYS pattern` - Find live keys by glob pattern
//! - `CONFIG GET dir|dbfilename` - Read startup configuration
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  execute()  │───>│  dispatch() │───>│   cmd_*()   │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │         ▲                                     │             │
//! │   CommandError ──> "-ERR ..."                 ▼             │
//! │                              StorageEngine / ServerConfig   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::config::ServerConfig;
use crate::protocol::{Command, RespValue};
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Application-level failures. Each one becomes an error reply; none of
/// them affects the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR empty command")]
    EmptyCommand,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR null argument for '{0}' command")]
    NullArgument(&'static str),

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR invalid expire time in 'set' command")]
    InvalidExpire,

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR unknown CONFIG parameter '{0}'")]
    UnknownConfig(String),

    #[error("ERR config parameter '{0}' is not set")]
    MissingConfig(String),
}

impl From<CommandError> for RespValue {
    fn from(err: CommandError) -> Self {
        RespValue::error(err.to_string())
    }
}

type CommandResult = Result<RespValue, CommandError>;

/// Handles client commands against the shared store and configuration.
#[derive(Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    config: Arc<ServerConfig>,
}

impl CommandHandler {
    pub fn new(storage: Arc<StorageEngine>, config: Arc<ServerConfig>) -> Self {
        Self { storage, config }
    }

    /// Executes a command and returns the reply to send back.
    ///
    /// Application errors are folded into `-ERR` replies here, so callers
    /// always get something to write.
    pub fn execute(&self, command: Command) -> RespValue {
        match self.dispatch(&command) {
            Ok(reply) => reply,
            Err(err) => {
                trace!(error = %err, "Command rejected");
                err.into()
            }
        }
    }

    fn dispatch(&self, command: &Command) -> CommandResult {
        let name = match command.name() {
            Some(name) => name,
            None if command.is_empty() => return Err(CommandError::EmptyCommand),
            None => return Err(CommandError::UnknownCommand("(nil)".to_string())),
        };
        let args = command.args();

        let upper = name.to_ascii_uppercase();
        match upper.as_slice() {
            b"PING" => self.cmd_ping(args),
            b"ECHO" => self.cmd_echo(args),
            b"SET" => self.cmd_set(args),
            b"GET" => self.cmd_get(args),
            b"KEYS" => self.cmd_keys(args),
            b"CONFIG" => self.cmd_config(args),
            _ => Err(CommandError::UnknownCommand(
                String::from_utf8_lossy(name).into_owned(),
            )),
        }
    }

    // ========================================================================
    // Server Commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, args: &[Option<Bytes>]) -> CommandResult {
        match args {
            [] => Ok(RespValue::pong()),
            [msg] => Ok(RespValue::bulk_string(arg(msg, "ping")?)),
            _ => Err(CommandError::WrongArity("ping")),
        }
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[Option<Bytes>]) -> CommandResult {
        match args {
            [msg] => Ok(RespValue::bulk_string(arg(msg, "echo")?)),
            _ => Err(CommandError::WrongArity("echo")),
        }
    }

    /// CONFIG GET parameter
    fn cmd_config(&self, args: &[Option<Bytes>]) -> CommandResult {
        let (sub, param) = match args {
            [sub, param] => (arg(sub, "config")?, arg(param, "config")?),
            _ => return Err(CommandError::WrongArity("config")),
        };

        if !sub.eq_ignore_ascii_case(b"GET") {
            return Err(CommandError::Syntax);
        }

        let name = String::from_utf8_lossy(&param).to_ascii_lowercase();
        match self.config.lookup(&name) {
            Some(Some(value)) => Ok(RespValue::bulk_array([name, value])),
            Some(None) => Err(CommandError::MissingConfig(name)),
            None => Err(CommandError::UnknownConfig(name)),
        }
    }

    // ========================================================================
    // String Commands
    // ========================================================================

    /// SET key value [PX milliseconds]
    fn cmd_set(&self, args: &[Option<Bytes>]) -> CommandResult {
        let (key, value, ttl) = match args {
            [key, value] => (key, value, None),
            [key, value, opt, ms] => {
                if !arg(opt, "set")?.eq_ignore_ascii_case(b"PX") {
                    return Err(CommandError::Syntax);
                }
                let ms = parse_integer(&arg(ms, "set")?)?;
                if ms <= 0 {
                    return Err(CommandError::InvalidExpire);
                }
                (key, value, Some(Duration::from_millis(ms as u64)))
            }
            [_, _, _] => return Err(CommandError::Syntax),
            _ => return Err(CommandError::WrongArity("set")),
        };

        self.storage.set(arg(key, "set")?, arg(value, "set")?, ttl);
        Ok(RespValue::ok())
    }

    /// GET key
    fn cmd_get(&self, args: &[Option<Bytes>]) -> CommandResult {
        let key = match args {
            [key] => arg(key, "get")?,
            _ => return Err(CommandError::WrongArity("get")),
        };

        Ok(match self.storage.get(&key) {
            Some(value) => RespValue::bulk_string(value),
            None => RespValue::null(),
        })
    }

    // ========================================================================
    // Key Commands
    // ========================================================================

    /// KEYS pattern
    fn cmd_keys(&self, args: &[Option<Bytes>]) -> CommandResult {
        let pattern = match args {
            [pattern] => arg(pattern, "keys")?,
            _ => return Err(CommandError::WrongArity("keys")),
        };

        Ok(RespValue::bulk_array(self.storage.keys(&pattern)))
    }
}

/// Borrows a required argument, rejecting a null bulk string.
fn arg(value: &Option<Bytes>, command: &'static str) -> Result<Bytes, CommandError> {
    value.clone().ok_or(CommandError::NullArgument(command))
}

fn parse_integer(raw: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotInteger)
}
