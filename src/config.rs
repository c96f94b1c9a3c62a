//! Server Configuration
//!
//! Parsed once from the command line and shared read-only afterwards.
//! `dir` and `dbfilename` locate the bootstrap snapshot and are what
//! `CONFIG GET` reports back to clients.

use crate::storage::SweepConfig;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "snapkv", version, about = "In-memory key-value server with RDB snapshot bootstrap")]
pub struct ServerConfig {
    /// Directory holding the snapshot file
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Snapshot file name inside --dir
    #[arg(long)]
    pub dbfilename: Option<String>,

    /// Host to bind to
    #[arg(long, default_value = crate::DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = crate::DEFAULT_PORT)]
    pub port: u16,

    /// Milliseconds between active expiry sweeps
    #[arg(long, default_value_t = 100)]
    pub sweep_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            dir: None,
            dbfilename: None,
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            sweep_interval_ms: 100,
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `dir/dbfilename`, available only when both are configured.
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        match (&self.dir, &self.dbfilename) {
            (Some(dir), Some(name)) => Some(dir.join(name)),
            _ => None,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            interval: self.sweep_interval(),
        }
    }

    /// Value reported by `CONFIG GET <name>`.
    ///
    /// `None` for a parameter this server does not know. `Some(None)` for a
    /// known parameter that was not supplied at startup.
    pub fn lookup(&self, name: &str) -> Option<Option<String>> {
        match name {
            "dir" => Some(self.dir.as_ref().map(|d| d.display().to_string())),
            "dbfilename" => Some(self.dbfilename.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:6379");
        assert_eq!(config.snapshot_path(), None);
        assert_eq!(config.sweep_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_parse_snapshot_flags() {
        let config = ServerConfig::try_parse_from([
            "snapkv",
            "--dir",
            "/tmp/redis-files",
            "--dbfilename",
            "dump.rdb",
            "--port",
            "6380",
        ])
        .unwrap();

        assert_eq!(config.port, 6380);
        assert_eq!(
            config.snapshot_path(),
            Some(PathBuf::from("/tmp/redis-files/dump.rdb"))
        );
        assert_eq!(
            config.lookup("dir"),
            Some(Some("/tmp/redis-files".to_string()))
        );
        assert_eq!(config.lookup("dbfilename"), Some(Some("dump.rdb".to_string())));
    }

    #[test]
    fn test_lookup_missing_and_unknown() {
        let config = ServerConfig::try_parse_from(["snapkv"]).unwrap();
        assert_eq!(config.lookup("dir"), Some(None));
        assert_eq!(config.lookup("maxmemory"), None);
    }

    #[test]
    fn test_snapshot_path_needs_both_parts() {
        let config = ServerConfig::try_parse_from(["snapkv", "--dir", "/data"]).unwrap();
        assert_eq!(config.snapshot_path(), None);
    }
}
