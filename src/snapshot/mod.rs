//! Snapshot Bootstrap
//!
//! Populates the store from an RDB-style file before the listener starts.
//! The file is parsed completely first and only then committed, so a corrupt
//! snapshot leaves the store untouched.

pub mod reader;

pub use reader::{SnapshotError, SnapshotReader, SnapshotRecord};

use crate::storage::StorageEngine;
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::Path;
use std::time::SystemTime;
use tracing::info;

/// Loads the snapshot at `path` into `store`.
///
/// A missing file is not an error: the server simply starts empty.
/// Returns the number of records inserted, expired ones included.
pub fn load_into(store: &StorageEngine, path: &Path) -> Result<usize, SnapshotError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "No snapshot found, starting empty");
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };

    let records = SnapshotReader::new(BufReader::new(file)).load()?;
    let count = records.len();
    commit(store, records, SystemTime::now());

    info!(path = %path.display(), keys = count, "Snapshot loaded");
    Ok(count)
}

/// Inserts parsed records, converting each deadline against `now`.
pub fn commit(store: &StorageEngine, records: Vec<SnapshotRecord>, now: SystemTime) {
    for record in records {
        let ttl = record.ttl_from(now);
        store.set(record.key, record.value, ttl);
    }
}
