//! Expiring Key-Value Store
//!
//! Maps keys to string values with an optional absolute deadline.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: keys hash onto 64 shards, each behind its own `RwLock`.
//!    Every single-key operation runs entirely inside one shard's critical
//!    section, so a `set` and a `get` on the same key never interleave.
//! 2. **Deadlines, not timers**: an entry stores the `Instant` it dies at.
//!    Nothing is scheduled per key.
//! 3. **Lazy + Active Expiry**: every read re-checks the deadline and drops a
//!    dead entry on sight; the background sweeper (`expiry` module) reclaims
//!    entries nobody reads.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// A stored value and its optional deadline.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Bytes,
    /// When this entry stops being visible (None = never)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// A ttl too large to represent as an `Instant` never expires.
    pub fn new(value: Bytes, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        }
    }

    /// Whether the deadline has been reached as of `now`.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

type ShardMap = HashMap<Bytes, Entry>;

/// The Expiring Store shared by every connection.
///
/// Wrap it in an `Arc`; all methods take `&self`.
///
/// # Example
///
/// ```
/// use snapkv::storage::StorageEngine;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let engine = StorageEngine::new();
/// engine.set(Bytes::from("name"), Bytes::from("Ariz"), None);
/// assert_eq!(engine.get(b"name"), Some(Bytes::from("Ariz")));
///
/// engine.set(Bytes::from("gone"), Bytes::from("x"), Some(Duration::ZERO));
/// assert_eq!(engine.get(b"gone"), None);
/// ```
pub struct StorageEngine {
    shards: Vec<RwLock<ShardMap>>,

    /// Physical entries, live or not yet reclaimed
    key_count: AtomicU64,

    /// Entries removed because their deadline passed
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .field("expired_count", &self.expired_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
            key_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard_index(key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    // Poisoning means a thread panicked mid-update; the map itself is still
    // structurally sound, so keep serving.
    fn read_shard(&self, key: &[u8]) -> RwLockReadGuard<'_, ShardMap> {
        self.shards[Self::shard_index(key)]
            .read()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn write_shard(&self, key: &[u8]) -> RwLockWriteGuard<'_, ShardMap> {
        self.shards[Self::shard_index(key)]
            .write()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Inserts or overwrites `key`. With a ttl the entry dies at now + ttl;
    /// a zero ttl makes it invisible immediately.
    pub fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) {
        let mut shard = self.write_shard(&key);
        if shard.insert(key, Entry::new(value, ttl)).is_none() {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the value if the key exists and its deadline has not passed.
    /// A dead entry found here is removed.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let now = Instant::now();

        // Fast path under the read lock
        {
            let shard = self.read_shard(key);
            match shard.get(key) {
                Some(entry) if !entry.is_expired_at(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        self.reap(key, now);
        None
    }

    /// Expiry-aware existence check. Does not copy the value.
    pub fn exists(&self, key: &[u8]) -> bool {
        let now = Instant::now();
        let expired = {
            let shard = self.read_shard(key);
            match shard.get(key) {
                Some(entry) => entry.is_expired_at(now),
                None => return false,
            }
        };

        if expired {
            self.reap(key, now);
        }
        !expired
    }

    /// Unconditionally deletes `key`. Returns whether an entry was removed.
    pub fn remove(&self, key: &[u8]) -> bool {
        let mut shard = self.write_shard(key);
        if shard.remove(key).is_some() {
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Removes `key` only if it is still dead under the write lock. Another
    /// connection may have overwritten it between our read and write locks.
    fn reap(&self, key: &[u8], now: Instant) {
        let mut shard = self.write_shard(key);
        if shard.get(key).is_some_and(|e| e.is_expired_at(now)) {
            shard.remove(key);
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Live keys matching a glob pattern.
    ///
    /// Supported patterns:
    /// - `*` matches any run of bytes
    /// - `?` matches exactly one byte
    /// - `[ae]`, `[a-z]`, `[^x]` match one byte from a class
    /// - `\x` matches `x` literally
    ///
    /// Scans every shard; cost grows with the keyspace.
    pub fn keys(&self, pattern: &[u8]) -> Vec<Bytes> {
        let now = Instant::now();
        let mut result = Vec::new();

        for shard in &self.shards {
            let shard = shard.read().unwrap_or_else(|e| e.into_inner());
            result.extend(
                shard
                    .iter()
                    .filter(|(key, entry)| !entry.is_expired_at(now) && glob_match(pattern, key))
                    .map(|(key, _)| key.clone()),
            );
        }

        result
    }

    /// Physical entry count, including dead entries not reclaimed yet.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total entries removed by lazy or active expiry since startup.
    pub fn expired_total(&self) -> u64 {
        self.expired_count.load(Ordering::Relaxed)
    }

    /// One active-expiry pass over every shard.
    ///
    /// Each shard is locked on its own, so readers of other shards keep going.
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&self) -> u64 {
        let mut cleaned = 0u64;

        for shard in &self.shards {
            let mut shard = shard.write().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let before = shard.len();
            shard.retain(|_, entry| !entry.is_expired_at(now));
            cleaned += (before - shard.len()) as u64;
        }

        if cleaned > 0 {
            self.key_count.fetch_sub(cleaned, Ordering::Relaxed);
            self.expired_count.fetch_add(cleaned, Ordering::Relaxed);
        }

        cleaned
    }
}

/// Byte-wise glob matching for `KEYS`.
///
/// Every token other than `*` consumes exactly one byte, so only the most
/// recent `*` ever needs to be retried. Runs in O(pattern * text).
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Pattern position just after the last `*`, and the text position it resumes from
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if pattern.get(p) == Some(&b'*') {
            p += 1;
            star = Some((p, t));
            continue;
        }
        if let Some(width) = match_token(&pattern[p..], text[t]) {
            p += width;
            t += 1;
            continue;
        }
        match star {
            Some((after_star, resume)) => {
                // Let the `*` swallow one more byte and try again
                p = after_star;
                t = resume + 1;
                star = Some((after_star, resume + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&b| b == b'*')
}

/// Width of the token at the front of `pattern` if it matches `c`.
fn match_token(pattern: &[u8], c: u8) -> Option<usize> {
    let (&first, rest) = pattern.split_first()?;
    match first {
        b'?' => Some(1),
        b'[' => match rest.iter().position(|&b| b == b']') {
            Some(close) => {
                let (negate, class) = match rest[..close].split_first() {
                    Some((b'^', tail)) => (true, tail),
                    _ => (false, &rest[..close]),
                };
                (class_contains(class, c) != negate).then_some(close + 2)
            }
            // Unterminated class: treat '[' literally
            None => (c == b'[').then_some(1),
        },
        b'\\' if !rest.is_empty() => (rest[0] == c).then_some(2),
        literal => (literal == c).then_some(1),
    }
}

fn class_contains(class: &[u8], c: u8) -> bool {
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == b'-' {
            if class[i] <= c && c <= class[i + 2] {
                return true;
            }
            i += 3;
        } else {
            if class[i] == c {
                return true;
            }
            i += 1;
        }
    }
    false
}
