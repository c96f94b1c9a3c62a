//! RDB Snapshot Reader
//!
//! Reads the subset of the RDB layout this server bootstraps from:
//!
//! ```text
//! "REDIS" <u32 LE version>
//! then, until end of file, entries tagged by one byte:
//!   0xFA  <u8 len> name <u8 len> value                      metadata
//!   0xFE  <u8 db index> <u8 key count> <u8 expiring count>  database selector
//!   0xFC  <u8 len> key <u64 LE unix ms>   <u8 len> value    key, ms deadline
//!   0xFD  <u8 len> key <u64 LE unix secs> <u8 len> value    key, secs deadline
//! ```
//!
//! Deadlines are kept as absolute wall-clock times. They are turned into a
//! remaining ttl only when the record is inserted, so an entry whose
//! deadline already passed is still inserted and the store reports it
//! absent.

use bytes::Bytes;
use std::io::{self, Read};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

/// Magic bytes at the start of every snapshot.
pub const MAGIC: &[u8; 5] = b"REDIS";

/// Header length: magic plus a 4-byte version.
pub const HEADER_LEN: usize = 9;

/// Entry type tags.
pub mod opcode {
    pub const METADATA: u8 = 0xFA;
    pub const EXPIRE_MS: u8 = 0xFC;
    pub const EXPIRE_SECS: u8 = 0xFD;
    pub const SELECT_DB: u8 = 0xFE;
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Structural violation: bad magic, unknown tag, or a short read
    #[error("corrupt snapshot: {0}")]
    CorruptFormat(String),

    #[error("failed to read snapshot: {0}")]
    Io(#[from] io::Error),
}

impl SnapshotError {
    fn corrupt(msg: impl Into<String>) -> Self {
        SnapshotError::CorruptFormat(msg.into())
    }
}

/// One key recovered from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub key: Bytes,
    pub value: Bytes,
    /// Absolute deadline, if the entry had one
    pub expires_at: Option<SystemTime>,
}

impl SnapshotRecord {
    /// Remaining lifetime relative to `now`. A deadline in the past yields
    /// `Duration::ZERO`, which the store treats as already expired.
    pub fn ttl_from(&self, now: SystemTime) -> Option<Duration> {
        self.expires_at
            .map(|at| at.duration_since(now).unwrap_or(Duration::ZERO))
    }
}

/// Streaming reader over a snapshot source.
///
/// # Example
///
/// ```
/// use snapkv::snapshot::SnapshotReader;
///
/// let bytes = b"REDIS\x0b\x00\x00\x00\xfc\x03foo\x00\x00\x00\x00\x00\x00\x00\x00\x03bar";
/// let mut reader = SnapshotReader::new(&bytes[..]);
/// let records = reader.load().unwrap();
/// assert_eq!(records.len(), 1);
/// assert_eq!(reader.version(), Some(11));
/// ```
#[derive(Debug)]
pub struct SnapshotReader<R> {
    source: R,
    version: Option<u32>,
}

impl<R: Read> SnapshotReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            version: None,
        }
    }

    /// Version number from the header, once `load()` has read it.
    pub fn version(&self) -> Option<u32> {
        self.version
    }

    /// Reads the whole snapshot.
    ///
    /// Either every record is returned or the load fails; a truncated final
    /// entry fails the whole load rather than yielding a half record.
    pub fn load(&mut self) -> Result<Vec<SnapshotRecord>, SnapshotError> {
        self.read_header()?;

        let mut records = Vec::new();
        while let Some(tag) = self.next_tag()? {
            match tag {
                opcode::METADATA => {
                    let name = self.read_short_string("metadata name")?;
                    let value = self.read_short_string("metadata value")?;
                    debug!(
                        name = %String::from_utf8_lossy(&name),
                        value = %String::from_utf8_lossy(&value),
                        "Snapshot metadata"
                    );
                }
                opcode::SELECT_DB => {
                    let [index, keys, expiring] = self.read_array::<3>("database selector")?;
                    debug!(index, keys, expiring, "Snapshot database section");
                }
                opcode::EXPIRE_MS | opcode::EXPIRE_SECS => {
                    records.push(self.read_keyed_entry(tag)?);
                }
                other => {
                    return Err(SnapshotError::corrupt(format!(
                        "unknown entry tag {:#04x}",
                        other
                    )))
                }
            }
        }

        debug!(records = records.len(), "Snapshot parsed");
        Ok(records)
    }

    fn read_header(&mut self) -> Result<(), SnapshotError> {
        let header = self.read_array::<HEADER_LEN>("header")?;
        if &header[..MAGIC.len()] != MAGIC {
            return Err(SnapshotError::corrupt("bad magic, expected \"REDIS\""));
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&header[MAGIC.len()..]);
        let version = u32::from_le_bytes(version);
        debug!(version, "Snapshot header");
        self.version = Some(version);
        Ok(())
    }

    fn read_keyed_entry(&mut self, tag: u8) -> Result<SnapshotRecord, SnapshotError> {
        let key = self.read_short_string("key")?;
        let raw = u64::from_le_bytes(self.read_array::<8>("expiry timestamp")?);

        let offset = if tag == opcode::EXPIRE_MS {
            Duration::from_millis(raw)
        } else {
            Duration::from_secs(raw)
        };
        let expires_at = UNIX_EPOCH
            .checked_add(offset)
            .ok_or_else(|| SnapshotError::corrupt("expiry timestamp out of range"))?;

        let value = self.read_short_string("value")?;

        Ok(SnapshotRecord {
            key,
            value,
            expires_at: Some(expires_at),
        })
    }

    /// Reads the next tag byte; `None` at a clean end of file.
    fn next_tag(&mut self) -> Result<Option<u8>, SnapshotError> {
        let mut tag = [0u8; 1];
        loop {
            match self.source.read(&mut tag) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(tag[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// `<u8 len><len bytes>`
    fn read_short_string(&mut self, what: &str) -> Result<Bytes, SnapshotError> {
        let [len] = self.read_array::<1>(what)?;
        let mut data = vec![0u8; len as usize];
        self.fill(&mut data, what)?;
        Ok(Bytes::from(data))
    }

    fn read_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N], SnapshotError> {
        let mut buf = [0u8; N];
        self.fill(&mut buf, what)?;
        Ok(buf)
    }

    fn fill(&mut self, buf: &mut [u8], what: &str) -> Result<(), SnapshotError> {
        self.source.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                SnapshotError::corrupt(format!("truncated {}", what))
            }
            _ => SnapshotError::Io(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u8> {
        let mut buf = MAGIC.to_vec();
        buf.extend_from_slice(&11u32.to_le_bytes());
        buf
    }

    fn push_short(buf: &mut Vec<u8>, s: &[u8]) {
        buf.push(s.len() as u8);
        buf.extend_from_slice(s);
    }

    fn push_entry(buf: &mut Vec<u8>, tag: u8, key: &[u8], ts: u64, value: &[u8]) {
        buf.push(tag);
        push_short(buf, key);
        buf.extend_from_slice(&ts.to_le_bytes());
        push_short(buf, value);
    }

    fn unix_ms(t: SystemTime) -> u64 {
        t.duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
    }

    fn load(bytes: &[u8]) -> Result<Vec<SnapshotRecord>, SnapshotError> {
        SnapshotReader::new(bytes).load()
    }

    #[test]
    fn test_header_only() {
        let bytes = header();
        let mut reader = SnapshotReader::new(&bytes[..]);
        assert!(reader.load().unwrap().is_empty());
        assert_eq!(reader.version(), Some(11));
    }

    #[test]
    fn test_short_header_is_corrupt() {
        assert!(matches!(
            load(b"REDIS\x0b"),
            Err(SnapshotError::CorruptFormat(_))
        ));
        assert!(matches!(load(b""), Err(SnapshotError::CorruptFormat(_))));
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        assert!(matches!(
            load(b"RADIS\x0b\x00\x00\x00"),
            Err(SnapshotError::CorruptFormat(_))
        ));
    }

    #[test]
    fn test_full_layout() {
        let future = SystemTime::now() + Duration::from_secs(600);
        let mut buf = header();
        buf.push(opcode::METADATA);
        push_short(&mut buf, b"redis-ver");
        push_short(&mut buf, b"7.2.0");
        buf.extend_from_slice(&[opcode::SELECT_DB, 0, 2, 2]);
        push_entry(&mut buf, opcode::EXPIRE_MS, b"foo", unix_ms(future), b"bar");
        push_entry(&mut buf, opcode::EXPIRE_SECS, b"baz", 1_700_000_000, b"qux");

        let records = load(&buf).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].key, Bytes::from("foo"));
        assert_eq!(records[0].value, Bytes::from("bar"));
        assert_eq!(
            records[0].expires_at,
            Some(UNIX_EPOCH + Duration::from_millis(unix_ms(future)))
        );

        assert_eq!(records[1].key, Bytes::from("baz"));
        assert_eq!(
            records[1].expires_at,
            Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
        );
    }

    #[test]
    fn test_ttl_from() {
        let now = SystemTime::now();
        let record = SnapshotRecord {
            key: Bytes::from("k"),
            value: Bytes::from("v"),
            expires_at: Some(now + Duration::from_secs(5)),
        };
        assert_eq!(record.ttl_from(now), Some(Duration::from_secs(5)));

        let past = SnapshotRecord {
            expires_at: Some(now - Duration::from_secs(5)),
            ..record.clone()
        };
        assert_eq!(past.ttl_from(now), Some(Duration::ZERO));

        let forever = SnapshotRecord {
            expires_at: None,
            ..record
        };
        assert_eq!(forever.ttl_from(now), None);
    }

    #[test]
    fn test_unknown_tag_is_corrupt() {
        let mut buf = header();
        buf.push(0x42);
        match load(&buf) {
            Err(SnapshotError::CorruptFormat(msg)) => assert!(msg.contains("0x42")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_truncated_entry_is_corrupt() {
        let mut buf = header();
        push_entry(&mut buf, opcode::EXPIRE_MS, b"foo", 0, b"bar");

        // Every proper prefix that cuts into the entry must fail.
        for cut in HEADER_LEN + 1..buf.len() {
            assert!(
                matches!(load(&buf[..cut]), Err(SnapshotError::CorruptFormat(_))),
                "prefix of {} bytes should be corrupt",
                cut
            );
        }
        assert_eq!(load(&buf).unwrap().len(), 1);
    }

    #[test]
    fn test_truncated_metadata_is_corrupt() {
        let mut buf = header();
        buf.extend_from_slice(&[opcode::METADATA, 5, b'a', b'b']);
        assert!(matches!(load(&buf), Err(SnapshotError::CorruptFormat(_))));
    }

    #[test]
    fn test_empty_key_and_value() {
        let mut buf = header();
        push_entry(&mut buf, opcode::EXPIRE_MS, b"", 0, b"");
        let records = load(&buf).unwrap();
        assert_eq!(records[0].key, Bytes::new());
        assert_eq!(records[0].value, Bytes::new());
    }
}
