//! RESP Frame Types
//!
//! Requests arrive as arrays of bulk strings; replies go out as one of a
//! handful of frame shapes. Both directions share the same framing:
//!
//! - `+` Simple String: `+OK\r\n`
//! - `-` Error: `-ERR unknown command 'FOO'\r\n`
//! - `$` Bulk String: `$5\r\nhello\r\n`, null form `$-1\r\n`
//! - `*` Array: `*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n`

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A reply value sent back to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Non-binary-safe status line.
    /// Format: `+<string>\r\n`
    SimpleString(String),

    /// Error line.
    /// Format: `-<error message>\r\n`
    Error(String),

    /// Binary-safe string.
    /// Format: `$<length>\r\n<data>\r\n`
    BulkString(Bytes),

    /// Null bulk string: `$-1\r\n`
    Null,

    /// Format: `*<count>\r\n<element1><element2>...`
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Creates a new simple string response.
    ///
    /// # Example
    /// ```
    /// use snapkv::protocol::types::RespValue;
    /// let ok = RespValue::simple_string("OK");
    /// assert_eq!(ok.serialize(), b"+OK\r\n");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(single_line(s.into()))
    }

    /// Creates a new error response.
    ///
    /// CR and LF become spaces, so text echoed from a client cannot end the
    /// line early.
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(single_line(s.into()))
    }

    /// Creates a new bulk string response.
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// Creates a null bulk string response.
    pub fn null() -> Self {
        RespValue::Null
    }

    /// Creates an array response.
    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// Builds an array of bulk strings.
    pub fn bulk_array<I, B>(items: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        RespValue::Array(items.into_iter().map(RespValue::bulk_string).collect())
    }

    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Encodes the reply into its wire representation.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Encodes the reply onto the end of `buf`.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                buf.push(prefix::SIMPLE_STRING);
                extend_line(buf, s);
            }
            RespValue::Error(s) => {
                buf.push(prefix::ERROR);
                extend_line(buf, s);
            }
            RespValue::BulkString(data) => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            RespValue::Array(values) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }
}

fn is_line_break(c: char) -> bool {
    c == '\r' || c == '\n'
}

fn single_line(s: String) -> String {
    if s.contains(is_line_break) {
        s.replace(is_line_break, " ")
    } else {
        s
    }
}

/// Writes a status or error line. Line breaks inside `s` are written as
/// spaces even when the variant was built without its constructor.
fn extend_line(buf: &mut Vec<u8>, s: &str) {
    buf.extend(s.bytes().map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }));
    buf.extend_from_slice(CRLF);
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "\"{}\"", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(values) if values.is_empty() => write!(f, "(empty array)"),
            RespValue::Array(values) => {
                writeln!(f)?;
                for (i, v) in values.iter().enumerate() {
                    writeln!(f, "{}) {}", i + 1, v)?;
                }
                Ok(())
            }
        }
    }
}

/// A decoded client request: an ordered list of arguments.
///
/// A `None` argument is a null bulk string (`$-1\r\n`). The decoder never
/// substitutes placeholder text for it; the dispatcher decides what a null
/// argument means for each command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    args: Vec<Option<Bytes>>,
}

impl Command {
    pub fn new(args: Vec<Option<Bytes>>) -> Self {
        Self { args }
    }

    /// Builds a command from non-null arguments.
    pub fn from_parts<I, B>(parts: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            args: parts.into_iter().map(|p| Some(p.into())).collect(),
        }
    }

    /// The command name, i.e. the first argument.
    pub fn name(&self) -> Option<&Bytes> {
        self.args.first().and_then(Option::as_ref)
    }

    /// Arguments after the command name.
    pub fn args(&self) -> &[Option<Bytes>] {
        self.args.get(1..).unwrap_or(&[])
    }

    /// Total number of elements, including the name.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Encodes the command as a request frame.
    pub fn serialize(&self) -> Vec<u8> {
        let frame = RespValue::Array(
            self.args
                .iter()
                .map(|arg| match arg {
                    Some(b) => RespValue::BulkString(b.clone()),
                    None => RespValue::Null,
                })
                .collect(),
        );
        frame.serialize()
    }
}
