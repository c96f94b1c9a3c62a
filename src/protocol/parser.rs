//! Incremental RESP Decoder
//!
//! TCP delivers a byte stream, not frames: one read may hold half a command,
//! or three commands and the start of a fourth. The decoder therefore owns an
//! accumulation buffer and is driven in two steps:
//!
//! 1. `feed()` appends whatever bytes arrived.
//! 2. `try_decode()` tries to cut one complete command off the front.
//!
//! `try_decode()` answers with a [`DecodeResult`]:
//! - `Complete(cmd)`: a whole frame was consumed from the buffer
//! - `Incomplete`: the frame is not fully buffered yet; the buffer is left
//!   exactly as it was so a later `feed()` can finish it
//! - `Malformed(err)`: the bytes can never become a valid request
//!
//! A short buffer is never an error. Only `Malformed` ends a connection.

use crate::protocol::types::{prefix, Command, RespValue, CRLF};
use bytes::{Buf, Bytes, BytesMut};
use std::ops::Range;
use thiserror::Error;

/// Ways a request or reply frame can be malformed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Leading byte is not a known frame type
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Length or count line is not a decimal integer
    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string or error line
    #[error("invalid UTF-8 in {0} line")]
    InvalidUtf8(&'static str),

    /// Bulk string length below -1
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array count is negative
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Request array holds something other than a bulk string
    #[error("expected bulk string inside request array, found {0:#04x}")]
    UnexpectedElement(u8),

    /// Bulk payload is not followed by CRLF
    #[error("bulk string missing trailing CRLF")]
    MissingCrlf,

    /// Reply arrays nested deeper than MAX_NESTING_DEPTH
    #[error("maximum nesting depth exceeded: {0}")]
    TooDeep(usize),

    /// Declared bulk length exceeds MAX_BULK_SIZE
    #[error("bulk string too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth accepted by [`parse_reply`]
pub const MAX_NESTING_DEPTH: usize = 32;

/// Outcome of one decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A full command was removed from the front of the buffer.
    Complete(Command),
    /// More bytes are needed; nothing was consumed.
    Incomplete,
    /// The buffered bytes violate the protocol.
    Malformed(ParseError),
}

/// Per-connection request decoder.
///
/// # Example
///
/// ```
/// use snapkv::protocol::{DecodeResult, RespParser};
///
/// let mut parser = RespParser::new();
/// parser.feed(b"*1\r\n$4\r\nPI");
/// assert_eq!(parser.try_decode(), DecodeResult::Incomplete);
///
/// parser.feed(b"NG\r\n");
/// match parser.try_decode() {
///     DecodeResult::Complete(cmd) => assert_eq!(cmd.name().unwrap().as_ref(), b"PING"),
///     other => panic!("unexpected {:?}", other),
/// }
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    buffer: BytesMut,
}

impl RespParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends raw bytes to the accumulation buffer. Does not parse.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Direct access to the accumulation buffer, so a socket can read
    /// straight into it. Equivalent to `feed()` for whatever gets appended.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Number of bytes waiting to be decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Attempts to decode one command from the front of the buffer.
    pub fn try_decode(&mut self) -> DecodeResult {
        if self.buffer.is_empty() {
            return DecodeResult::Incomplete;
        }

        match locate_command(&self.buffer) {
            Ok(Some(frame)) => {
                // Freeze only the consumed frame; arguments become cheap slices of it.
                let bytes = self.buffer.split_to(frame.consumed).freeze();
                let args = frame
                    .args
                    .into_iter()
                    .map(|range| range.map(|r| bytes.slice(r)))
                    .collect();
                DecodeResult::Complete(Command::new(args))
            }
            Ok(None) => DecodeResult::Incomplete,
            Err(e) => {
                self.buffer.clear();
                DecodeResult::Malformed(e)
            }
        }
    }
}

/// Byte ranges of a fully buffered command, relative to the buffer start.
struct Located {
    args: Vec<Option<Range<usize>>>,
    consumed: usize,
}

/// Scans one request frame without consuming anything.
fn locate_command(buf: &[u8]) -> ParseResult<Option<Located>> {
    match buf[0] {
        prefix::ARRAY => {
            let Some((count, header_len)) = read_length_line(buf)? else {
                return Ok(None);
            };
            if count < 0 {
                return Err(ParseError::InvalidArrayLength(count));
            }

            let mut args = Vec::with_capacity((count as usize).min(1024));
            let mut pos = header_len;
            for _ in 0..count {
                let Some(&first) = buf.get(pos) else {
                    return Ok(None);
                };
                if first != prefix::BULK_STRING {
                    return Err(ParseError::UnexpectedElement(first));
                }
                match locate_bulk(&buf[pos..])? {
                    Some((range, used)) => {
                        args.push(range.map(|r| r.start + pos..r.end + pos));
                        pos += used;
                    }
                    None => return Ok(None),
                }
            }

            Ok(Some(Located {
                args,
                consumed: pos,
            }))
        }
        // A bare bulk string is accepted as a single-argument command.
        prefix::BULK_STRING => Ok(locate_bulk(buf)?.map(|(range, used)| Located {
            args: vec![range],
            consumed: used,
        })),
        other => Err(ParseError::UnknownPrefix(other)),
    }
}

/// Locates `$<len>\r\n<payload>\r\n`. The range is `None` for `$-1`.
fn locate_bulk(buf: &[u8]) -> ParseResult<Option<(Option<Range<usize>>, usize)>> {
    let Some((length, header_len)) = read_length_line(buf)? else {
        return Ok(None);
    };

    if length == -1 {
        return Ok(Some((None, header_len)));
    }
    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }

    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let end = header_len + length;
    if buf.len() < end + CRLF.len() {
        return Ok(None);
    }
    if &buf[end..end + CRLF.len()] != CRLF {
        return Err(ParseError::MissingCrlf);
    }

    Ok(Some((Some(header_len..end), end + CRLF.len())))
}

/// Reads `<prefix><integer>\r\n`, returning the integer and the line length.
fn read_length_line(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    match find_crlf(&buf[1..]) {
        Some(pos) => {
            let n = parse_length(&buf[1..1 + pos])?;
            Ok(Some((n, 1 + pos + CRLF.len())))
        }
        None => Ok(None),
    }
}

/// Strict decimal: optional `-`, then one or more ASCII digits.
fn parse_length(line: &[u8]) -> ParseResult<i64> {
    let invalid = || ParseError::InvalidInteger(String::from_utf8_lossy(line).into_owned());

    let digits = line.strip_prefix(b"-").unwrap_or(line);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }

    std::str::from_utf8(line)
        .map_err(|_| invalid())?
        .parse()
        .map_err(|_| invalid())
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes a single reply frame from `buf`.
///
/// Returns the value and the number of bytes it occupied, or `Ok(None)` if
/// the frame is not complete yet. This is the client-side counterpart of
/// [`RespValue::serialize`].
pub fn parse_reply(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    parse_reply_at(buf, 0)
}

fn parse_reply_at(buf: &[u8], depth: usize) -> ParseResult<Option<(RespValue, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }
    if depth > MAX_NESTING_DEPTH {
        return Err(ParseError::TooDeep(MAX_NESTING_DEPTH));
    }

    match buf[0] {
        prefix::SIMPLE_STRING | prefix::ERROR => {
            let Some(pos) = find_crlf(&buf[1..]) else {
                return Ok(None);
            };
            let is_error = buf[0] == prefix::ERROR;
            let text = std::str::from_utf8(&buf[1..1 + pos])
                .map_err(|_| ParseError::InvalidUtf8(if is_error { "error" } else { "status" }))?
                .to_string();
            let value = if is_error {
                RespValue::Error(text)
            } else {
                RespValue::SimpleString(text)
            };
            Ok(Some((value, 1 + pos + CRLF.len())))
        }
        prefix::BULK_STRING => Ok(locate_bulk(buf)?.map(|(range, used)| {
            let value = match range {
                Some(r) => RespValue::BulkString(Bytes::copy_from_slice(&buf[r])),
                None => RespValue::Null,
            };
            (value, used)
        })),
        prefix::ARRAY => {
            let Some((count, mut consumed)) = read_length_line(buf)? else {
                return Ok(None);
            };
            if count == -1 {
                return Ok(Some((RespValue::Null, consumed)));
            }
            if count < 0 {
                return Err(ParseError::InvalidArrayLength(count));
            }

            let mut elements = Vec::with_capacity((count as usize).min(1024));
            for _ in 0..count {
                match parse_reply_at(&buf[consumed..], depth + 1)? {
                    Some((value, used)) => {
                        elements.push(value);
                        consumed += used;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(elements), consumed)))
        }
        other => Err(ParseError::UnknownPrefix(other)),
    }
}

/// Drains every complete reply currently held in `buf`.
///
/// Convenience for test clients that read several pipelined replies at once.
pub fn drain_replies(buf: &mut BytesMut) -> ParseResult<Vec<RespValue>> {
    let mut replies = Vec::new();
    while let Some((value, used)) = parse_reply(buf)? {
        buf.advance(used);
        replies.push(value);
    }
    Ok(replies)
}
