//! RESP Wire Codec
//!
//! Requests are arrays of bulk strings; replies are simple strings, errors,
//! bulk strings (possibly null) or arrays of bulk strings.
//!
//! ## Modules
//!
//! - `types`: reply values, decoded commands, and the encoder
//! - `parser`: the incremental request decoder and a reply decoder
//!
//! ## Example
//!
//! ```
//! use snapkv::protocol::{DecodeResult, RespParser, RespValue};
//!
//! let mut parser = RespParser::new();
//! parser.feed(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
//! assert!(matches!(parser.try_decode(), DecodeResult::Complete(_)));
//!
//! let reply = RespValue::bulk_string("Ariz");
//! assert_eq!(reply.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{drain_replies, parse_reply, DecodeResult, ParseError, ParseResult, RespParser};
pub use types::{Command, RespValue};
