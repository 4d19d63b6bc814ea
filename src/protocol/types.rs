//! RESP Frame Types
//!
//! A frame is one self-delimited protocol unit on the wire. Five kinds are
//! supported, distinguished by a one-byte prefix; every logical line ends
//! with CRLF (`\r\n`):
//!
//! - `+` Simple String — `+OK\r\n`
//! - `-` Error — `-ERR unknown command\r\n`
//! - `:` Integer — `:1000\r\n`
//! - `$` Bulk String — `$5\r\nhello\r\n`; `$-1\r\n` is the null bulk
//! - `*` Array — `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`
//!
//! Bulk strings are binary safe; simple strings must not contain CRLF.

use bytes::Bytes;
use std::fmt;

/// The CRLF line terminator.
pub const CRLF: &[u8] = b"\r\n";

/// Precomputed reply for successful mutations.
pub const OK_REPLY: &[u8] = b"+OK\r\n";

/// Precomputed null bulk string, the absence sentinel.
pub const NIL_REPLY: &[u8] = b"$-1\r\n";

/// Frame kind prefix bytes.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// One decoded (or to-be-encoded) protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Non-binary-safe single-line string. Must not contain CRLF.
    SimpleString(String),

    /// Error reply with a short human-readable message.
    Error(String),

    /// 64-bit signed integer.
    Integer(i64),

    /// Length-prefixed, binary-safe byte string.
    BulkString(Bytes),

    /// The null bulk string `$-1\r\n`; distinct from an empty bulk.
    Null,

    /// Ordered sequence of frames, recursively encoded.
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// The ubiquitous `+OK\r\n` reply.
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Serializes this frame to its wire representation.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes into an existing buffer, avoiding a fresh allocation per
    /// reply on the hot path.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                buf.push(prefix::SIMPLE_STRING);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::BulkString(data) => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => {
                buf.extend_from_slice(NIL_REPLY);
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

    /// Extracts the byte payload from a bulk or simple string.
    pub fn as_bytes(&self) -> Option<Bytes> {
        match self {
            RespValue::BulkString(b) => Some(b.clone()),
            RespValue::SimpleString(s) => Some(Bytes::from(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "\"{}\"", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    write!(f, "\"{}\"", s)
                } else {
                    write!(f, "(binary data, {} bytes)", data.len())
                }
            }
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(values) => {
                if values.is_empty() {
                    write!(f, "(empty array)")
                } else {
                    writeln!(f)?;
                    for (i, v) in values.iter().enumerate() {
                        writeln!(f, "{}) {}", i + 1, v)?;
                    }
                    Ok(())
                }
            }
        }
    }
}
