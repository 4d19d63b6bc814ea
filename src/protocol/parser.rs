//! Incremental RESP Decoder
//!
//! TCP is a byte stream: a request may arrive in fragments, or several
//! pipelined requests may arrive in one read. The decoder therefore reports
//! three outcomes:
//!
//! - `Ok(Some((frame, consumed)))` — one complete frame was decoded and
//!   exactly `consumed` bytes belong to it; trailing bytes are untouched.
//! - `Ok(None)` — the buffer does not yet hold a complete frame; the caller
//!   keeps the bytes and retries after the next read.
//! - `Err(ParseError)` — the bytes are malformed; the connection owner
//!   decides what to do (for a client request this closes the connection
//!   after a best-effort error reply).
//!
//! `consumed` is exact by construction, which is what makes pipelining
//! work: the connection loop repeatedly decodes from the front of its
//! buffer and advances by `consumed` until the decoder reports `None`.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use std::num::ParseIntError;
use thiserror::Error;

/// Ways a byte sequence can fail to be a frame.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// First byte is not one of `+ - : $ *`.
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// An integer field contained non-digit bytes.
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string or error line.
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Declared bulk length is negative and not the `-1` null sentinel.
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Declared array length is negative. Null arrays are not part of the
    /// request protocol.
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Structural violation, e.g. a bulk body not followed by CRLF.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Declared bulk length exceeds the hard cap.
    #[error("bulk string too large: {size} bytes (max: {max})")]
    BulkTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Hard cap on a single bulk string body (512 MiB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth, so a hostile frame cannot blow the stack.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Stateless-between-frames incremental decoder.
///
/// # Example
///
/// ```
/// use emberkv::protocol::RespParser;
///
/// let mut parser = RespParser::new();
/// let buf = b"*1\r\n$4\r\nPING\r\n";
/// let (_frame, consumed) = parser.parse(buf).unwrap().unwrap();
/// assert_eq!(consumed, buf.len());
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to decode one frame from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match buf[0] {
            prefix::SIMPLE_STRING => self.parse_simple_string(buf),
            prefix::ERROR => self.parse_error(buf),
            prefix::INTEGER => self.parse_integer(buf),
            prefix::BULK_STRING => self.parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// `+<string>\r\n`
    fn parse_simple_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        match find_crlf(&buf[1..]) {
            Some(pos) => {
                let content = &buf[1..1 + pos];
                let s = std::str::from_utf8(content)
                    .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

                // +1 prefix, +2 CRLF
                Ok(Some((RespValue::SimpleString(s.to_string()), 1 + pos + 2)))
            }
            None => Ok(None),
        }
    }

    /// `-<message>\r\n`
    fn parse_error(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        match find_crlf(&buf[1..]) {
            Some(pos) => {
                let content = &buf[1..1 + pos];
                let s = std::str::from_utf8(content)
                    .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

                Ok(Some((RespValue::Error(s.to_string()), 1 + pos + 2)))
            }
            None => Ok(None),
        }
    }

    /// `:<signed integer>\r\n`
    fn parse_integer(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        match find_crlf(&buf[1..]) {
            Some(pos) => {
                let content = &buf[1..1 + pos];
                let s = std::str::from_utf8(content)
                    .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

                let n: i64 = s
                    .parse()
                    .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))?;
                Ok(Some((RespValue::Integer(n), 1 + pos + 2)))
            }
            None => Ok(None),
        }
    }

    /// `$<length>\r\n<body>\r\n`, or `$-1\r\n` for the null bulk.
    fn parse_bulk_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let length_end = match find_crlf(&buf[1..]) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let length_str = std::str::from_utf8(&buf[1..1 + length_end])
            .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

        let length: i64 = length_str
            .parse()
            .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))?;

        if length == -1 {
            // Null bulk omits the body and trailing CRLF entirely.
            return Ok(Some((RespValue::Null, 1 + length_end + 2)));
        }

        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }

        let length = length as usize;

        if length > MAX_BULK_SIZE {
            return Err(ParseError::BulkTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        let body_start = 1 + length_end + 2;
        let total_needed = body_start + length + 2;
        if buf.len() < total_needed {
            return Ok(None);
        }

        if &buf[body_start + length..body_start + length + 2] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[body_start..body_start + length]);

        Ok(Some((RespValue::BulkString(data), total_needed)))
    }

    /// `*<count>\r\n` followed by `count` frames.
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let count_end = match find_crlf(&buf[1..]) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let count_str = std::str::from_utf8(&buf[1..1 + count_end])
            .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

        let count: i64 = count_str
            .parse()
            .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))?;

        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let count = count as usize;

        let mut elements = Vec::with_capacity(count.min(64));
        let mut consumed = 1 + count_end + 2;

        self.depth += 1;

        for _ in 0..count {
            if consumed >= buf.len() {
                return Ok(None);
            }

            match self.parse_value(&buf[consumed..])? {
                Some((value, element_consumed)) => {
                    elements.push(value);
                    consumed += element_consumed;
                }
                None => return Ok(None),
            }
        }

        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// Position of the first CRLF pair, or None.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    for i in 0..buf.len().saturating_sub(1) {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some(i);
        }
    }
    None
}

/// One-shot decode for callers without a long-lived parser.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}
