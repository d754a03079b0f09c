//! Incremental RESP Reply Parser
//!
//! Replies from the medium arrive on a byte stream and may be split across
//! reads or packed several to a read (pipelining). The parser therefore works
//! against an accumulating buffer and reports one of:
//!
//! - `Ok(Some((value, consumed)))` - a complete value; drop `consumed` bytes
//! - `Ok(None)` - the value is incomplete; read more and try again
//! - `Err(ParseError)` - the bytes are not valid RESP; the connection is unusable

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer or length line
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Negative length other than the null marker
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    /// Protocol violation (missing CRLF, too deep, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The value exceeds the maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth
pub const MAX_NESTING_DEPTH: usize = 32;

/// Parses RESP replies out of a byte buffer.
///
/// # Example
///
/// ```
/// use skimmer::protocol::{RespParser, RespValue};
/// use bytes::BytesMut;
///
/// let mut parser = RespParser::new();
/// let mut buffer = BytesMut::from(&b":3\r\n+OK\r\n$-1"[..]);
///
/// assert_eq!(parser.parse_buf(&mut buffer).unwrap(), Some(RespValue::Integer(3)));
/// assert_eq!(
///     parser.parse_buf(&mut buffer).unwrap(),
///     Some(RespValue::SimpleString("OK".into()))
/// );
/// // The null bulk string is missing its CRLF so far.
/// assert_eq!(parser.parse_buf(&mut buffer).unwrap(), None);
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse one value from the front of `buf` without consuming it.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    /// Parses one value from the front of `buf` and advances past it.
    ///
    /// Leaves `buf` untouched when the value is incomplete.
    pub fn parse_buf(&mut self, buf: &mut BytesMut) -> ParseResult<Option<RespValue>> {
        match self.parse(buf)? {
            Some((value, consumed)) => {
                buf.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(&type_prefix) = buf.first() else {
            return Ok(None);
        };

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        let Some((line, header_len)) = read_line(buf) else {
            return Ok(None);
        };

        match type_prefix {
            prefix::SIMPLE_STRING => {
                Ok(Some((RespValue::SimpleString(utf8(line)?), header_len)))
            }
            prefix::ERROR => Ok(Some((RespValue::Error(utf8(line)?), header_len))),
            prefix::INTEGER => Ok(Some((RespValue::Integer(integer(line)?), header_len))),
            prefix::BULK_STRING => parse_bulk_body(buf, integer(line)?, header_len),
            prefix::ARRAY => self.parse_array_body(buf, integer(line)?, header_len),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    fn parse_array_body(
        &mut self,
        buf: &[u8],
        count: i64,
        header_len: usize,
    ) -> ParseResult<Option<(RespValue, usize)>> {
        if count == -1 {
            return Ok(Some((RespValue::Null, header_len)));
        }
        if count < 0 {
            return Err(ParseError::InvalidLength(count));
        }

        let count = count as usize;
        // Cap the pre-allocation; a hostile count should not reserve memory.
        let mut elements = Vec::with_capacity(count.min(1024));
        let mut consumed = header_len;

        self.depth += 1;
        for _ in 0..count {
            match self.parse_value(&buf[consumed..])? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }
        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

fn parse_bulk_body(
    buf: &[u8],
    length: i64,
    header_len: usize,
) -> ParseResult<Option<(RespValue, usize)>> {
    if length == -1 {
        return Ok(Some((RespValue::Null, header_len)));
    }
    if length < 0 {
        return Err(ParseError::InvalidLength(length));
    }

    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let total = header_len + length + CRLF.len();
    if buf.len() < total {
        return Ok(None);
    }
    if &buf[header_len + length..total] != CRLF {
        return Err(ParseError::ProtocolError(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[header_len..header_len + length]);
    Ok(Some((RespValue::BulkString(data), total)))
}

/// Splits off the first line after the type prefix.
///
/// Returns the line content (without prefix and CRLF) and the number of
/// bytes up to and including the CRLF.
fn read_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    let body = &buf[1..];
    let pos = body.windows(2).position(|w| w == CRLF)?;
    Some((&body[..pos], 1 + pos + CRLF.len()))
}

fn utf8(line: &[u8]) -> ParseResult<String> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

fn integer(line: &[u8]) -> ParseResult<i64> {
    let s = std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    s.parse()
        .map_err(|e: std::num::ParseIntError| ParseError::InvalidInteger(e.to_string()))
}

/// Parses a single RESP value from bytes.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}
