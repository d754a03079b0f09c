//! RESP Values and Commands
//!
//! The storage engine talks to the medium in RESP (the Redis serialization
//! protocol). Requests go out as arrays of bulk strings built with
//! [`Command`]; replies come back as [`RespValue`]s.
//!
//! ## Wire Format
//!
//! Each RESP type starts with a type prefix byte:
//! - `+` Simple String
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String (`$-1` is null)
//! - `*` Array (`*-1` is null)
//!
//! All lines are terminated with CRLF (`\r\n`).

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A value in the RESP protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+<string>\r\n`
    SimpleString(String),

    /// `-<message>\r\n`
    Error(String),

    /// `:<integer>\r\n`
    Integer(i64),

    /// `$<length>\r\n<data>\r\n`
    BulkString(Bytes),

    /// Null bulk string or null array
    Null,

    /// `*<count>\r\n<element>...`
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// Writes the wire representation of this value into `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => put_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => put_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => put_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => put_bulk(buf, data),
            RespValue::Null => put_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                put_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.encode_into(buf);
                }
            }
        }
    }

    /// Returns the wire representation of this value.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Returns true if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    /// Returns true if this value is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Attempts to extract the inner integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Consumes self and returns the payload of a bulk or simple string.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            RespValue::BulkString(b) => Some(b),
            RespValue::SimpleString(s) => Some(Bytes::from(s)),
            _ => None,
        }
    }

    /// Consumes self and returns the inner array if this is an Array variant.
    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(arr) => Some(arr),
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
            RespValue::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(values) => write!(f, "(array of {})", values.len()),
        }
    }
}

/// A command sent to the medium: a name followed by binary-safe arguments.
///
/// # Example
///
/// ```
/// use skimmer::protocol::Command;
///
/// let cmd = Command::new("LRANGE").arg("skimmer|rq|abc123").arg_int(0).arg_int(-1);
/// assert_eq!(cmd.name(), "LRANGE");
/// assert_eq!(
///     &cmd.encode()[..],
///     &b"*4\r\n$6\r\nLRANGE\r\n$17\r\nskimmer|rq|abc123\r\n$1\r\n0\r\n$2\r\n-1\r\n"[..]
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: &'static str,
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    /// Appends an integer argument in its decimal form.
    pub fn arg_int(self, n: i64) -> Self {
        self.arg(n.to_string())
    }

    /// Appends every item of `args`.
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        self.args
            .extend(args.into_iter().map(|a| Bytes::copy_from_slice(a.as_ref())));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of arguments after the command name.
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Writes the command as a RESP array of bulk strings.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        put_line(buf, prefix::ARRAY, (self.args.len() + 1).to_string().as_bytes());
        put_bulk(buf, self.name.as_bytes());
        for arg in &self.args {
            put_bulk(buf, arg);
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }
}

fn put_line(buf: &mut BytesMut, type_prefix: u8, content: &[u8]) {
    buf.reserve(content.len() + 3);
    buf.put_u8(type_prefix);
    buf.put_slice(content);
    buf.put_slice(CRLF);
}

fn put_bulk(buf: &mut BytesMut, data: &[u8]) {
    put_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
    buf.reserve(data.len() + 2);
    buf.put_slice(data);
    buf.put_slice(CRLF);
}
