//! Interpreting replies from the medium.
//!
//! Error replies become [`StorageError::Medium`]; any other shape than the
//! one a command documents becomes [`StorageError::UnexpectedReply`].

use crate::error::{StorageError, StorageResult};
use crate::protocol::{Command, RespValue};
use bytes::Bytes;

/// Passes `reply` through unless it is an error reply.
pub(crate) fn checked(command: &str, reply: RespValue) -> StorageResult<RespValue> {
    match reply {
        RespValue::Error(message) => Err(StorageError::Medium(format!("{}: {}", command, message))),
        other => Ok(other),
    }
}

/// Checks every reply of a pipeline against the command that produced it.
pub(crate) fn checked_all(
    commands: &[Command],
    replies: Vec<RespValue>,
) -> StorageResult<Vec<RespValue>> {
    commands
        .iter()
        .zip(replies)
        .map(|(command, reply)| checked(command.name(), reply))
        .collect()
}

/// Splits pipeline replies into a fixed number of values.
pub(crate) fn expect_replies<const N: usize>(
    replies: Vec<RespValue>,
) -> StorageResult<[RespValue; N]> {
    replies
        .try_into()
        .map_err(|replies: Vec<RespValue>| StorageError::UnexpectedReply {
            command: "pipeline".to_string(),
            reply: format!("{} replies, expected {}", replies.len(), N),
        })
}

pub(crate) fn integer(command: &str, reply: RespValue) -> StorageResult<i64> {
    match checked(command, reply)? {
        RespValue::Integer(n) => Ok(n),
        other => Err(unexpected(command, &other)),
    }
}

/// An integer, or `None` for a nil reply.
pub(crate) fn optional_integer(command: &str, reply: RespValue) -> StorageResult<Option<i64>> {
    match checked(command, reply)? {
        RespValue::Integer(n) => Ok(Some(n)),
        RespValue::Null => Ok(None),
        other => Err(unexpected(command, &other)),
    }
}

/// A bulk string, or `None` for a nil reply.
pub(crate) fn bulk(command: &str, reply: RespValue) -> StorageResult<Option<Bytes>> {
    match checked(command, reply)? {
        RespValue::BulkString(data) => Ok(Some(data)),
        RespValue::Null => Ok(None),
        other => Err(unexpected(command, &other)),
    }
}

/// An array reply; a nil array reads as empty.
pub(crate) fn array(command: &str, reply: RespValue) -> StorageResult<Vec<RespValue>> {
    match checked(command, reply)? {
        RespValue::Array(values) => Ok(values),
        RespValue::Null => Ok(Vec::new()),
        other => Err(unexpected(command, &other)),
    }
}

/// A `+OK`-style status reply.
pub(crate) fn status(command: &str, reply: RespValue) -> StorageResult<()> {
    match checked(command, reply)? {
        RespValue::SimpleString(_) => Ok(()),
        other => Err(unexpected(command, &other)),
    }
}

fn unexpected(command: &str, reply: &RespValue) -> StorageError {
    StorageError::UnexpectedReply {
        command: command.to_string(),
        reply: reply.to_string(),
    }
}
