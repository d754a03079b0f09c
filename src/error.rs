//! Storage Errors
//!
//! Every storage operation returns [`StorageResult`]. Errors fall into two
//! kinds:
//!
//! - **Not found**: the bin or request is absent or expired. This is a normal
//!   negative answer and callers are expected to handle it.
//! - **Storage**: the medium failed, a reply could not be understood, or a
//!   payload could not be encoded/decoded. Nothing is retried inside the
//!   engine; a failed multi-command write may have partially succeeded.

use crate::codec::CodecError;
use crate::protocol::ParseError;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Coarse classification of a [`StorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bin or request does not exist (or has expired)
    NotFound,
    /// The medium or the codec failed
    Storage,
}

/// Errors produced by the storage engines.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No bin with this name is stored
    #[error("bin '{0}' not found")]
    BinNotFound(String),

    /// No request with this id is retained in the bin
    #[error("request '{id}' not found in bin '{bin}'")]
    RequestNotFound { bin: String, id: String },

    /// Socket-level failure talking to the medium
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The medium sent bytes that are not valid RESP
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// The medium answered with an error reply
    #[error("medium error: {0}")]
    Medium(String),

    /// The medium answered with a reply of an unexpected shape
    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },

    /// The medium closed the connection mid-reply
    #[error("connection closed by medium")]
    ConnectionClosed,

    /// No pooled connection became available in time
    #[error("connection pool exhausted after {0:?}")]
    PoolExhausted(std::time::Duration),

    /// A dial attempt did not complete in time
    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    /// An entity could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] CodecError),

    /// The engine was configured with unusable values
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StorageError {
    /// Returns the coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::BinNotFound(_) | StorageError::RequestNotFound { .. } => {
                ErrorKind::NotFound
            }
            _ => ErrorKind::Storage,
        }
    }

    /// Returns true if this error is a normal "absent or expired" answer.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub(crate) fn request_not_found(bin: &str, id: &str) -> Self {
        StorageError::RequestNotFound {
            bin: bin.to_string(),
            id: id.to_string(),
        }
    }
}
