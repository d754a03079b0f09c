//! Binary Entity Codec
//!
//! Bins and requests are stored in the medium as a single byte of format
//! version followed by the bincode encoding of the entity:
//!
//! ```text
//! ┌─────────┬──────────────────────────────┐
//! │ version │ bincode(entity)              │
//! │  1 byte │ variable                     │
//! └─────────┴──────────────────────────────┘
//! ```
//!
//! The layout is opaque to callers and only shared between this module and
//! the network-backed engine.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Current payload format version.
pub const FORMAT_VERSION: u8 = 1;

/// Errors raised while encoding or decoding a payload.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload has no version byte
    #[error("empty payload")]
    Empty,

    /// The payload was written by an unknown format version
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),

    /// bincode failed
    #[error("{0}")]
    Bincode(#[from] bincode::Error),
}

/// Encodes `value` into a versioned payload.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let size = bincode::serialized_size(value)? as usize;
    let mut buf = Vec::with_capacity(1 + size);
    buf.push(FORMAT_VERSION);
    bincode::serialize_into(&mut buf, value)?;
    Ok(buf)
}

/// Decodes a versioned payload produced by [`encode`].
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    let (&version, body) = data.split_first().ok_or(CodecError::Empty)?;
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    Ok(bincode::deserialize(body)?)
}
