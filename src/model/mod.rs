//! Bins and Requests
//!
//! The two entities the storage engines persist:
//!
//! - [`Bin`]: a named, time-bounded collection of captured requests
//! - [`Request`]: one captured inbound request, normalized into a record
//!
//! Both are built through factories that take their random generator as a
//! constructor argument, so tests can seed them and get stable names and ids.

pub mod bin;
pub mod random;
pub mod request;

pub use bin::{Bin, BinFactory, BIN_NAME_LENGTH, SECRET_KEY_LENGTH};
pub use random::{random_color, random_string, solid_gif_data_uri, ALPHABET};
pub use request::{
    BodyLimit, MultiMap, RawRequest, Request, RequestFactory, FORWARDED_FOR_HEADER,
    REQUEST_ID_LENGTH,
};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
