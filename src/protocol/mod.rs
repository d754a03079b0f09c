//! RESP Protocol (client side)
//!
//! The network-backed engine speaks RESP to a Redis-compatible medium.
//!
//! ## Modules
//!
//! - `types`: [`RespValue`] replies and the [`Command`] builder
//! - `parser`: incremental parser for replies read off the socket
//!
//! ## Example
//!
//! ```
//! use skimmer::protocol::{parse_message, Command, RespValue};
//!
//! let wire = Command::new("GET").arg("skimmer|bins|abc123").encode();
//! assert!(wire.starts_with(b"*2\r\n$3\r\nGET\r\n"));
//!
//! let (reply, consumed) = parse_message(b"$-1\r\n").unwrap().unwrap();
//! assert_eq!(reply, RespValue::Null);
//! assert_eq!(consumed, 5);
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::{Command, RespValue};
