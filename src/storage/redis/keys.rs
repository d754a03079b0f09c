//! Key layout in the medium.
//!
//! ```text
//! <prefix>|bins|<name>   string  encoded Bin
//! <prefix>|rq|<name>     list    request ids, newest at the head
//! <prefix>|rhsh|<name>   hash    request id -> encoded Request
//! <prefix>|cln           set     bin names whose id list needs trimming
//! ```

pub const KEY_SEPARATOR: &str = "|";
pub const BIN_KEY: &str = "bins";
pub const REQUESTS_KEY: &str = "rq";
pub const REQUEST_HASH_KEY: &str = "rhsh";
pub const CLEANING_SET: &str = "cln";

/// Builds keys under one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn bin(&self, name: &str) -> String {
        self.join(&[BIN_KEY, name])
    }

    pub fn requests(&self, name: &str) -> String {
        self.join(&[REQUESTS_KEY, name])
    }

    pub fn request_hash(&self, name: &str) -> String {
        self.join(&[REQUEST_HASH_KEY, name])
    }

    pub fn cleaning_set(&self) -> String {
        self.join(&[CLEANING_SET])
    }

    fn join(&self, parts: &[&str]) -> String {
        let mut key = self.prefix.clone();
        for part in parts {
            key.push_str(KEY_SEPARATOR);
            key.push_str(part);
        }
        key
    }
}
