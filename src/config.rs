//! Engine Configuration
//!
//! Plain structs with defaults. Values are checked once, when an engine is
//! built; an engine never sees an invalid configuration.

use crate::error::{StorageError, StorageResult};
use std::time::Duration;

/// Default number of requests retained per bin.
pub const DEFAULT_MAX_REQUESTS: usize = 20;

/// Default bin lifetime: two days.
pub const DEFAULT_BIN_LIFETIME: i64 = 2 * 24 * 60 * 60;

/// Default pause between two reaper sweeps.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// Default trimming threshold multiplier for the network-backed engine.
pub const DEFAULT_OVERFLOW_FACTOR: usize = 3;

/// Configuration for the background reaper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaperConfig {
    /// Pause between the end of one sweep and the start of the next
    pub interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REAPER_INTERVAL,
        }
    }
}

/// Retention settings shared by both engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Maximum number of requests retained per bin
    pub max_requests: usize,

    /// Seconds a bin survives without updates. Non-positive disables
    /// expiry in memory and is handed to the medium as-is otherwise.
    pub bin_lifetime: i64,

    pub reaper: ReaperConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            bin_lifetime: DEFAULT_BIN_LIFETIME,
            reaper: ReaperConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Checks that the retention settings are usable.
    pub fn validate(&self) -> StorageResult<()> {
        if self.max_requests == 0 {
            return Err(StorageError::InvalidConfig(
                "max_requests must be positive".to_string(),
            ));
        }
        if self.reaper.interval.is_zero() {
            return Err(StorageError::InvalidConfig(
                "reaper interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection settings for the network-backed engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// `host:port` of the medium
    pub address: String,

    /// Sent with `AUTH` on every new connection when set
    pub password: Option<String>,

    /// First segment of every key
    pub prefix: String,

    /// Maximum number of connections open at once
    pub pool_size: usize,

    pub connect_timeout: Duration,

    /// How long an operation waits for a free connection
    pub acquire_timeout: Duration,

    /// Unused connections older than this are closed instead of reused;
    /// younger ones are checked with `PING` before reuse
    pub idle_timeout: Duration,

    /// A bin is queued for trimming once its id list is longer than
    /// `max_requests * overflow_factor`
    pub overflow_factor: usize,

    /// Worker threads of the runtime driving socket I/O
    pub runtime_threads: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6379".to_string(),
            password: None,
            prefix: "skimmer".to_string(),
            pool_size: 16,
            connect_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(240),
            overflow_factor: DEFAULT_OVERFLOW_FACTOR,
            runtime_threads: 2,
        }
    }
}

impl RedisConfig {
    /// Creates a configuration for `address` with default settings.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> StorageResult<()> {
        let invalid = |msg: &str| Err(StorageError::InvalidConfig(msg.to_string()));

        if self.address.is_empty() {
            return invalid("address must not be empty");
        }
        if self.prefix.is_empty() {
            return invalid("key prefix must not be empty");
        }
        if self.pool_size == 0 {
            return invalid("pool_size must be positive");
        }
        if self.overflow_factor == 0 {
            return invalid("overflow_factor must be positive");
        }
        if self.runtime_threads == 0 {
            return invalid("runtime_threads must be positive");
        }
        Ok(())
    }
}

/// Which engine to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Redis(RedisConfig),
}
