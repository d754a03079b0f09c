//! Storage Module
//!
//! Bins and their captured requests live behind the [`Storage`] contract.
//! Two engines implement it:
//!
//! - [`MemoryStorage`]: process-local, sharded maps with lazy expiry
//! - [`RedisStorage`]: a Redis-compatible medium reached over a pooled
//!   RESP connection
//!
//! Both are driven by a background [`Reaper`] that calls [`Sweep::sweep`]
//! on a fixed interval.
//!
//! ```text
//! ┌──────────────┐   Storage    ┌──────────────────────────────┐
//! │   callers    │ ───────────▶ │ MemoryStorage | RedisStorage │
//! └──────────────┘              └──────────────────────────────┘
//!                                              ▲
//!                                              │ Sweep
//!                                     ┌────────┴────────┐
//!                                     │     Reaper      │
//!                                     │ (named thread)  │
//!                                     └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use skimmer::config::{Backend, StorageConfig};
//! use skimmer::model::{BinFactory, BodyLimit, RawRequest, RequestFactory};
//! use skimmer::storage::{open, Storage};
//!
//! let engine = open(Backend::Memory, &StorageConfig::default()).unwrap();
//!
//! let mut bin = BinFactory::from_entropy().create();
//! engine.create_bin(&bin).unwrap();
//!
//! let mut requests = RequestFactory::from_entropy(BodyLimit::default());
//! let request = requests.capture(RawRequest {
//!     method: "POST".into(),
//!     ..Default::default()
//! });
//! let id = request.id.clone();
//!
//! engine.create_request(&mut bin, request).unwrap();
//! assert_eq!(bin.request_count, 1);
//! assert_eq!(engine.lookup_request(&bin.name, &id).unwrap().method, "POST");
//! ```

pub mod memory;
pub mod reaper;
pub mod redis;

pub use memory::{MemoryStats, MemoryStorage};
pub use reaper::{Reaper, Sweep};
pub use redis::RedisStorage;

use crate::config::{Backend, StorageConfig};
use crate::error::StorageResult;
use crate::model::{Bin, Request};
use std::ops::Range;
use std::sync::Arc;

/// The storage contract shared by every engine.
///
/// Operations are synchronous and may be called from many threads at once.
/// An absent or expired bin is reported as
/// [`StorageError::BinNotFound`](crate::error::StorageError::BinNotFound),
/// an absent request as
/// [`StorageError::RequestNotFound`](crate::error::StorageError::RequestNotFound).
pub trait Storage: Send + Sync {
    /// Stores `bin` under its name, replacing any bin of the same name
    /// together with its request history.
    fn create_bin(&self, bin: &Bin) -> StorageResult<()>;

    /// Stores new bin fields and refreshes its lifetime. A missing bin is
    /// created.
    fn update_bin(&self, bin: &Bin) -> StorageResult<()>;

    fn lookup_bin(&self, name: &str) -> StorageResult<Bin>;

    /// Returns the bins that exist among `names`, in the order asked for.
    /// Missing names are skipped.
    fn lookup_bins(&self, names: &[String]) -> StorageResult<Vec<Bin>>;

    /// Appends `request` to the bin named `bin.name`, evicting the oldest
    /// request beyond the retention limit.
    ///
    /// On success `bin` is overwritten with the stored bin: its
    /// `request_count` is the number of retained requests and `updated`
    /// is the insertion time.
    fn create_request(&self, bin: &mut Bin, request: Request) -> StorageResult<()>;

    fn lookup_request(&self, bin_name: &str, id: &str) -> StorageResult<Request>;

    /// Returns a window of a bin's requests, newest first.
    ///
    /// `from` and `to` are clamped into `[0, retained]`; an empty window
    /// yields an empty list.
    fn lookup_requests(&self, bin_name: &str, from: i64, to: i64) -> StorageResult<Vec<Request>>;
}

/// An engine that can both serve the contract and be reaped.
pub trait Store: Storage + Sweep {}

impl<T: Storage + Sweep + ?Sized> Store for T {}

/// A shared, type-erased engine.
pub type Engine = Arc<dyn Store>;

/// Builds the engine selected by `backend`.
pub fn open(backend: Backend, config: &StorageConfig) -> StorageResult<Engine> {
    match backend {
        Backend::Memory => Ok(Arc::new(MemoryStorage::new(config.clone())?)),
        Backend::Redis(redis) => Ok(Arc::new(RedisStorage::new(redis, config.clone())?)),
    }
}

/// Clamps a requested `[from, to)` window into `[0, len]`.
///
/// A window whose start is at or past its end comes back empty.
pub(crate) fn clamp_window(from: i64, to: i64, len: usize) -> Range<usize> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let to = to.clamp(0, len);
    let from = from.clamp(0, to);
    from as usize..to as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_window() {
        assert_eq!(clamp_window(0, 20, 3), 0..3);
        assert_eq!(clamp_window(1, 2, 3), 1..2);
        assert_eq!(clamp_window(-5, 2, 3), 0..2);
        assert_eq!(clamp_window(0, -1, 3), 0..0);
        assert_eq!(clamp_window(2, 1, 3), 1..1);
        assert_eq!(clamp_window(5, 10, 3), 3..3);
        assert!(clamp_window(0, 10, 0).is_empty());
    }

    #[test]
    fn test_open_memory() {
        let engine = open(Backend::Memory, &StorageConfig::default()).unwrap();
        assert!(engine.lookup_bin("nothing").unwrap_err().is_not_found());
        assert_eq!(engine.sweep().unwrap(), 0);
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let config = StorageConfig {
            max_requests: 0,
            ..Default::default()
        };
        assert!(open(Backend::Memory, &config).is_err());
    }
}
