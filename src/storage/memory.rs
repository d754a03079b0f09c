//! In-Memory Storage Engine
//!
//! Bins live in a fixed set of shards, each a `RwLock<HashMap>` keyed by bin
//! name. A bin record owns its bounded request history:
//!
//! ```text
//! ┌──────────────────────── BinRecord ─────────────────────────┐
//! │ bin: Bin                                                   │
//! │ requests: VecDeque<Arc<Request>>   oldest ... newest       │
//! │ index:    HashMap<id, Arc<Request>>                        │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The history and the id index always hold the same requests. Appending a
//! request, evicting the oldest and refreshing the bin counters happen under
//! one write guard, so concurrent inserts into the same bin never observe
//! each other half-done.
//!
//! ## Expiry
//!
//! A bin expires once it has not been updated for `bin_lifetime` seconds.
//! Reads treat an expired bin as absent and remove it on the spot (lazy
//! expiry); [`Sweep::sweep`] removes the ones nobody reads.

use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::model::{unix_now, Bin, Request};
use crate::storage::{clamp_window, Storage, Sweep};
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Number of shards bins are spread across.
const NUM_SHARDS: usize = 16;

/// A bin together with its retained requests.
#[derive(Debug)]
struct BinRecord {
    bin: Bin,
    requests: VecDeque<Arc<Request>>,
    index: HashMap<String, Arc<Request>>,
}

impl BinRecord {
    fn new(mut bin: Bin) -> Self {
        bin.request_count = 0;
        Self {
            bin,
            requests: VecDeque::new(),
            index: HashMap::new(),
        }
    }

    /// Appends `request` as the newest entry.
    fn push(&mut self, request: Request) {
        let request = Arc::new(request);
        if let Some(replaced) = self.index.insert(request.id.clone(), Arc::clone(&request)) {
            // Same id captured twice: keep only the newer copy in the history.
            self.requests.retain(|r| !Arc::ptr_eq(r, &replaced));
        }
        self.requests.push_back(request);
    }

    /// Drops the oldest requests until at most `size` remain.
    fn shrink(&mut self, size: usize) -> usize {
        let mut evicted = 0;
        while self.requests.len() > size {
            if let Some(oldest) = self.requests.pop_front() {
                self.index.remove(&oldest.id);
                evicted += 1;
            }
        }
        evicted
    }

    /// Requests in `[from, to)` counted from the newest.
    fn newest_first(&self, from: i64, to: i64) -> Vec<Request> {
        let window = clamp_window(from, to, self.requests.len());
        self.requests
            .iter()
            .rev()
            .skip(window.start)
            .take(window.len())
            .map(|r| Request::clone(r))
            .collect()
    }
}

type Shard = RwLock<HashMap<String, BinRecord>>;

/// Counters describing engine activity since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Bins currently stored, expired ones included until removed
    pub bins: u64,
    /// Requests accepted by `create_request`
    pub requests_stored: u64,
    /// Requests dropped to honor the retention limit
    pub requests_evicted: u64,
    /// Bins removed because they expired
    pub bins_expired: u64,
}

/// Process-local storage engine.
///
/// # Example
///
/// ```
/// use skimmer::config::StorageConfig;
/// use skimmer::model::BinFactory;
/// use skimmer::storage::{MemoryStorage, Storage};
///
/// let storage = MemoryStorage::new(StorageConfig::default()).unwrap();
/// let bin = BinFactory::from_entropy().create();
///
/// storage.create_bin(&bin).unwrap();
/// assert_eq!(storage.lookup_bin(&bin.name).unwrap(), bin);
/// ```
pub struct MemoryStorage {
    config: StorageConfig,
    shards: Vec<Shard>,
    bin_count: AtomicU64,
    stored_count: AtomicU64,
    evicted_count: AtomicU64,
    expired_count: AtomicU64,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("max_requests", &self.config.max_requests)
            .field("bin_lifetime", &self.config.bin_lifetime)
            .field("bins", &self.bin_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl MemoryStorage {
    /// Creates an empty engine.
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        config.validate()?;

        debug!(
            max_requests = config.max_requests,
            bin_lifetime = config.bin_lifetime,
            "Memory storage created"
        );

        Ok(Self {
            config,
            shards: (0..NUM_SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
            bin_count: AtomicU64::new(0),
            stored_count: AtomicU64::new(0),
            evicted_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    #[inline]
    fn shard(&self, name: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    #[inline]
    fn is_expired(&self, bin: &Bin, now: i64) -> bool {
        bin.is_expired(self.config.bin_lifetime, now)
    }

    /// Runs `f` on the live record for `name`.
    ///
    /// An expired record is removed and reported as absent.
    fn read_record<T>(&self, name: &str, f: impl FnOnce(&BinRecord) -> T) -> StorageResult<T> {
        let shard = self.shard(name);
        let now = unix_now();

        // Fast path under the read lock
        {
            let bins = shard.read();
            match bins.get(name) {
                Some(record) if !self.is_expired(&record.bin, now) => return Ok(f(record)),
                Some(_) => {}
                None => return Err(StorageError::BinNotFound(name.to_string())),
            }
        }

        let mut bins = shard.write();
        match bins.get(name) {
            Some(record) if self.is_expired(&record.bin, now) => {
                bins.remove(name);
                self.bin_count.fetch_sub(1, Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                trace!(bin = %name, "Expired bin removed on access");
                Err(StorageError::BinNotFound(name.to_string()))
            }
            // Refreshed by another thread in between
            Some(record) => Ok(f(record)),
            None => Err(StorageError::BinNotFound(name.to_string())),
        }
    }

    /// Number of bins currently held, expired ones included until removed.
    pub fn len(&self) -> usize {
        self.bin_count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            bins: self.bin_count.load(Ordering::Relaxed),
            requests_stored: self.stored_count.load(Ordering::Relaxed),
            requests_evicted: self.evicted_count.load(Ordering::Relaxed),
            bins_expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

impl Storage for MemoryStorage {
    fn create_bin(&self, bin: &Bin) -> StorageResult<()> {
        let mut bins = self.shard(&bin.name).write();
        if bins
            .insert(bin.name.clone(), BinRecord::new(bin.clone()))
            .is_none()
        {
            self.bin_count.fetch_add(1, Ordering::Relaxed);
        }
        trace!(bin = %bin.name, "Bin created");
        Ok(())
    }

    fn update_bin(&self, bin: &Bin) -> StorageResult<()> {
        let mut bins = self.shard(&bin.name).write();
        match bins.get_mut(&bin.name) {
            Some(record) => {
                record.bin = bin.clone();
                record.bin.request_count = record.requests.len();
            }
            None => {
                bins.insert(bin.name.clone(), BinRecord::new(bin.clone()));
                self.bin_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn lookup_bin(&self, name: &str) -> StorageResult<Bin> {
        self.read_record(name, |record| record.bin.clone())
    }

    fn lookup_bins(&self, names: &[String]) -> StorageResult<Vec<Bin>> {
        let now = unix_now();
        let found = names
            .iter()
            .filter_map(|name| {
                let bins = self.shard(name).read();
                bins.get(name)
                    .filter(|record| !self.is_expired(&record.bin, now))
                    .map(|record| record.bin.clone())
            })
            .collect();
        Ok(found)
    }

    fn create_request(&self, bin: &mut Bin, request: Request) -> StorageResult<()> {
        let now = unix_now();
        let mut bins = self.shard(&bin.name).write();

        let record = match bins.get_mut(&bin.name) {
            Some(record) if !self.is_expired(&record.bin, now) => record,
            Some(_) => {
                bins.remove(&bin.name);
                self.bin_count.fetch_sub(1, Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                return Err(StorageError::BinNotFound(bin.name.clone()));
            }
            None => return Err(StorageError::BinNotFound(bin.name.clone())),
        };

        record.push(request);
        let evicted = record.shrink(self.config.max_requests);
        record.bin.request_count = record.requests.len();
        record.bin.updated = now;
        *bin = record.bin.clone();

        self.stored_count.fetch_add(1, Ordering::Relaxed);
        if evicted > 0 {
            self.evicted_count
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        trace!(bin = %bin.name, count = bin.request_count, evicted, "Request stored");

        Ok(())
    }

    fn lookup_request(&self, bin_name: &str, id: &str) -> StorageResult<Request> {
        self.read_record(bin_name, |record| record.index.get(id).map(|r| Request::clone(r)))?
            .ok_or_else(|| StorageError::request_not_found(bin_name, id))
    }

    fn lookup_requests(&self, bin_name: &str, from: i64, to: i64) -> StorageResult<Vec<Request>> {
        self.read_record(bin_name, |record| record.newest_first(from, to))
    }
}

impl Sweep for MemoryStorage {
    /// Removes every expired bin with its history.
    fn sweep(&self) -> StorageResult<usize> {
        if self.config.bin_lifetime <= 0 {
            return Ok(0);
        }

        let now = unix_now();
        let mut removed = 0;

        for shard in &self.shards {
            let mut bins = shard.write();
            let before = bins.len();
            bins.retain(|_, record| !self.is_expired(&record.bin, now));
            removed += before - bins.len();
        }

        if removed > 0 {
            self.bin_count.fetch_sub(removed as u64, Ordering::Relaxed);
            self.expired_count
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, remaining = self.len(), "Expired bins removed");
        }

        Ok(removed)
    }
}
