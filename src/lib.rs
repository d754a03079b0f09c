//! # Skimmer - Request Bin Storage
//!
//! Skimmer keeps captured HTTP requests in named, short-lived collections
//! called bins. Each bin retains its most recent requests only, and bins that
//! go unused expire on their own.
//!
//! ## Features
//!
//! - **One contract, two engines**: [`Storage`] is implemented in memory and
//!   on top of a Redis-compatible medium
//! - **Bounded history**: at most `max_requests` requests per bin, oldest
//!   evicted first, read back newest first
//! - **Expiry**: bins expire `bin_lifetime` seconds after their last update
//! - **Background reaper**: a [`Reaper`] thread sweeps what reads don't
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             Skimmer                              │
//! │                                                                  │
//! │  ┌──────────────┐                                                │
//! │  │ BinFactory   │──┐                                             │
//! │  │ RequestFact. │  │   ┌───────────────── Storage ─────────────┐ │
//! │  └──────────────┘  └──>│ MemoryStorage    │ RedisStorage       │ │
//! │                        │  sharded RwLock  │  pool ─> RESP ─────┼─┼──> medium
//! │                        │  lazy expiry     │  codec (bincode)   │ │
//! │                        └──────────────────┴────────────────────┘ │
//! │                                      ▲                           │
//! │                                      │ Sweep                     │
//! │                        ┌─────────────┴─────────────┐             │
//! │                        │   Reaper (named thread)   │             │
//! │                        └───────────────────────────┘             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use skimmer::config::{Backend, StorageConfig};
//! use skimmer::model::{BinFactory, BodyLimit, RawRequest, RequestFactory};
//! use skimmer::storage::{open, Reaper, Storage};
//! use std::sync::Arc;
//!
//! let config = StorageConfig::default();
//! let engine = open(Backend::Memory, &config).unwrap();
//! let reaper = Reaper::start(Arc::clone(&engine), &config.reaper).unwrap();
//!
//! let mut bin = BinFactory::from_entropy().create();
//! engine.create_bin(&bin).unwrap();
//!
//! let mut capture = RequestFactory::from_entropy(BodyLimit::default());
//! for method in ["GET", "POST"] {
//!     let request = capture.capture(RawRequest {
//!         method: method.into(),
//!         ..Default::default()
//!     });
//!     engine.create_request(&mut bin, request).unwrap();
//! }
//!
//! let newest = engine.lookup_requests(&bin.name, 0, 10).unwrap();
//! assert_eq!(newest[0].method, "POST");
//!
//! reaper.join();
//! ```
//!
//! ## Module Overview
//!
//! - [`model`]: bins, requests and their factories
//! - [`codec`]: binary payload format used by the network-backed engine
//! - [`protocol`]: RESP commands and reply parser
//! - [`storage`]: the contract, both engines and the reaper
//! - [`config`]: engine settings and validation
//! - [`error`]: the error type shared by every operation

pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{Backend, ReaperConfig, RedisConfig, StorageConfig};
pub use error::{ErrorKind, StorageError, StorageResult};
pub use model::{Bin, BinFactory, BodyLimit, RawRequest, Request, RequestFactory};
pub use storage::{open, Engine, MemoryStorage, Reaper, RedisStorage, Storage, Store, Sweep};

/// Version of Skimmer
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
