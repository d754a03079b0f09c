//! Redis-Backed Storage Engine
//!
//! Bins, request ids and request payloads are kept in a Redis-compatible
//! medium (see [`keys`] for the layout). Expiry is delegated to the medium:
//! every write refreshes the TTL of the keys it touches.
//!
//! ## Retention
//!
//! Inserting a request only pushes its id onto the bin's list. Trimming is
//! deferred: once a list grows past `max_requests * overflow_factor` the bin
//! name is added to a cleaning set, and the [`Reaper`](crate::storage::Reaper)
//! later trims every queued list back to `max_requests`. Ids pushed beyond
//! the window are treated as evicted right away: windowed reads never reach
//! them and `lookup_request` checks the id's position first.
//!
//! A request id captured twice is moved to the head of the list, so a bin
//! never lists the same request twice.
//!
//! ## Medium version
//!
//! The position check uses `LPOS ... MAXLEN`, so the medium must be Redis
//! 6.0.6 or later (or a server compatible with it).
//!
//! ## Threading
//!
//! The engine owns a small multi-threaded Tokio runtime that drives socket
//! I/O. Every operation blocks the calling thread on that runtime, so the
//! engine must not be called from inside an async task.
//!
//! Multi-command writes are pipelined, not transactional: a failure half-way
//! leaves the commands already applied in place.

pub mod connection;
pub mod keys;
pub mod pool;
mod reply;

pub use connection::Connection;
pub use keys::Keys;
pub use pool::{ConnectionPool, PooledConnection};

use crate::codec;
use crate::config::{RedisConfig, StorageConfig};
use crate::error::{StorageError, StorageResult};
use crate::model::{unix_now, Bin, Request};
use crate::protocol::{Command, RespValue};
use crate::storage::{Storage, Sweep};
use bytes::Bytes;
use std::future::Future;
use tokio::runtime::{self, Runtime};
use tracing::{debug, info, warn};

/// Storage engine backed by a Redis-compatible medium.
pub struct RedisStorage {
    config: StorageConfig,
    overflow_factor: usize,
    keys: Keys,
    pool: ConnectionPool,
    runtime: Runtime,
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("address", &self.pool.address())
            .field("prefix", &self.keys.prefix())
            .field("max_requests", &self.config.max_requests)
            .finish()
    }
}

impl RedisStorage {
    /// Creates an engine for the medium at `redis.address`.
    ///
    /// No connection is opened until the first operation.
    pub fn new(redis: RedisConfig, config: StorageConfig) -> StorageResult<Self> {
        config.validate()?;
        redis.validate()?;

        if config.bin_lifetime <= 0 {
            warn!(
                bin_lifetime = config.bin_lifetime,
                "Non-positive bin lifetime; the medium will drop bins as soon as they are written"
            );
        }

        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(redis.runtime_threads)
            .thread_name("skimmer-redis")
            .enable_all()
            .build()?;

        info!(
            address = %redis.address,
            prefix = %redis.prefix,
            pool_size = redis.pool_size,
            "Redis storage created"
        );

        Ok(Self {
            overflow_factor: redis.overflow_factor,
            keys: Keys::new(redis.prefix.as_str()),
            pool: ConnectionPool::new(&redis)?,
            config,
            runtime,
        })
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Round-trips a `PING` to check the medium is reachable.
    pub fn ping(&self) -> StorageResult<()> {
        self.block_on(async {
            let mut conn = self.pool.get().await?;
            reply::status("PING", conn.execute(Command::new("PING")).await?)
        })
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn lifetime(&self) -> i64 {
        self.config.bin_lifetime
    }

    /// `SET` and `EXPIRE` for the bin record.
    fn bin_commands(&self, bin: &Bin) -> StorageResult<[Command; 2]> {
        let key = self.keys.bin(&bin.name);
        let payload = codec::encode(bin)?;

        Ok([
            Command::new("SET").arg(&key).arg(&payload),
            Command::new("EXPIRE").arg(&key).arg_int(self.lifetime()),
        ])
    }

    async fn run(
        &self,
        conn: &mut PooledConnection,
        commands: &[Command],
    ) -> StorageResult<Vec<RespValue>> {
        let replies = conn.pipeline(commands).await?;
        reply::checked_all(commands, replies)
    }

    /// Decodes the stored record for `name`.
    async fn read_bin(&self, conn: &mut PooledConnection, name: &str) -> StorageResult<Bin> {
        let reply = conn.execute(Command::new("GET").arg(self.keys.bin(name))).await?;
        match reply::bulk("GET", reply)? {
            Some(data) => Ok(codec::decode(&data)?),
            None => Err(StorageError::BinNotFound(name.to_string())),
        }
    }

    /// Trims one bin's id list back to `max_requests` and drops the
    /// payloads of the ids cut off.
    async fn trim(&self, conn: &mut PooledConnection, name: &str) -> StorageResult<usize> {
        let list_key = self.keys.requests(name);
        let max = self.config.max_requests as i64;

        let commands = [
            Command::new("LRANGE").arg(&list_key).arg_int(max).arg_int(-1),
            Command::new("LTRIM").arg(&list_key).arg_int(0).arg_int(max - 1),
        ];
        let replies = self.run(conn, &commands).await?;
        let [excess, _] = reply::expect_replies::<2>(replies)?;

        let ids = reply::array("LRANGE", excess)?
            .into_iter()
            .filter_map(RespValue::into_bytes)
            .collect::<Vec<Bytes>>();

        if !ids.is_empty() {
            let command = Command::new("HDEL")
                .arg(self.keys.request_hash(name))
                .args(&ids);
            reply::integer("HDEL", conn.execute(command).await?)?;
        }

        Ok(ids.len())
    }
}

impl Storage for RedisStorage {
    /// Stores `bin` with an empty history, dropping any requests left under
    /// the same name.
    fn create_bin(&self, bin: &Bin) -> StorageResult<()> {
        let mut fresh = bin.clone();
        fresh.request_count = 0;
        let [set, expire] = self.bin_commands(&fresh)?;

        self.block_on(async {
            let mut conn = self.pool.get().await?;
            let commands = [
                Command::new("DEL")
                    .arg(self.keys.requests(&bin.name))
                    .arg(self.keys.request_hash(&bin.name)),
                set,
                expire,
            ];
            self.run(&mut conn, &commands).await?;
            Ok(())
        })
    }

    /// Stores `bin`, keeping its history. The stored count is derived from
    /// the retained ids, not taken from the caller.
    fn update_bin(&self, bin: &Bin) -> StorageResult<()> {
        self.block_on(async {
            let mut conn = self.pool.get().await?;

            let length = conn
                .execute(Command::new("LLEN").arg(self.keys.requests(&bin.name)))
                .await?;
            let length = usize::try_from(reply::integer("LLEN", length)?).unwrap_or(0);

            let mut stored = bin.clone();
            stored.request_count = length.min(self.config.max_requests);
            self.run(&mut conn, &self.bin_commands(&stored)?).await?;
            Ok(())
        })
    }

    fn lookup_bin(&self, name: &str) -> StorageResult<Bin> {
        self.block_on(async {
            let mut conn = self.pool.get().await?;
            self.read_bin(&mut conn, name).await
        })
    }

    fn lookup_bins(&self, names: &[String]) -> StorageResult<Vec<Bin>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        self.block_on(async {
            let mut conn = self.pool.get().await?;
            let command = Command::new("MGET").args(names.iter().map(|n| self.keys.bin(n)));
            let values = reply::array("MGET", conn.execute(command).await?)?;

            let mut bins = Vec::with_capacity(values.len());
            for (name, value) in names.iter().zip(values) {
                let Some(data) = reply::bulk("MGET", value)? else {
                    continue;
                };
                match codec::decode::<Bin>(&data) {
                    Ok(bin) => bins.push(bin),
                    Err(e) => warn!(bin = %name, error = %e, "Skipping undecodable bin"),
                }
            }
            Ok(bins)
        })
    }

    fn create_request(&self, bin: &mut Bin, request: Request) -> StorageResult<()> {
        let payload = codec::encode(&request)?;

        self.block_on(async {
            let mut conn = self.pool.get().await?;
            let mut stored = self.read_bin(&mut conn, &bin.name).await?;

            let list_key = self.keys.requests(&bin.name);
            let hash_key = self.keys.request_hash(&bin.name);
            let commands = [
                Command::new("LREM").arg(&list_key).arg_int(0).arg(&request.id),
                Command::new("LPUSH").arg(&list_key).arg(&request.id),
                Command::new("EXPIRE").arg(&list_key).arg_int(self.lifetime()),
                Command::new("HSET").arg(&hash_key).arg(&request.id).arg(&payload),
                Command::new("EXPIRE").arg(&hash_key).arg_int(self.lifetime()),
            ];
            let replies = self.run(&mut conn, &commands).await?;
            let [_, pushed, _, _, _] = reply::expect_replies::<5>(replies)?;
            let length = usize::try_from(reply::integer("LPUSH", pushed)?).unwrap_or(0);

            stored.request_count = length.min(self.config.max_requests);
            stored.updated = unix_now();

            let [set, expire] = self.bin_commands(&stored)?;
            let mut commands = vec![set, expire];
            if length > self.config.max_requests * self.overflow_factor {
                debug!(bin = %bin.name, length, "Request list queued for trimming");
                commands.push(
                    Command::new("SADD")
                        .arg(self.keys.cleaning_set())
                        .arg(&bin.name),
                );
            }
            self.run(&mut conn, &commands).await?;

            *bin = stored;
            Ok(())
        })
    }

    fn lookup_request(&self, bin_name: &str, id: &str) -> StorageResult<Request> {
        self.block_on(async {
            let mut conn = self.pool.get().await?;

            // Ids pushed past the window are evicted even before the reaper
            // trims them.
            let commands = [
                Command::new("LPOS")
                    .arg(self.keys.requests(bin_name))
                    .arg(id)
                    .arg("MAXLEN")
                    .arg_int(self.config.max_requests as i64),
                Command::new("HGET")
                    .arg(self.keys.request_hash(bin_name))
                    .arg(id),
            ];
            let replies = self.run(&mut conn, &commands).await?;
            let [position, payload] = reply::expect_replies::<2>(replies)?;

            if reply::optional_integer("LPOS", position)?.is_none() {
                return Err(StorageError::request_not_found(bin_name, id));
            }
            match reply::bulk("HGET", payload)? {
                Some(data) => Ok(codec::decode(&data)?),
                None => Err(StorageError::request_not_found(bin_name, id)),
            }
        })
    }

    fn lookup_requests(&self, bin_name: &str, from: i64, to: i64) -> StorageResult<Vec<Request>> {
        let from = from.max(0);
        let to = to.min(self.config.max_requests as i64);

        self.block_on(async {
            let mut conn = self.pool.get().await?;

            let mut commands = vec![Command::new("EXISTS").arg(self.keys.bin(bin_name))];
            if from < to {
                commands.push(
                    Command::new("LRANGE")
                        .arg(self.keys.requests(bin_name))
                        .arg_int(from)
                        .arg_int(to - 1),
                );
            }
            let mut replies = self.run(&mut conn, &commands).await?.into_iter();

            let exists = replies.next().ok_or(StorageError::ConnectionClosed)?;
            if reply::integer("EXISTS", exists)? == 0 {
                return Err(StorageError::BinNotFound(bin_name.to_string()));
            }

            let ids = match replies.next() {
                Some(range) => reply::array("LRANGE", range)?,
                None => Vec::new(),
            };
            let ids: Vec<Bytes> = ids.into_iter().filter_map(RespValue::into_bytes).collect();
            if ids.is_empty() {
                return Ok(Vec::new());
            }

            let command = Command::new("HMGET")
                .arg(self.keys.request_hash(bin_name))
                .args(&ids);
            let values = reply::array("HMGET", conn.execute(command).await?)?;

            let mut requests = Vec::with_capacity(values.len());
            for value in values {
                let Some(data) = reply::bulk("HMGET", value)? else {
                    continue;
                };
                match codec::decode::<Request>(&data) {
                    Ok(request) => requests.push(request),
                    Err(e) => warn!(bin = %bin_name, error = %e, "Skipping undecodable request"),
                }
            }
            Ok(requests)
        })
    }
}

impl Sweep for RedisStorage {
    /// Trims every bin queued in the cleaning set.
    ///
    /// Stops when the set is empty or the medium reports an error.
    fn sweep(&self) -> StorageResult<usize> {
        self.block_on(async {
            let mut conn = self.pool.get().await?;
            let cleaning_set = self.keys.cleaning_set();
            let mut trimmed = 0;

            loop {
                let popped = conn
                    .execute(Command::new("SPOP").arg(&cleaning_set))
                    .await?;
                let Some(name) = reply::bulk("SPOP", popped)? else {
                    break;
                };
                let name = String::from_utf8_lossy(&name);

                let removed = self.trim(&mut conn, &name).await?;
                debug!(bin = %name, removed, "Request list trimmed");
                trimmed += 1;
            }

            Ok(trimmed)
        })
    }
}
