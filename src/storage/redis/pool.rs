//! Connection pool over [`deadpool`].
//!
//! At most `pool_size` connections are open at once; a caller that finds
//! none free waits up to `acquire_timeout`. New connections are dialed within
//! `connect_timeout` and authenticated when a password is configured. A
//! connection is checked before every reuse: one that failed part-way, sat
//! unused for `idle_timeout` or does not answer `PING` is closed and
//! replaced.

use crate::config::RedisConfig;
use crate::error::{StorageError, StorageResult};
use crate::protocol::Command;
use crate::storage::redis::connection::Connection;
use crate::storage::redis::reply;
use deadpool::managed::{
    self, Metrics, Object, Pool, PoolError, RecycleError, RecycleResult, TimeoutType,
};
use deadpool::Runtime;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// A checked-out connection. Dropping it hands the connection back.
pub type PooledConnection = Object<Manager>;

/// Dials, authenticates and health-checks connections for the pool.
#[derive(Debug)]
pub struct Manager {
    address: String,
    password: Option<String>,
    connect_timeout: Duration,
    idle_timeout: Duration,
    dialed: Arc<AtomicU64>,
}

impl managed::Manager for Manager {
    type Type = Connection;
    type Error = StorageError;

    async fn create(&self) -> StorageResult<Connection> {
        let mut conn = Connection::connect(&self.address, self.connect_timeout).await?;

        if let Some(password) = &self.password {
            let reply = conn.execute(Command::new("AUTH").arg(password)).await?;
            reply::status("AUTH", reply)?;
        }

        let total = self.dialed.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(address = %self.address, total, "Opened connection to medium");
        Ok(conn)
    }

    async fn recycle(&self, conn: &mut Connection, _: &Metrics) -> RecycleResult<StorageError> {
        if conn.is_broken() {
            debug!("Discarding broken connection");
            return Err(RecycleError::Message("connection broken".into()));
        }
        if conn.idle_for() >= self.idle_timeout {
            trace!(idle_for = ?conn.idle_for(), "Closing stale connection");
            return Err(RecycleError::Message("connection idle too long".into()));
        }

        let reply = conn.execute(Command::new("PING")).await?;
        reply::status("PING", reply)?;
        Ok(())
    }
}

pub struct ConnectionPool {
    pool: Pool<Manager>,
    address: String,
    acquire_timeout: Duration,
    dialed: Arc<AtomicU64>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("ConnectionPool")
            .field("address", &self.address)
            .field("size", &status.size)
            .field("idle", &status.available)
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(config: &RedisConfig) -> StorageResult<Self> {
        let dialed = Arc::new(AtomicU64::new(0));
        let manager = Manager {
            address: config.address.clone(),
            password: config.password.clone(),
            connect_timeout: config.connect_timeout,
            idle_timeout: config.idle_timeout,
            dialed: Arc::clone(&dialed),
        };

        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .wait_timeout(Some(config.acquire_timeout))
            .create_timeout(Some(config.connect_timeout))
            .recycle_timeout(Some(config.connect_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            pool,
            address: config.address.clone(),
            acquire_timeout: config.acquire_timeout,
            dialed,
        })
    }

    /// Checks out a connection, reusing a healthy idle one when possible.
    pub async fn get(&self) -> StorageResult<PooledConnection> {
        self.pool.get().await.map_err(|e| match e {
            PoolError::Timeout(TimeoutType::Wait) => {
                StorageError::PoolExhausted(self.acquire_timeout)
            }
            PoolError::Timeout(_) => StorageError::ConnectTimeout(self.address.clone()),
            PoolError::Backend(e) => e,
            PoolError::Closed => StorageError::ConnectionClosed,
            other => StorageError::Medium(other.to_string()),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connections that could be checked out right now without waiting.
    pub fn available(&self) -> usize {
        let status = self.pool.status();
        status.max_size.saturating_sub(status.size) + status.available
    }

    /// Connections kept open for reuse.
    pub fn idle_count(&self) -> usize {
        self.pool.status().available
    }

    /// Connections opened since the pool was created.
    pub fn dialed(&self) -> u64 {
        self.dialed.load(Ordering::Relaxed)
    }
}
