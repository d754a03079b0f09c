//! A single RESP connection to the medium.
//!
//! Commands are written in one batch and their replies read back in order,
//! so a pipeline of N commands costs one round trip:
//!
//! ```text
//! client                                   medium
//!   │ ── SET k v ─ EXPIRE k 60 ─ SADD s n ──▶ │
//!   │ ◀──────── +OK ─ :1 ─ :1 ─────────────── │
//! ```
//!
//! Replies accumulate in a `BytesMut` until the parser sees a complete
//! value. The stream type is generic so the read/write path can be driven
//! by any `AsyncRead + AsyncWrite` transport.

use crate::error::{StorageError, StorageResult};
use crate::protocol::{Command, RespParser, RespValue};
use bytes::BytesMut;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::trace;

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

pub struct Connection<S = TcpStream> {
    stream: BufWriter<S>,
    buffer: BytesMut,
    parser: RespParser,
    last_used: Instant,
    /// Set while an exchange is in flight; stays set if it fails or is
    /// abandoned, since the stream may hold a partial reply
    broken: bool,
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("buffered", &self.buffer.len())
            .field("idle_for", &self.last_used.elapsed())
            .field("broken", &self.broken)
            .finish()
    }
}

impl Connection<TcpStream> {
    /// Dials `address`, giving up after `timeout`.
    pub async fn connect(address: &str, timeout: Duration) -> StorageResult<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| StorageError::ConnectTimeout(address.to_string()))??;
        stream.set_nodelay(true)?;

        trace!(address = %address, "Connected to medium");
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
            last_used: Instant::now(),
            broken: false,
        }
    }

    /// Sends one command and reads its reply.
    pub async fn execute(&mut self, command: Command) -> StorageResult<RespValue> {
        let mut replies = self.pipeline(std::slice::from_ref(&command)).await?;
        replies.pop().ok_or(StorageError::ConnectionClosed)
    }

    /// Sends every command, then reads one reply per command.
    ///
    /// Error replies are returned in place, not raised; a medium error on
    /// one command does not desynchronize the ones after it.
    pub async fn pipeline(&mut self, commands: &[Command]) -> StorageResult<Vec<RespValue>> {
        self.broken = true;

        let mut out = BytesMut::new();
        for command in commands {
            command.encode_into(&mut out);
        }
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;

        trace!(commands = commands.len(), bytes = out.len(), "Sent pipeline");

        let mut replies = Vec::with_capacity(commands.len());
        while replies.len() < commands.len() {
            replies.push(self.read_reply().await?);
        }

        self.last_used = Instant::now();
        self.broken = false;
        Ok(replies)
    }

    async fn read_reply(&mut self) -> StorageResult<RespValue> {
        loop {
            if let Some(value) = self.parser.parse_buf(&mut self.buffer)? {
                return Ok(value);
            }

            if self.buffer.capacity() - self.buffer.len() < 1024 {
                self.buffer.reserve(INITIAL_BUFFER_SIZE);
            }

            let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(StorageError::ConnectionClosed);
            }
        }
    }

    /// True once an exchange failed part-way; the connection must not be
    /// reused.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Time since the last completed exchange.
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }
}
