//! In-process RESP test medium.
//!
//! A small Redis-compatible server covering the commands the storage engine
//! sends, with lazy key expiry. Each [`TestMedium`] listens on its own port
//! and runs on its own thread and runtime, so tests drive the engine from
//! plain synchronous code.

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use skimmer::config::RedisConfig;
use skimmer::protocol::{RespParser, RespValue};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};

enum Value {
    Str(Bytes),
    List(VecDeque<Bytes>),
    Hash(HashMap<Bytes, Bytes>),
    Set(HashSet<Bytes>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<Bytes, Entry>,
    /// Commands answered with an error reply
    failing: HashSet<String>,
}

fn error(msg: impl Into<String>) -> RespValue {
    RespValue::Error(msg.into())
}

fn ok() -> RespValue {
    RespValue::SimpleString("OK".to_string())
}

fn wrong_type() -> RespValue {
    error("WRONGTYPE Operation against a key holding the wrong kind of value")
}

fn not_an_integer() -> RespValue {
    error("ERR value is not an integer or out of range")
}

fn int(arg: &Bytes) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

fn count(n: usize) -> RespValue {
    RespValue::Integer(n as i64)
}

/// Inclusive index range of a list, with negative indexes counted from
/// the end.
fn range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

impl State {
    /// The entry for `key`, dropping it first if it has expired.
    fn live(&mut self, key: &[u8]) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn ensure(&mut self, key: &Bytes, empty: impl FnOnce() -> Value) -> &mut Entry {
        if self.live(key).is_none() {
            self.entries.insert(key.clone(), Entry::new(empty()));
        }
        self.entries
            .get_mut(key)
            .expect("entry inserted above")
    }

    fn dispatch(&mut self, name: &str, args: &[Bytes]) -> RespValue {
        if self.failing.contains(name) {
            return error(format!("ERR injected failure for {}", name));
        }

        match (name, args) {
            ("PING", []) => RespValue::SimpleString("PONG".to_string()),

            // Keys
            ("EXISTS", keys) if !keys.is_empty() => {
                count(keys.iter().filter(|k| self.live(k).is_some()).count())
            }
            ("DEL", keys) if !keys.is_empty() => count(
                keys.iter()
                    .filter(|k| self.live(k).is_some() && self.entries.remove(*k).is_some())
                    .count(),
            ),
            ("EXPIRE", [key, seconds]) => self.expire(key, seconds),
            ("TTL", [key]) => self.ttl(key),

            // Strings
            ("GET", [key]) => match self.live(key) {
                None => RespValue::Null,
                Some(Entry {
                    value: Value::Str(v),
                    ..
                }) => RespValue::BulkString(v.clone()),
                Some(_) => wrong_type(),
            },
            ("SET", [key, value]) => {
                self.entries
                    .insert(key.clone(), Entry::new(Value::Str(value.clone())));
                ok()
            }
            ("MGET", keys) if !keys.is_empty() => RespValue::Array(
                keys.iter()
                    .map(|k| match self.live(k) {
                        Some(Entry {
                            value: Value::Str(v),
                            ..
                        }) => RespValue::BulkString(v.clone()),
                        _ => RespValue::Null,
                    })
                    .collect(),
            ),

            // Lists
            ("LPUSH", [key, values @ ..]) if !values.is_empty() => {
                match &mut self.ensure(key, || Value::List(VecDeque::new())).value {
                    Value::List(list) => {
                        for value in values {
                            list.push_front(value.clone());
                        }
                        count(list.len())
                    }
                    _ => wrong_type(),
                }
            }
            ("LLEN", [key]) => match self.live(key) {
                None => count(0),
                Some(Entry {
                    value: Value::List(list),
                    ..
                }) => count(list.len()),
                Some(_) => wrong_type(),
            },
            ("LRANGE", [key, start, stop]) => {
                let (Some(start), Some(stop)) = (int(start), int(stop)) else {
                    return not_an_integer();
                };
                match self.live(key) {
                    None => RespValue::Array(Vec::new()),
                    Some(Entry {
                        value: Value::List(list),
                        ..
                    }) => match range(list.len(), start, stop) {
                        Some((from, to)) => RespValue::Array(
                            list.range(from..=to)
                                .cloned()
                                .map(RespValue::BulkString)
                                .collect(),
                        ),
                        None => RespValue::Array(Vec::new()),
                    },
                    Some(_) => wrong_type(),
                }
            }
            ("LPOS", [key, element, options @ ..]) => {
                let maxlen = match options {
                    [] => 0,
                    [flag, n] if flag.eq_ignore_ascii_case(b"MAXLEN") => match int(n) {
                        Some(n) if n >= 0 => n as usize,
                        _ => return not_an_integer(),
                    },
                    _ => return error("ERR syntax error"),
                };
                let limit = if maxlen == 0 { usize::MAX } else { maxlen };
                match self.live(key) {
                    None => RespValue::Null,
                    Some(Entry {
                        value: Value::List(list),
                        ..
                    }) => list
                        .iter()
                        .take(limit)
                        .position(|v| v == element)
                        .map_or(RespValue::Null, count),
                    Some(_) => wrong_type(),
                }
            }
            ("LREM", [key, n, element]) => {
                let Some(n) = int(n) else {
                    return not_an_integer();
                };
                let limit = if n == 0 { usize::MAX } else { n.unsigned_abs() as usize };
                let (removed, emptied) = match self.live(key) {
                    None => (0, false),
                    Some(Entry {
                        value: Value::List(list),
                        ..
                    }) => {
                        let mut removed = 0;
                        let mut kept = VecDeque::with_capacity(list.len());
                        // Negative counts remove from the tail
                        let drained: Vec<Bytes> = if n < 0 {
                            list.drain(..).rev().collect()
                        } else {
                            list.drain(..).collect()
                        };
                        for v in drained {
                            if removed < limit && &v == element {
                                removed += 1;
                            } else if n < 0 {
                                kept.push_front(v);
                            } else {
                                kept.push_back(v);
                            }
                        }
                        *list = kept;
                        (removed, list.is_empty())
                    }
                    Some(_) => return wrong_type(),
                };
                if emptied {
                    self.entries.remove(key);
                }
                count(removed)
            }
            ("LTRIM", [key, start, stop]) => {
                let (Some(start), Some(stop)) = (int(start), int(stop)) else {
                    return not_an_integer();
                };
                let emptied = match self.live(key) {
                    None => false,
                    Some(Entry {
                        value: Value::List(list),
                        ..
                    }) => {
                        match range(list.len(), start, stop) {
                            Some((from, to)) => {
                                list.truncate(to + 1);
                                list.drain(..from);
                            }
                            None => list.clear(),
                        }
                        list.is_empty()
                    }
                    Some(_) => return wrong_type(),
                };
                if emptied {
                    self.entries.remove(key);
                }
                ok()
            }

            // Hashes
            ("HSET", [key, pairs @ ..]) if !pairs.is_empty() && pairs.len() % 2 == 0 => {
                match &mut self.ensure(key, || Value::Hash(HashMap::new())).value {
                    Value::Hash(hash) => count(
                        pairs
                            .chunks(2)
                            .filter(|p| hash.insert(p[0].clone(), p[1].clone()).is_none())
                            .count(),
                    ),
                    _ => wrong_type(),
                }
            }
            ("HGET", [key, field]) => match self.live(key) {
                None => RespValue::Null,
                Some(Entry {
                    value: Value::Hash(hash),
                    ..
                }) => hash
                    .get(field)
                    .map_or(RespValue::Null, |v| RespValue::BulkString(v.clone())),
                Some(_) => wrong_type(),
            },
            ("HMGET", [key, fields @ ..]) if !fields.is_empty() => match self.live(key) {
                None => RespValue::Array(vec![RespValue::Null; fields.len()]),
                Some(Entry {
                    value: Value::Hash(hash),
                    ..
                }) => RespValue::Array(
                    fields
                        .iter()
                        .map(|f| {
                            hash.get(f)
                                .map_or(RespValue::Null, |v| RespValue::BulkString(v.clone()))
                        })
                        .collect(),
                ),
                Some(_) => wrong_type(),
            },
            ("HDEL", [key, fields @ ..]) if !fields.is_empty() => {
                let (removed, emptied) = match self.live(key) {
                    None => (0, false),
                    Some(Entry {
                        value: Value::Hash(hash),
                        ..
                    }) => {
                        let removed = fields.iter().filter(|f| hash.remove(*f).is_some()).count();
                        (removed, hash.is_empty())
                    }
                    Some(_) => return wrong_type(),
                };
                if emptied {
                    self.entries.remove(key);
                }
                count(removed)
            }
            ("HLEN", [key]) => match self.live(key) {
                None => count(0),
                Some(Entry {
                    value: Value::Hash(hash),
                    ..
                }) => count(hash.len()),
                Some(_) => wrong_type(),
            },

            // Sets
            ("SADD", [key, members @ ..]) if !members.is_empty() => {
                match &mut self.ensure(key, || Value::Set(HashSet::new())).value {
                    Value::Set(set) => {
                        count(members.iter().filter(|m| set.insert((*m).clone())).count())
                    }
                    _ => wrong_type(),
                }
            }
            ("SPOP", [key]) => {
                let (popped, emptied) = match self.live(key) {
                    None => (None, false),
                    Some(Entry {
                        value: Value::Set(set),
                        ..
                    }) => {
                        let member = set.iter().next().cloned();
                        if let Some(member) = &member {
                            set.remove(member);
                        }
                        (member, set.is_empty())
                    }
                    Some(_) => return wrong_type(),
                };
                if emptied {
                    self.entries.remove(key);
                }
                popped.map_or(RespValue::Null, RespValue::BulkString)
            }
            ("SCARD", [key]) => match self.live(key) {
                None => count(0),
                Some(Entry {
                    value: Value::Set(set),
                    ..
                }) => count(set.len()),
                Some(_) => wrong_type(),
            },

            _ => error(format!(
                "ERR unknown command or wrong number of arguments for '{}'",
                name
            )),
        }
    }

    fn expire(&mut self, key: &Bytes, seconds: &Bytes) -> RespValue {
        let Some(seconds) = int(seconds) else {
            return not_an_integer();
        };
        if self.live(key).is_none() {
            return count(0);
        }
        if seconds <= 0 {
            self.entries.remove(key);
        } else if let Some(entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds as u64));
        }
        count(1)
    }

    fn ttl(&mut self, key: &Bytes) -> RespValue {
        match self.live(key) {
            None => RespValue::Integer(-2),
            Some(Entry {
                expires_at: None, ..
            }) => RespValue::Integer(-1),
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let left = at.saturating_duration_since(Instant::now());
                RespValue::Integer(left.as_secs_f64().ceil() as i64)
            }
        }
    }
}

struct Shared {
    state: Mutex<State>,
    password: Option<String>,
    connections: AtomicUsize,
    open: AtomicUsize,
    commands: AtomicUsize,
    /// Bumped to make every open connection close
    kick: watch::Sender<u64>,
}

impl Shared {
    fn execute(&self, authed: &mut bool, command: RespValue) -> RespValue {
        let args: Vec<Bytes> = match command {
            RespValue::Array(items) => items.into_iter().filter_map(RespValue::into_bytes).collect(),
            _ => return error("ERR invalid command format"),
        };
        let Some((name, args)) = args.split_first() else {
            return error("ERR empty command");
        };
        let name = String::from_utf8_lossy(name).to_uppercase();
        self.commands.fetch_add(1, Ordering::Relaxed);

        if name == "AUTH" {
            return match (&self.password, args) {
                (None, _) => error("ERR AUTH called without any password configured"),
                (Some(password), [given]) if &given[..] == password.as_bytes() => {
                    *authed = true;
                    ok()
                }
                (Some(_), _) => error("WRONGPASS invalid username-password pair"),
            };
        }
        if self.password.is_some() && !*authed {
            return error("NOAUTH Authentication required.");
        }

        self.state.lock().dispatch(&name, args)
    }
}

async fn serve(shared: Arc<Shared>, mut stream: TcpStream, mut kicked: watch::Receiver<u64>) {
    let mut buffer = BytesMut::with_capacity(4096);
    let mut parser = RespParser::new();
    let mut authed = false;

    loop {
        loop {
            match parser.parse_buf(&mut buffer) {
                Ok(Some(command)) => {
                    let reply = shared.execute(&mut authed, command);
                    if stream.write_all(&reply.encode()).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }

        tokio::select! {
            read = stream.read_buf(&mut buffer) => match read {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            },
            _ = kicked.changed() => return,
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    while let Ok((stream, _)) = listener.accept().await {
        shared.connections.fetch_add(1, Ordering::Relaxed);
        shared.open.fetch_add(1, Ordering::SeqCst);
        let kicked = shared.kick.subscribe();
        let tracked = Arc::clone(&shared);
        tokio::spawn(async move {
            serve(Arc::clone(&tracked), stream, kicked).await;
            tracked.open.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

/// A running test medium. Dropping it shuts the server down.
pub struct TestMedium {
    address: String,
    shared: Arc<Shared>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TestMedium {
    pub fn start() -> Self {
        Self::build(None)
    }

    /// Starts a medium that requires `AUTH password` on every connection.
    pub fn with_password(password: &str) -> Self {
        Self::build(Some(password.to_string()))
    }

    fn build(password: Option<String>) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            password,
            connections: AtomicUsize::new(0),
            open: AtomicUsize::new(0),
            commands: AtomicUsize::new(0),
            kick: watch::channel(0).0,
        });

        let (shutdown, shutdown_rx) = oneshot::channel();
        let server = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("test-medium".to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                runtime.block_on(async move {
                    let listener = TcpListener::from_std(listener).unwrap();
                    tokio::select! {
                        _ = accept_loop(listener, server) => {}
                        _ = shutdown_rx => {}
                    }
                });
            })
            .unwrap();

        Self {
            address,
            shared,
            shutdown: Some(shutdown),
            thread: Some(thread),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Engine configuration pointing at this medium.
    pub fn config(&self) -> RedisConfig {
        RedisConfig {
            connect_timeout: Duration::from_secs(2),
            acquire_timeout: Duration::from_secs(2),
            ..RedisConfig::new(self.address.clone())
        }
    }

    /// Runs a command directly against the stored data.
    pub fn command(&self, name: &str, args: &[&[u8]]) -> RespValue {
        let args: Vec<Bytes> = args.iter().map(|a| Bytes::copy_from_slice(a)).collect();
        self.shared.state.lock().dispatch(name, &args)
    }

    fn integer(&self, name: &str, args: &[&[u8]]) -> i64 {
        match self.command(name, args) {
            RespValue::Integer(n) => n,
            other => panic!("{} returned {:?}", name, other),
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.integer("EXISTS", &[key.as_bytes()]) == 1
    }

    pub fn llen(&self, key: &str) -> i64 {
        self.integer("LLEN", &[key.as_bytes()])
    }

    pub fn hlen(&self, key: &str) -> i64 {
        self.integer("HLEN", &[key.as_bytes()])
    }

    pub fn scard(&self, key: &str) -> i64 {
        self.integer("SCARD", &[key.as_bytes()])
    }

    pub fn ttl(&self, key: &str) -> i64 {
        self.integer("TTL", &[key.as_bytes()])
    }

    /// Stores raw bytes under a string key.
    pub fn set_raw(&self, key: &str, data: &[u8]) {
        self.command("SET", &[key.as_bytes(), data]);
    }

    /// Stores raw bytes under a hash field.
    pub fn hset_raw(&self, key: &str, field: &str, data: &[u8]) {
        self.command("HSET", &[key.as_bytes(), field.as_bytes(), data]);
    }

    /// Makes every later `command` fail with an error reply.
    pub fn fail(&self, command: &str) {
        self.shared
            .state
            .lock()
            .failing
            .insert(command.to_uppercase());
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::Relaxed)
    }

    /// Closes every open connection from the server side, as a restart
    /// would, and waits until they are gone.
    pub fn drop_connections(&self) {
        self.shared.kick.send_modify(|generation| *generation += 1);

        let deadline = Instant::now() + Duration::from_secs(2);
        while self.shared.open.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Commands received over the network so far.
    pub fn commands(&self) -> usize {
        self.shared.commands.load(Ordering::Relaxed)
    }
}

impl Drop for TestMedium {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
