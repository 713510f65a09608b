//! In-process Redis stand-in for tests and benchmarks.
//!
//! [`MockServer`] speaks RESP2 over TCP and keeps a shared in-memory
//! keyspace. It covers the string commands this crate issues plus real
//! MULTI/EXEC/DISCARD/WATCH/UNWATCH semantics, so pipelines and optimistic
//! transactions can be exercised without a Redis server.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::proto::codec::{Decoder, Encoder};
use crate::proto::frame::Frame;

/// Shared state behind every connection to one mock server.
#[derive(Debug, Default)]
struct Keyspace {
    data: HashMap<Bytes, Bytes>,
    versions: HashMap<Bytes, u64>,
    clock: u64,
}

impl Keyspace {
    fn version(&self, key: &Bytes) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn touch(&mut self, key: &Bytes) {
        self.clock += 1;
        self.versions.insert(key.clone(), self.clock);
    }

    fn write(&mut self, key: &Bytes, value: Bytes) {
        self.data.insert(key.clone(), value);
        self.touch(key);
    }

    fn add(&mut self, key: &Bytes, delta: &[u8], sign: i64) -> Frame {
        let delta = match parse_i64(delta) {
            Some(d) => d,
            None => return not_an_integer(),
        };
        let current = match self.data.get(key) {
            Some(v) => match parse_i64(v) {
                Some(n) => n,
                None => return not_an_integer(),
            },
            None => 0,
        };
        match delta
            .checked_mul(sign)
            .and_then(|d| current.checked_add(d))
        {
            Some(next) => {
                self.write(key, Bytes::from(next.to_string()));
                Frame::Integer(next)
            }
            None => error("ERR increment or decrement would overflow"),
        }
    }

    /// Runs a data command whose arity was already checked.
    fn execute(&mut self, name: &str, args: &[Bytes]) -> Frame {
        match name {
            "PING" => Frame::SimpleString(b"PONG".to_vec()),
            "ECHO" => Frame::BulkString(Some(args[1].clone())),
            "GET" => Frame::BulkString(self.data.get(&args[1]).cloned()),
            "SET" => {
                self.write(&args[1], args[2].clone());
                ok()
            }
            "DEL" => {
                let mut removed = 0;
                for key in &args[1..] {
                    if self.data.remove(key).is_some() {
                        self.touch(key);
                        removed += 1;
                    }
                }
                Frame::Integer(removed)
            }
            "EXISTS" => Frame::Integer(
                args[1..]
                    .iter()
                    .filter(|k| self.data.contains_key(*k))
                    .count() as i64,
            ),
            "INCR" => self.add(&args[1], b"1", 1),
            "DECR" => self.add(&args[1], b"1", -1),
            "INCRBY" => self.add(&args[1], &args[2], 1),
            "DECRBY" => self.add(&args[1], &args[2], -1),
            "APPEND" => {
                let mut value = self
                    .data
                    .get(&args[1])
                    .map(|v| v.to_vec())
                    .unwrap_or_default();
                value.extend_from_slice(&args[2]);
                let len = value.len() as i64;
                self.write(&args[1], Bytes::from(value));
                Frame::Integer(len)
            }
            _ => error(&format!("ERR unknown command '{name}'")),
        }
    }
}

/// Minimum argument count (including the name) for supported data commands.
fn min_arity(name: &str) -> Option<usize> {
    match name {
        "PING" => Some(1),
        "ECHO" | "GET" | "DEL" | "EXISTS" | "INCR" | "DECR" => Some(2),
        "SET" | "INCRBY" | "DECRBY" | "APPEND" => Some(3),
        _ => None,
    }
}

fn parse_i64(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

fn ok() -> Frame {
    Frame::SimpleString(b"OK".to_vec())
}

fn error(message: &str) -> Frame {
    Frame::Error(message.as_bytes().to_vec())
}

fn not_an_integer() -> Frame {
    error("ERR value is not an integer or out of range")
}

/// Per-connection transaction state.
#[derive(Debug, Default)]
struct Session {
    authenticated: bool,
    in_multi: bool,
    queue_failed: bool,
    queued: Vec<(String, Vec<Bytes>)>,
    watched: Vec<(Bytes, u64)>,
}

impl Session {
    fn reset_transaction(&mut self) {
        self.in_multi = false;
        self.queue_failed = false;
        self.queued.clear();
        self.watched.clear();
    }
}

#[derive(Debug)]
struct Shared {
    keyspace: Mutex<Keyspace>,
    password: Option<String>,
    accepted: AtomicUsize,
    reply_delay: Mutex<Option<Duration>>,
}

impl Shared {
    fn keyspace(&self) -> MutexGuard<'_, Keyspace> {
        self.keyspace.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_reply_delay(&self) -> Option<Duration> {
        self.reply_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn handle(&self, session: &mut Session, frame: Frame) -> Frame {
        let args = match frame {
            Frame::Array(items) => {
                let mut args = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Frame::BulkString(Some(arg)) => args.push(arg),
                        _ => return error("ERR Protocol error: expected bulk strings"),
                    }
                }
                args
            }
            _ => return error("ERR Protocol error: expected array"),
        };
        let name = match args.first() {
            Some(name) => String::from_utf8_lossy(name).to_ascii_uppercase(),
            None => return error("ERR Protocol error: empty command"),
        };

        if !session.authenticated {
            if name != "AUTH" {
                return error("NOAUTH Authentication required.");
            }
            return self.auth(session, &args);
        }

        match name.as_str() {
            "AUTH" => self.auth(session, &args),
            "SELECT" | "CLIENT" => ok(),
            "MULTI" if session.in_multi => error("ERR MULTI calls can not be nested"),
            "MULTI" => {
                session.in_multi = true;
                ok()
            }
            "EXEC" if !session.in_multi => error("ERR EXEC without MULTI"),
            "EXEC" => self.exec(session),
            "DISCARD" if !session.in_multi => error("ERR DISCARD without MULTI"),
            "DISCARD" => {
                session.reset_transaction();
                ok()
            }
            "WATCH" if session.in_multi => error("ERR WATCH inside MULTI is not allowed"),
            "WATCH" if args.len() < 2 => {
                error("ERR wrong number of arguments for 'watch' command")
            }
            "WATCH" => {
                let keyspace = self.keyspace();
                for key in &args[1..] {
                    session.watched.push((key.clone(), keyspace.version(key)));
                }
                ok()
            }
            "UNWATCH" => {
                session.watched.clear();
                ok()
            }
            _ => match min_arity(&name) {
                None => {
                    session.queue_failed |= session.in_multi;
                    error(&format!("ERR unknown command '{name}'"))
                }
                Some(min) if args.len() < min => {
                    session.queue_failed |= session.in_multi;
                    error(&format!(
                        "ERR wrong number of arguments for '{}' command",
                        name.to_ascii_lowercase()
                    ))
                }
                Some(_) if session.in_multi => {
                    session.queued.push((name.clone(), args));
                    Frame::SimpleString(b"QUEUED".to_vec())
                }
                Some(_) => self.keyspace().execute(&name, &args),
            },
        }
    }

    fn auth(&self, session: &mut Session, args: &[Bytes]) -> Frame {
        let given = match args.last() {
            Some(pw) if args.len() >= 2 => pw,
            _ => return error("ERR wrong number of arguments for 'auth' command"),
        };
        match &self.password {
            Some(expected) if expected.as_bytes() == given.as_ref() => {
                session.authenticated = true;
                ok()
            }
            Some(_) => error("WRONGPASS invalid username-password pair or user is disabled."),
            None => error("ERR AUTH called without any password configured"),
        }
    }

    fn exec(&self, session: &mut Session) -> Frame {
        let queued = std::mem::take(&mut session.queued);
        let watched = std::mem::take(&mut session.watched);
        let failed = session.queue_failed;
        session.reset_transaction();

        if failed {
            return error("EXECABORT Transaction discarded because of previous errors.");
        }

        let mut keyspace = self.keyspace();
        if watched
            .iter()
            .any(|(key, version)| keyspace.version(key) != *version)
        {
            debug!("mock EXEC aborted by WATCH");
            return Frame::Null;
        }
        Frame::Array(
            queued
                .iter()
                .map(|(name, args)| keyspace.execute(name, args))
                .collect(),
        )
    }
}

/// A mock Redis server bound to an ephemeral localhost port.
///
/// The accept loop stops when the server is dropped.
#[derive(Debug)]
pub struct MockServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    /// Starts a server that accepts connections without authentication.
    pub async fn start() -> io::Result<Self> {
        Self::spawn(None).await
    }

    /// Starts a server that requires `AUTH <password>` first.
    pub async fn with_password(password: impl Into<String>) -> io::Result<Self> {
        Self::spawn(Some(password.into())).await
    }

    async fn spawn(password: Option<String>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Shared {
            keyspace: Mutex::new(Keyspace::default()),
            password,
            accepted: AtomicUsize::new(0),
            reply_delay: Mutex::new(None),
        });

        let accept_shared = Arc::clone(&shared);
        let accept_task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_shared.accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, Arc::clone(&accept_shared)));
            }
        });

        Ok(Self {
            addr,
            shared,
            accept_task,
        })
    }

    /// Returns the socket address the server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns a `redis://` URL for this server.
    pub fn url(&self) -> String {
        format!("redis://{}", self.addr)
    }

    /// Number of TCP connections accepted so far.
    pub fn connections_accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Reads a key directly from the keyspace.
    pub fn value(&self, key: &str) -> Option<Bytes> {
        self.shared
            .keyspace()
            .data
            .get(key.as_bytes())
            .cloned()
    }

    /// Holds back the next batch of replies written on any connection.
    ///
    /// Commands are still executed on arrival; only the write is late.
    pub fn delay_next_reply(&self, delay: Duration) {
        *self
            .shared
            .reply_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    /// Writes a key directly, as another client would, invalidating watches.
    pub fn set_value(&self, key: &str, value: impl Into<Bytes>) {
        let key = Bytes::copy_from_slice(key.as_bytes());
        self.shared.keyspace().write(&key, value.into());
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(mut socket: TcpStream, shared: Arc<Shared>) {
    let mut session = Session {
        authenticated: shared.password.is_none(),
        ..Session::default()
    };
    let mut decoder = Decoder::new();
    let mut encoder = Encoder::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.append(&buf[..n]);

        loop {
            match decoder.decode() {
                Ok(Some(frame)) => {
                    let reply = shared.handle(&mut session, frame);
                    encoder.encode(&reply);
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }

        let data = encoder.take();
        if data.is_empty() {
            continue;
        }
        if let Some(delay) = shared.take_reply_delay() {
            tokio::time::sleep(delay).await;
        }
        if socket.write_all(&data).await.is_err() {
            return;
        }
    }
}
