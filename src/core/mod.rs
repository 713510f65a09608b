//! # Redpipe Core
//!
//! Connection handling, the high-level [`Client`], and the scoped batch
//! types built on top of it.
//!
//! ## Modules
//!
//! - [`connection`] - Framed connection and connection URL parsing
//! - [`command`] - Command builders and reply conversions
//! - [`builder`] - Client builder
//! - [`multiplexed`] - Shared connection for plain commands
//! - [`pool`] - Dedicated connections for pipelines and transactions
//! - [`pipeline`] / [`transaction`] / [`response`] - Scoped batches and
//!   their reply placeholders

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

pub use crate::proto::error::{Error, Result};

/// Client builder configuration.
pub mod builder;
/// Command construction helpers.
pub mod command;
/// Low-level connection management.
pub mod connection;
/// Multiplexing logic.
pub mod multiplexed;
pub mod pipeline;
pub mod pool;
pub mod response;
pub mod transaction;

use connection::ConnectionInfo;
use pipeline::Pipeline;
use pool::{ConnectionPool, PoolConfig};
use transaction::Transaction;

const DEFAULT_QUEUE_SIZE: usize = 1024;

/// High-level Redis client for standalone connections.
///
/// Plain commands share one multiplexed connection. Pipelines and
/// transactions each check out a dedicated connection from a bounded pool
/// and give it back when they are closed or dropped.
///
/// Cloning is cheap; clones share both the multiplexed connection and the
/// pool.
///
/// # Example
///
/// ```no_run
/// use redpipe::Client;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::connect("redis://localhost:6379").await?;
///     client.set("key", "value").await?;
///     let value = client.get("key").await?;
///     assert_eq!(value.as_deref(), Some(&b"value"[..]));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    connection: multiplexed::MultiplexedConnection,
    pool: Arc<ConnectionPool>,
}

impl Client {
    pub(crate) async fn connect_inner(
        info: ConnectionInfo,
        pool_config: PoolConfig,
        queue_size: usize,
    ) -> Result<Self> {
        let connection = connection::open(&info).await?;
        let connection = multiplexed::MultiplexedConnection::new(connection, queue_size);

        let pool = ConnectionPool::new(info, pool_config);
        pool.warm_up().await?;

        debug!("client connected");
        Ok(Self { connection, pool })
    }

    /// Connects to a Redis server using the provided address.
    ///
    /// The address has the form `redis://[[username]:password@]host[:port][/db]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a malformed address and
    /// [`Error::Io`] / [`Error::Auth`] if connecting fails.
    pub async fn connect<T: AsRef<str>>(addr: T) -> Result<Self> {
        let info = ConnectionInfo::from_url(addr.as_ref())?;
        Self::connect_inner(info, PoolConfig::default(), DEFAULT_QUEUE_SIZE).await
    }

    /// Starts a pipeline on a dedicated connection.
    pub async fn pipelined(&self) -> Result<Pipeline> {
        Ok(Pipeline::new(self.pool.acquire().await?))
    }

    /// Starts a transaction and sends MULTI right away.
    pub async fn multi(&self) -> Result<Transaction> {
        self.transaction(true).await
    }

    /// Starts a transaction on a dedicated connection.
    ///
    /// With `start_immediately = false` no MULTI is sent yet, so keys can
    /// be watched first with [`Transaction::watch`].
    pub async fn transaction(&self, start_immediately: bool) -> Result<Transaction> {
        let conn = self.pool.acquire().await?;
        Transaction::new(conn, start_immediately).await
    }

    /// Closes the dedicated connection pool.
    ///
    /// Affects every clone of this client. Pipelines and transactions still
    /// open keep their connections until they finish; new ones fail with
    /// [`Error::InvalidState`]. The multiplexed connection closes once the
    /// last clone is dropped.
    pub fn close(self) {
        self.pool.close();
        debug!("client closed");
    }

    async fn send(&self, cmd: command::Cmd) -> Result<crate::proto::frame::Frame> {
        self.connection.send_command(cmd.into_frame()).await
    }

    /// Sends a PING command to the server.
    ///
    /// # Returns
    ///
    /// The status reply, normally `PONG`.
    pub async fn ping(&self) -> Result<String> {
        command::frame_to_status(self.send(command::ping()).await?)
    }

    /// Echoes the provided message back from the server.
    pub async fn echo(&self, msg: &str) -> Result<Bytes> {
        let bytes = command::frame_to_bytes(self.send(command::echo(msg.to_string())).await?)?;
        Ok(bytes.unwrap_or_default())
    }

    /// Gets the value associated with the specified key.
    ///
    /// # Returns
    ///
    /// Returns `Some(Bytes)` if the key exists, or `None` if it does not.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        command::frame_to_bytes(self.send(command::get(key.to_string())).await?)
    }

    /// Sets the string value of a key.
    pub async fn set(&self, key: &str, value: impl Into<Bytes>) -> Result<()> {
        let frame = self.send(command::set(key.to_string(), value)).await?;
        command::expect_status(frame, "OK")
    }

    /// Sets the value of a key with an expiration time (`SET ... EX`).
    pub async fn set_with_expiry(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        expiry: Duration,
    ) -> Result<()> {
        let frame = self
            .send(command::set_with_expiry(key.to_string(), value, expiry))
            .await?;
        command::expect_status(frame, "OK")
    }

    /// Removes the specified key.
    ///
    /// # Returns
    ///
    /// `true` if the key was removed, `false` if the key did not exist.
    pub async fn del(&self, key: &str) -> Result<bool> {
        command::frame_to_bool(self.send(command::del(&[key])).await?)
    }

    /// Removes several keys at once, returning how many existed.
    pub async fn del_many<K: AsRef<str>>(&self, keys: &[K]) -> Result<i64> {
        command::frame_to_int(self.send(command::del(keys)).await?)
    }

    /// Returns whether the key exists.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        command::frame_to_bool(self.send(command::exists(&[key])).await?)
    }

    /// Increments the number stored at key by one.
    pub async fn incr(&self, key: &str) -> Result<i64> {
        command::frame_to_int(self.send(command::incr(key.to_string())).await?)
    }

    /// Increments the number stored at key by the specified amount.
    pub async fn incr_by(&self, key: &str, amount: i64) -> Result<i64> {
        command::frame_to_int(self.send(command::incr_by(key.to_string(), amount)).await?)
    }

    /// Decrements the number stored at key by one.
    pub async fn decr(&self, key: &str) -> Result<i64> {
        command::frame_to_int(self.send(command::decr(key.to_string())).await?)
    }

    /// Decrements the number stored at key by the specified amount.
    pub async fn decr_by(&self, key: &str, amount: i64) -> Result<i64> {
        command::frame_to_int(self.send(command::decr_by(key.to_string(), amount)).await?)
    }

    /// Appends to the value at key, returning the new length.
    pub async fn append(&self, key: &str, value: impl Into<Bytes>) -> Result<i64> {
        command::frame_to_int(self.send(command::append(key.to_string(), value)).await?)
    }
}
