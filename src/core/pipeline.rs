use bytes::Bytes;
use tracing::{debug, instrument};

use crate::core::command::{self, Cmd};
use crate::core::pool::PooledConnection;
use crate::core::response::{Batch, Response};
use crate::proto::frame::Frame;
use crate::Result;

/// A scoped batch of commands sent without waiting for individual replies.
///
/// Commands are queued in memory and each returns a [`Response`]
/// placeholder. [`sync`](Pipeline::sync) writes the whole batch in one go,
/// reads the replies and fills the placeholders in order.
///
/// The pipeline holds a dedicated connection from the client's pool until it
/// is closed or dropped. Dropping it with commands still queued throws them
/// away unsent; their placeholders then report [`Error::Discarded`](crate::Error::Discarded).
///
/// # Example
///
/// ```no_run
/// use redpipe::Client;
///
/// # async fn run() -> redpipe::Result<()> {
/// let client = Client::connect("redis://localhost:6379").await?;
/// let mut pipe = client.pipelined().await?;
/// let seat0 = pipe.get("seat:0");
/// let seat3 = pipe.get("seat:3");
/// pipe.sync().await?;
/// println!("{:?} {:?}", seat0.get()?, seat3.get()?);
/// pipe.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Pipeline {
    conn: PooledConnection,
    batch: Batch,
}

impl Pipeline {
    pub(crate) fn new(conn: PooledConnection) -> Self {
        Self {
            conn,
            batch: Batch::default(),
        }
    }

    /// Queues an arbitrary command; the placeholder yields the raw reply.
    pub fn send(&mut self, cmd: Cmd) -> Response<Frame> {
        self.batch.push(cmd, command::parse_frame_response)
    }

    /// Queues a GET.
    pub fn get(&mut self, key: &str) -> Response<Option<Bytes>> {
        self.batch
            .push(command::get(key.to_string()), command::frame_to_bytes)
    }

    /// Queues a SET; the placeholder yields the status reply (`OK`).
    pub fn set(&mut self, key: &str, value: impl Into<Bytes>) -> Response<String> {
        self.batch
            .push(command::set(key.to_string(), value), command::frame_to_status)
    }

    /// Queues a DEL of one or more keys; yields the number of keys removed.
    pub fn del<K: AsRef<str>>(&mut self, keys: &[K]) -> Response<i64> {
        self.batch.push(command::del(keys), command::frame_to_int)
    }

    /// Queues an EXISTS; yields how many of the keys exist.
    pub fn exists<K: AsRef<str>>(&mut self, keys: &[K]) -> Response<i64> {
        self.batch.push(command::exists(keys), command::frame_to_int)
    }

    /// Queues an INCR.
    pub fn incr(&mut self, key: &str) -> Response<i64> {
        self.batch
            .push(command::incr(key.to_string()), command::frame_to_int)
    }

    /// Queues an INCRBY.
    pub fn incr_by(&mut self, key: &str, amount: i64) -> Response<i64> {
        self.batch
            .push(command::incr_by(key.to_string(), amount), command::frame_to_int)
    }

    /// Queues a DECRBY.
    pub fn decr_by(&mut self, key: &str, amount: i64) -> Response<i64> {
        self.batch
            .push(command::decr_by(key.to_string(), amount), command::frame_to_int)
    }

    /// Queues an APPEND; yields the new length of the value.
    pub fn append(&mut self, key: &str, value: impl Into<Bytes>) -> Response<i64> {
        self.batch
            .push(command::append(key.to_string(), value), command::frame_to_int)
    }

    /// Queues a PING.
    pub fn ping(&mut self) -> Response<String> {
        self.batch.push(command::ping(), command::frame_to_status)
    }

    /// Number of commands queued and not yet synced.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// Returns true if no commands are waiting to be synced.
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Sends every queued command and fills their placeholders.
    ///
    /// A server error for an individual command is stored on that command's
    /// placeholder and does not fail the sync.
    ///
    /// # Errors
    ///
    /// Returns an error if writing or reading fails; the affected
    /// placeholders then report [`Error::Discarded`](crate::Error::Discarded)
    /// and the dedicated connection is closed, so later syncs on this
    /// pipeline fail as well.
    pub async fn sync(&mut self) -> Result<()> {
        self.flush().await.map(|_| ())
    }

    /// Like [`sync`](Pipeline::sync), also returning the raw replies in
    /// queue order.
    pub async fn sync_and_return_all(&mut self) -> Result<Vec<Frame>> {
        self.flush().await
    }

    /// Syncs anything still queued and gives the connection back to the pool.
    pub async fn close(mut self) -> Result<()> {
        self.sync().await
    }

    #[instrument(skip(self), fields(commands = self.batch.len()), level = "debug")]
    async fn flush(&mut self) -> Result<Vec<Frame>> {
        if self.batch.is_empty() {
            return Ok(Vec::new());
        }

        let (commands, pending) = self.batch.take();
        self.conn.begin_exchange();
        self.conn.write_frames(&commands).await?;

        let mut replies = Vec::with_capacity(commands.len());
        for _ in 0..commands.len() {
            replies.push(self.conn.read_frame().await?);
        }
        self.conn.end_exchange();
        debug!(replies = replies.len(), "pipeline synced");

        pending.fulfil(&replies);
        Ok(replies)
    }
}
