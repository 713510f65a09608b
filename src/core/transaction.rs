use bytes::Bytes;
use tracing::{debug, instrument, warn};

use crate::core::command::{self, Cmd};
use crate::core::pool::PooledConnection;
use crate::core::response::{Batch, Response};
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// A MULTI/EXEC transaction on a dedicated connection, optionally guarded by
/// WATCH.
///
/// Obtained from [`Client::multi`](crate::Client::multi), which sends MULTI
/// straight away, or [`Client::transaction`](crate::Client::transaction)
/// with `start_immediately = false`, which lets you [`watch`](Transaction::watch)
/// keys and read them before calling [`multi`](Transaction::multi).
///
/// Commands queued after MULTI are buffered locally and sent together with
/// EXEC. [`exec`](Transaction::exec) returns `Ok(None)` when a watched key
/// was modified in the meantime; nothing was applied in that case.
///
/// Dropping a transaction while MULTI or WATCH is still outstanding closes
/// its connection instead of returning it to the pool. Use
/// [`close`](Transaction::close) to clean up and keep the connection.
///
/// # Example
///
/// ```no_run
/// use redpipe::Client;
///
/// # async fn run() -> redpipe::Result<()> {
/// let client = Client::connect("redis://localhost:6379").await?;
/// let mut trans = client.transaction(false).await?;
/// trans.watch(&["shellpath"]).await?;
/// trans.multi().await?;
///
/// let current = client.get("shellpath").await?.unwrap_or_default();
/// let mut new_path = current.to_vec();
/// new_path.extend_from_slice(b":/usr/mycmds/");
/// let set = trans.set("shellpath", new_path)?;
///
/// match trans.exec().await? {
///     Some(results) => println!("{} -> {:?}", set.get()?, results),
///     None => println!("shellpath changed, try again"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Transaction {
    conn: PooledConnection,
    batch: Batch,
    in_multi: bool,
    watching: bool,
}

impl Transaction {
    pub(crate) async fn new(conn: PooledConnection, start_immediately: bool) -> Result<Self> {
        let mut trans = Self {
            conn,
            batch: Batch::default(),
            in_multi: false,
            watching: false,
        };
        if start_immediately {
            trans.multi().await?;
        }
        Ok(trans)
    }

    /// Returns true between MULTI and EXEC/DISCARD.
    pub fn is_in_multi(&self) -> bool {
        self.in_multi
    }

    /// Returns true while keys are watched.
    pub fn is_watching(&self) -> bool {
        self.watching
    }

    /// Number of commands queued for the next EXEC.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// Returns true if nothing is queued for the next EXEC.
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Watches keys so that EXEC aborts if any of them change first.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] after MULTI, [`Error::InvalidArgument`] for an
    /// empty key list.
    pub async fn watch<K: AsRef<str>>(&mut self, keys: &[K]) -> Result<()> {
        if self.in_multi {
            return Err(Error::invalid_state("WATCH inside MULTI is not allowed"));
        }
        if keys.is_empty() {
            return Err(Error::InvalidArgument {
                message: "WATCH needs at least one key".to_string(),
            });
        }
        let reply = self.conn.request(command::watch(keys).into_frame()).await?;
        command::expect_status(reply, "OK")?;
        self.watching = true;
        Ok(())
    }

    /// Forgets all watched keys.
    pub async fn unwatch(&mut self) -> Result<()> {
        if self.in_multi {
            return Err(Error::invalid_state("UNWATCH inside MULTI is not allowed"));
        }
        let reply = self.conn.request(command::unwatch().into_frame()).await?;
        command::expect_status(reply, "OK")?;
        self.watching = false;
        Ok(())
    }

    /// Sends MULTI; subsequent commands are queued for EXEC.
    pub async fn multi(&mut self) -> Result<()> {
        if self.in_multi {
            return Err(Error::invalid_state("MULTI calls can not be nested"));
        }
        let reply = self.conn.request(command::multi().into_frame()).await?;
        command::expect_status(reply, "OK")?;
        self.in_multi = true;
        Ok(())
    }

    fn queue<T>(&mut self, cmd: Cmd, convert: fn(Frame) -> Result<T>) -> Result<Response<T>> {
        if !self.in_multi {
            return Err(Error::invalid_state(
                "commands can only be queued after MULTI",
            ));
        }
        Ok(self.batch.push(cmd, convert))
    }

    /// Queues an arbitrary command; the placeholder yields the raw reply.
    pub fn send(&mut self, cmd: Cmd) -> Result<Response<Frame>> {
        self.queue(cmd, command::parse_frame_response)
    }

    /// Queues a GET.
    pub fn get(&mut self, key: &str) -> Result<Response<Option<Bytes>>> {
        self.queue(command::get(key.to_string()), command::frame_to_bytes)
    }

    /// Queues a SET; the placeholder yields the status reply (`OK`).
    pub fn set(&mut self, key: &str, value: impl Into<Bytes>) -> Result<Response<String>> {
        self.queue(command::set(key.to_string(), value), command::frame_to_status)
    }

    /// Queues a DEL of one or more keys.
    pub fn del<K: AsRef<str>>(&mut self, keys: &[K]) -> Result<Response<i64>> {
        self.queue(command::del(keys), command::frame_to_int)
    }

    /// Queues an INCR.
    pub fn incr(&mut self, key: &str) -> Result<Response<i64>> {
        self.queue(command::incr(key.to_string()), command::frame_to_int)
    }

    /// Queues an INCRBY.
    pub fn incr_by(&mut self, key: &str, amount: i64) -> Result<Response<i64>> {
        self.queue(command::incr_by(key.to_string(), amount), command::frame_to_int)
    }

    /// Queues a DECRBY.
    pub fn decr_by(&mut self, key: &str, amount: i64) -> Result<Response<i64>> {
        self.queue(command::decr_by(key.to_string(), amount), command::frame_to_int)
    }

    /// Queues an APPEND.
    pub fn append(&mut self, key: &str, value: impl Into<Bytes>) -> Result<Response<i64>> {
        self.queue(command::append(key.to_string(), value), command::frame_to_int)
    }

    /// Sends the queued commands followed by EXEC.
    ///
    /// Returns the replies in queue order, or `None` if a watched key was
    /// modified and the server aborted the transaction. Either way the
    /// server has left MULTI and dropped all watches.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] without a prior MULTI; [`Error::Server`] when
    /// the server refuses EXEC (e.g. `EXECABORT` after a command failed to
    /// queue); I/O errors.
    #[instrument(skip(self), fields(commands = self.batch.len()), level = "debug")]
    pub async fn exec(&mut self) -> Result<Option<Vec<Frame>>> {
        if !self.in_multi {
            return Err(Error::invalid_state("EXEC without MULTI"));
        }

        let (mut commands, pending) = self.batch.take();
        let queued = commands.len();
        commands.push(command::exec().into_frame());
        self.conn.begin_exchange();
        self.conn.write_frames(&commands).await?;

        for _ in 0..queued {
            let ack = self.conn.read_frame().await?;
            if let Frame::Error(message) = &ack {
                warn!(error = %String::from_utf8_lossy(message), "command rejected while queueing");
            }
        }
        let reply = self.conn.read_frame().await?;
        self.conn.end_exchange();
        self.in_multi = false;
        self.watching = false;

        match reply {
            Frame::Array(replies) => {
                if replies.len() != pending.len() {
                    self.conn.mark_dirty();
                    return Err(Error::Protocol {
                        message: format!(
                            "EXEC returned {} replies for {} commands",
                            replies.len(),
                            pending.len()
                        ),
                    });
                }
                debug!("transaction committed");
                pending.fulfil(&replies);
                Ok(Some(replies))
            }
            reply if reply.is_null() => {
                warn!("transaction aborted, a watched key was modified");
                Ok(None)
            }
            other => {
                let frame = command::parse_frame_response(other)?;
                self.conn.mark_dirty();
                Err(Error::Protocol {
                    message: format!("unexpected EXEC reply: {frame}"),
                })
            }
        }
    }

    /// Throws away the queued commands and leaves MULTI; also drops watches.
    pub async fn discard(&mut self) -> Result<()> {
        if !self.in_multi {
            return Err(Error::invalid_state("DISCARD without MULTI"));
        }
        self.batch.discard();
        let reply = self.conn.request(command::discard().into_frame()).await?;
        command::expect_status(reply, "OK")?;
        self.in_multi = false;
        self.watching = false;
        Ok(())
    }

    /// Discards or unwatches as needed, then returns the connection to the pool.
    ///
    /// After an I/O failure the connection is already closed and the server
    /// has dropped its MULTI and WATCH state, so there is nothing to undo.
    pub async fn close(mut self) -> Result<()> {
        if self.conn.is_broken() {
            self.in_multi = false;
            self.watching = false;
            return Ok(());
        }
        if self.in_multi {
            self.discard().await
        } else if self.watching {
            self.unwatch().await
        } else {
            Ok(())
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.in_multi || self.watching {
            self.conn.mark_dirty();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::testing::MockServer;
    use crate::{Client, ClientBuilder, Error};
    use bytes::Bytes;

    async fn client_for(server: &MockServer) -> Client {
        Client::connect(server.url()).await.unwrap()
    }

    #[tokio::test]
    async fn test_multi_increments_counters() {
        let server = MockServer::start().await.unwrap();
        let client = client_for(&server).await;

        let mut trans = client.multi().await.unwrap();
        assert!(trans.is_in_multi());
        let c1 = trans.incr_by("counter:1", 1).unwrap();
        let c2 = trans.incr_by("counter:2", 2).unwrap();
        let c3 = trans.incr_by("counter:3", 3).unwrap();
        assert!(matches!(c1.get(), Err(Error::ResponseNotReady)));

        let results = trans.exec().await.unwrap().unwrap();
        trans.close().await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!((c1.get().unwrap(), c2.get().unwrap(), c3.get().unwrap()), (1, 2, 3));
        assert_eq!(client.get("counter:1").await.unwrap(), Some(Bytes::from("1")));
        assert_eq!(client.get("counter:2").await.unwrap(), Some(Bytes::from("2")));
        assert_eq!(client.get("counter:3").await.unwrap(), Some(Bytes::from("3")));
    }

    #[tokio::test]
    async fn test_watched_transaction_commits_without_interference() {
        let server = MockServer::start().await.unwrap();
        let client = client_for(&server).await;
        client.set("shellpath", "/usr/syscmds/").await.unwrap();

        let mut trans = client.transaction(false).await.unwrap();
        assert!(!trans.is_in_multi());
        trans.watch(&["shellpath"]).await.unwrap();
        trans.multi().await.unwrap();

        let current = client.get("shellpath").await.unwrap().unwrap();
        let new_path = format!("{}:/usr/mycmds/", String::from_utf8_lossy(&current));
        let set_result = trans.set("shellpath", new_path).unwrap();
        let results = trans.exec().await.unwrap().expect("no interference");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].to_string(), "OK");
        assert_eq!(set_result.get().unwrap(), "OK");
        assert_eq!(
            client.get("shellpath").await.unwrap(),
            Some(Bytes::from("/usr/syscmds/:/usr/mycmds/"))
        );
        assert!(!trans.is_watching());
    }

    #[tokio::test]
    async fn test_watched_key_modified_aborts_exec() {
        let server = MockServer::start().await.unwrap();
        let client = client_for(&server).await;
        client.set("shellpath", "/usr/syscmds/").await.unwrap();

        let mut trans = client.transaction(false).await.unwrap();
        trans.watch(&["shellpath"]).await.unwrap();
        client.set("shellpath", "/opt/bin/").await.unwrap();

        trans.multi().await.unwrap();
        let set_result = trans.set("shellpath", "/usr/mycmds/").unwrap();
        assert!(trans.exec().await.unwrap().is_none());

        assert!(matches!(set_result.get(), Err(Error::Discarded)));
        assert_eq!(
            client.get("shellpath").await.unwrap(),
            Some(Bytes::from("/opt/bin/"))
        );
        trans.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_watch_after_multi_is_rejected() {
        let server = MockServer::start().await.unwrap();
        let client = client_for(&server).await;

        let mut trans = client.multi().await.unwrap();
        let err = trans.watch(&["shellpath"]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert!(matches!(
            trans.multi().await,
            Err(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_queue_before_multi_is_rejected() {
        let server = MockServer::start().await.unwrap();
        let client = client_for(&server).await;

        let mut trans = client.transaction(false).await.unwrap();
        assert!(matches!(
            trans.set("k", "v"),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(trans.exec().await, Err(Error::InvalidState { .. })));
        assert!(matches!(trans.discard().await, Err(Error::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_watch_requires_keys() {
        let server = MockServer::start().await.unwrap();
        let client = client_for(&server).await;

        let mut trans = client.transaction(false).await.unwrap();
        let keys: [&str; 0] = [];
        assert!(matches!(
            trans.watch(&keys).await,
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn test_discard_drops_queued_commands() {
        let server = MockServer::start().await.unwrap();
        let client = client_for(&server).await;

        let mut trans = client.multi().await.unwrap();
        let resp = trans.set("discarded", "value").unwrap();
        trans.discard().await.unwrap();

        assert!(matches!(resp.get(), Err(Error::Discarded)));
        assert!(!trans.is_in_multi());
        assert_eq!(client.get("discarded").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_queue_time_error_aborts_whole_transaction() {
        let server = MockServer::start().await.unwrap();
        let client = client_for(&server).await;

        let mut trans = client.multi().await.unwrap();
        trans.set("k", "v").unwrap();
        trans.send(crate::Cmd::new("NOSUCHCOMMAND")).unwrap();
        let err = trans.exec().await.unwrap_err();

        match err {
            Error::Server { message } => assert!(message.starts_with("EXECABORT")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(client.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_runtime_error_is_per_command() {
        let server = MockServer::start().await.unwrap();
        let client = client_for(&server).await;
        client.set("shellpath", "/usr/syscmds/").await.unwrap();

        let mut trans = client.multi().await.unwrap();
        let bad = trans.incr("shellpath").unwrap();
        let good = trans.incr_by("counter:1", 5).unwrap();
        let results = trans.exec().await.unwrap().unwrap();

        assert!(results[0].is_error());
        assert!(matches!(bad.get(), Err(Error::Server { .. })));
        assert_eq!(good.get().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_dropped_transaction_does_not_leak_multi_state() {
        let server = MockServer::start().await.unwrap();
        let client = client_for(&server).await;

        {
            let mut trans = client.multi().await.unwrap();
            trans.set("half", "done").unwrap();
        }

        // The next pipeline must not land inside the abandoned MULTI.
        let mut pipe = client.pipelined().await.unwrap();
        let resp = pipe.set("after", "ok");
        pipe.sync().await.unwrap();
        assert_eq!(resp.get().unwrap(), "OK");
        assert_eq!(server.value("half"), None);
        assert_eq!(server.value("after"), Some(Bytes::from("ok")));
    }

    #[tokio::test]
    async fn test_close_unwatches_and_reuses_connection() {
        let server = MockServer::start().await.unwrap();
        let client = client_for(&server).await;

        let mut trans = client.transaction(false).await.unwrap();
        trans.watch(&["a", "b"]).await.unwrap();
        assert!(trans.is_watching());
        trans.close().await.unwrap();

        let mut pipe = client.pipelined().await.unwrap();
        pipe.ping();
        pipe.close().await.unwrap();
        // one multiplexed connection plus one reused dedicated connection
        assert_eq!(server.connections_accepted(), 2);
    }

    #[tokio::test]
    async fn test_timed_out_exec_does_not_read_stale_replies() {
        let server = MockServer::start().await.unwrap();
        let client = ClientBuilder::new()
            .address(server.url())
            .read_timeout(Some(Duration::from_millis(50)))
            .build()
            .await
            .unwrap();

        let mut trans = client.multi().await.unwrap();
        let set = trans.set("late", "value").unwrap();
        server.delay_next_reply(Duration::from_millis(200));
        assert!(matches!(
            trans.exec().await,
            Err(Error::Timeout { operation: "read" })
        ));
        assert!(matches!(set.get(), Err(Error::Discarded)));

        // a retry must fail instead of reading the delayed QUEUED/EXEC replies
        assert!(matches!(trans.exec().await, Err(Error::Io { .. })));
        trans.close().await.unwrap();

        let mut trans = client.multi().await.unwrap();
        let n = trans.incr_by("counter:1", 2).unwrap();
        let results = trans.exec().await.unwrap().unwrap();
        trans.close().await.unwrap();
        assert_eq!(results, vec![crate::proto::frame::Frame::Integer(2)]);
        assert_eq!(n.get().unwrap(), 2);
    }
}
