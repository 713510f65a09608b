//! Dedicated connections for pipelines and transactions.
//!
//! WATCH and MULTI are connection-scoped on the server, and a pipeline
//! reads back exactly as many replies as it wrote, so neither can share
//! the multiplexed connection. They check a connection out of this pool
//! instead and give it back when they are done.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument};

use crate::core::connection::{self, with_deadline, Connection, ConnectionInfo};
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// Configuration for the dedicated connection pool.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of dedicated connections open at once.
    pub max_size: usize,
    /// Connections opened eagerly when the client is built.
    pub min_idle: usize,
    /// How long to wait for a free connection. `None` waits forever.
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            min_idle: 0,
            acquire_timeout: None,
        }
    }
}

/// Pool of dedicated connections to a single server.
#[derive(Debug)]
pub(crate) struct ConnectionPool {
    info: ConnectionInfo,
    config: PoolConfig,
    idle: Mutex<Vec<Connection<TcpStream>>>,
    permits: Arc<Semaphore>,
}

impl ConnectionPool {
    pub(crate) fn new(info: ConnectionInfo, config: PoolConfig) -> Arc<Self> {
        let permits = Arc::new(Semaphore::new(config.max_size.max(1)));
        Arc::new(Self {
            info,
            config,
            idle: Mutex::new(Vec::new()),
            permits,
        })
    }

    /// Opens `min_idle` connections concurrently.
    pub(crate) async fn warm_up(&self) -> Result<()> {
        let count = self.config.min_idle.min(self.config.max_size);
        if count == 0 {
            return Ok(());
        }
        let opened =
            futures::future::try_join_all((0..count).map(|_| connection::open(&self.info))).await?;
        debug!(count = opened.len(), "pool warmed up");
        self.lock_idle().extend(opened);
        Ok(())
    }

    /// Checks out a connection, reusing an idle one when available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no connection frees up within the
    /// configured acquire timeout, and [`Error::InvalidState`] once the pool
    /// is closed.
    #[instrument(skip(self), level = "debug")]
    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        let permits = Arc::clone(&self.permits);
        let permit = with_deadline(self.config.acquire_timeout, "pool acquire", async move {
            permits
                .acquire_owned()
                .await
                .map_err(|_| Error::invalid_state("connection pool is closed"))
        })
        .await?;

        let reused = self.lock_idle().pop();
        let conn = match reused {
            Some(conn) => {
                debug!("reusing idle connection");
                conn
            }
            None => connection::open(&self.info).await?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            dirty: false,
            in_flight: false,
            _permit: permit,
        })
    }

    /// Refuses further checkouts and closes idle connections.
    pub(crate) fn close(&self) {
        self.permits.close();
        self.lock_idle().clear();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    fn release(&self, conn: Connection<TcpStream>) {
        if self.is_closed() {
            return;
        }
        self.lock_idle().push(conn);
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<Connection<TcpStream>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A connection checked out of the pool.
///
/// Returned to the pool on drop. A connection marked dirty (server-side
/// MULTI or WATCH still outstanding) is closed instead, which makes the
/// server drop that state. So is one dropped in the middle of an exchange,
/// since unread replies may still be in flight. A failed read or write
/// closes the connection at once, and every later call fails with a
/// broken-pipe I/O error.
#[derive(Debug)]
pub(crate) struct PooledConnection {
    conn: Option<Connection<TcpStream>>,
    pool: Arc<ConnectionPool>,
    dirty: bool,
    in_flight: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Starts a write/read exchange. Until [`end_exchange`] is called the
    /// connection counts as dirty.
    ///
    /// [`end_exchange`]: PooledConnection::end_exchange
    pub(crate) fn begin_exchange(&mut self) {
        self.in_flight = true;
    }

    pub(crate) fn end_exchange(&mut self) {
        self.in_flight = false;
    }

    /// Returns true once an I/O error has closed the underlying connection.
    pub(crate) fn is_broken(&self) -> bool {
        self.conn.is_none()
    }

    /// Closes the socket after a failed read or write. Replies still in
    /// flight would otherwise be matched to later commands.
    fn break_connection(&mut self, err: &Error) {
        if self.conn.take().is_some() {
            debug!(error = %err, "dropping dedicated connection after I/O failure");
        }
        self.dirty = true;
    }

    pub(crate) async fn write_frames(&mut self, frames: &[Frame]) -> Result<()> {
        let result = match self.conn.as_mut() {
            Some(conn) => conn.write_frames(frames).await,
            None => Err(Error::connection_closed()),
        };
        if let Err(err) = &result {
            self.break_connection(err);
        }
        result
    }

    pub(crate) async fn read_frame(&mut self) -> Result<Frame> {
        let result = match self.conn.as_mut() {
            Some(conn) => conn.read_frame().await,
            None => Err(Error::connection_closed()),
        };
        if let Err(err) = &result {
            self.break_connection(err);
        }
        result
    }

    pub(crate) async fn request(&mut self, frame: Frame) -> Result<Frame> {
        self.begin_exchange();
        self.write_frames(std::slice::from_ref(&frame)).await?;
        let reply = self.read_frame().await?;
        self.end_exchange();
        Ok(reply)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.dirty || self.in_flight {
                debug!("closing dedicated connection with unknown server-side state");
            } else {
                self.pool.release(conn);
            }
        }
    }
}
