use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, instrument};

use crate::core::connection::{Connection, ConnectionReader, ConnectionWriter};
use crate::proto::frame::Frame;
use crate::{Error, Result};

type Waiter = oneshot::Sender<Result<Frame>>;

/// A request sent to the multiplexer.
struct Request {
    frame: Frame,
    response_tx: Waiter,
}

/// A handle to a multiplexed connection.
///
/// This handle is cheap to clone and can be shared across multiple tasks.
/// Replies are matched to requests in FIFO order, which is why stateful
/// command sequences (WATCH, MULTI, pipelines) never go through it: they
/// use a dedicated connection from the [`pool`](crate::core::pool).
#[derive(Clone)]
pub struct MultiplexedConnection {
    sender: mpsc::Sender<Request>,
}

impl MultiplexedConnection {
    /// Creates a new multiplexed connection.
    ///
    /// # Arguments
    ///
    /// * `connection` - The underlying connection to multiplex.
    /// * `queue_size` - The maximum number of pending requests.
    pub fn new<S>(connection: Connection<S>, queue_size: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = connection.split();
        let (request_tx, request_rx) = mpsc::channel(queue_size);
        let (waiter_tx, waiter_rx) = mpsc::channel(queue_size);

        tokio::spawn(run_writer(writer, request_rx, waiter_tx));
        tokio::spawn(run_reader(reader, waiter_rx));

        Self { sender: request_tx }
    }

    /// Sends a command to the server and awaits the response.
    #[instrument(skip(self), level = "debug")]
    pub async fn send_command(&self, frame: Frame) -> Result<Frame> {
        let (response_tx, response_rx) = oneshot::channel();
        let request = Request { frame, response_tx };

        self.sender
            .send(request)
            .await
            .map_err(|_| Error::connection_closed())?;

        response_rx.await.map_err(|_| Error::connection_closed())?
    }

    /// Returns true once the background tasks have stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl fmt::Debug for MultiplexedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiplexedConnection")
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn run_writer<S>(
    mut writer: ConnectionWriter<S>,
    mut request_rx: mpsc::Receiver<Request>,
    waiter_tx: mpsc::Sender<Waiter>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(req) = request_rx.recv().await {
        debug!(?req.frame, "sending frame");
        if let Err(e) = writer.write_frame(&req.frame).await {
            error!(error = ?e, "failed to write frame");
            let _ = req.response_tx.send(Err(e));
            return;
        }

        // Reader task gone means the connection is dead.
        if waiter_tx.send(req.response_tx).await.is_err() {
            return;
        }
    }
}

async fn run_reader<S>(mut reader: ConnectionReader<S>, mut waiter_rx: mpsc::Receiver<Waiter>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(tx) = waiter_rx.recv().await {
        match reader.read_frame().await {
            Ok(frame) => {
                debug!(?frame, "received frame");
                let _ = tx.send(Ok(frame));
            }
            Err(e) => {
                error!(error = ?e, "failed to read frame");
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::command;

    #[tokio::test]
    async fn test_replies_follow_request_order() {
        let (client, server) = tokio::io::duplex(1024);
        let mux = MultiplexedConnection::new(Connection::new(client), 16);

        tokio::spawn(async move {
            let mut server = Connection::new(server);
            for n in 1..=3 {
                server.read_frame().await.unwrap();
                server.write_frame(&Frame::Integer(n)).await.unwrap();
            }
        });

        let (a, b, c) = tokio::join!(
            mux.send_command(command::incr("counter:1").into_frame()),
            mux.send_command(command::incr("counter:1").into_frame()),
            mux.send_command(command::incr("counter:1").into_frame()),
        );
        let mut replies = vec![a.unwrap(), b.unwrap(), c.unwrap()];
        replies.sort_by_key(|f| match f {
            Frame::Integer(n) => *n,
            _ => 0,
        });
        assert_eq!(
            replies,
            vec![Frame::Integer(1), Frame::Integer(2), Frame::Integer(3)]
        );
    }

    #[tokio::test]
    async fn test_send_after_server_hangup() {
        let (client, server) = tokio::io::duplex(1024);
        let mux = MultiplexedConnection::new(Connection::new(client), 4);
        drop(server);

        let result = mux.send_command(command::ping().into_frame()).await;
        assert!(result.is_err());
    }
}
