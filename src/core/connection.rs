use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::core::command;
use crate::proto::codec::{Decoder, Encoder};
use crate::proto::frame::Frame;
use crate::{Error, Result};

const DEFAULT_PORT: u16 = 6379;
const READ_CHUNK: usize = 4096;

/// Everything needed to open and initialise a connection to one server.
///
/// Parsed from a `redis://[[username]:password@]host[:port][/db]` URL and
/// refined by [`ClientBuilder`](crate::ClientBuilder).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) database: Option<u8>,
    pub(crate) client_name: Option<String>,
    pub(crate) connection_timeout: Option<Duration>,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) write_timeout: Option<Duration>,
}

impl ConnectionInfo {
    /// Parses a connection URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for malformed URLs, unknown schemes,
    /// `rediss://` (TLS is not supported) and non-numeric database paths.
    pub fn from_url(address: &str) -> Result<Self> {
        let parsed = url::Url::parse(address).map_err(|_| Error::InvalidArgument {
            message: "invalid address format".to_string(),
        })?;

        match parsed.scheme() {
            "redis" => {}
            "rediss" => {
                return Err(Error::InvalidArgument {
                    message: "TLS connections (rediss://) are not supported".to_string(),
                })
            }
            _ => {
                return Err(Error::InvalidArgument {
                    message: "invalid scheme, expected redis://".to_string(),
                })
            }
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| Error::InvalidArgument {
                message: "missing host in address".to_string(),
            })?
            .to_string();

        let username = Some(parsed.username())
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        let password = parsed.password().map(str::to_string);

        let database = match parsed.path().trim_start_matches('/') {
            "" => None,
            db => Some(db.parse::<u8>().map_err(|_| Error::InvalidArgument {
                message: format!("invalid database index: {db}"),
            })?),
        };

        Ok(Self {
            host,
            port: parsed.port().unwrap_or(DEFAULT_PORT),
            username,
            password,
            database,
            client_name: None,
            connection_timeout: None,
            read_timeout: None,
            write_timeout: None,
        })
    }

    /// Returns the `host:port` socket address.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Runs `fut`, failing with [`Error::Timeout`] if `deadline` elapses first.
pub(crate) async fn with_deadline<F, T>(
    deadline: Option<Duration>,
    operation: &'static str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout { operation })?,
        None => fut.await,
    }
}

async fn read_frame_from<R>(stream: &mut R, decoder: &mut Decoder) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(frame) = decoder.decode()? {
            return Ok(frame);
        }
        let mut buf = [0u8; READ_CHUNK];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::Protocol {
                message: "connection closed".to_string(),
            });
        }
        decoder.append(&buf[..n]);
    }
}

async fn write_frames_to<W>(stream: &mut W, encoder: &mut Encoder, frames: &[Frame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    encoder.encode_all(frames);
    let data = encoder.take();
    stream.write_all(&data).await?;
    stream.flush().await?;
    Ok(())
}

/// A connection to a Redis server.
///
/// This struct wraps an underlying stream (TCP or an in-memory duplex in
/// tests) and handles RESP frame encoding and decoding.
///
/// # Example
///
/// ```ignore
/// use redpipe::core::connection::Connection;
/// use tokio::net::TcpStream;
///
/// #[tokio::main]
/// async fn main() -> redpipe::Result<()> {
///     let stream = TcpStream::connect("127.0.0.1:6379").await?;
///     let mut conn = Connection::new(stream);
///     let reply = conn.request(redpipe::Cmd::new("PING").into_frame()).await?;
///     println!("{reply}");
///     Ok(())
/// }
/// ```
pub struct Connection<S> {
    stream: S,
    decoder: Decoder,
    encoder: Encoder,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection with the given stream and no timeouts.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: Decoder::new(),
            encoder: Encoder::new(),
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// Configures read and write timeouts for this connection.
    pub fn with_timeouts(
        mut self,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Self {
        self.read_timeout = read_timeout;
        self.write_timeout = write_timeout;
        self
    }

    /// Writes a single frame.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_frames(std::slice::from_ref(frame)).await
    }

    /// Writes a batch of frames with one write, without waiting for replies.
    pub async fn write_frames(&mut self, frames: &[Frame]) -> Result<()> {
        let Self {
            stream,
            encoder,
            write_timeout,
            ..
        } = self;
        with_deadline(
            *write_timeout,
            "write",
            write_frames_to(stream, encoder, frames),
        )
        .await
    }

    /// Reads the next complete frame.
    ///
    /// Handles partial reads internally.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed, the read times out, or
    /// the server sends malformed data.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let Self {
            stream,
            decoder,
            read_timeout,
            ..
        } = self;
        with_deadline(*read_timeout, "read", read_frame_from(stream, decoder)).await
    }

    /// Writes one frame and reads its reply.
    pub async fn request(&mut self, frame: Frame) -> Result<Frame> {
        self.write_frame(&frame).await?;
        self.read_frame().await
    }

    /// Authenticates, selects the database and names the connection as
    /// configured in `info`.
    pub(crate) async fn handshake(&mut self, info: &ConnectionInfo) -> Result<()> {
        if let Some(password) = &info.password {
            let cmd = match &info.username {
                Some(username) => command::auth_with_username(username.clone(), password.clone()),
                None => command::auth(password.clone()),
            };
            if self.request(cmd.into_frame()).await?.is_error() {
                return Err(Error::Auth);
            }
        }

        if let Some(db) = info.database {
            let resp = self.request(command::select(db).into_frame()).await?;
            command::parse_frame_response(resp)?;
        }

        if let Some(name) = &info.client_name {
            let resp = self
                .request(command::client_setname(name.clone()).into_frame())
                .await?;
            command::parse_frame_response(resp)?;
        }

        Ok(())
    }

    /// Splits the connection into independently owned read and write halves.
    pub fn split(self) -> (ConnectionReader<S>, ConnectionWriter<S>) {
        let (read_half, write_half) = tokio::io::split(self.stream);
        (
            ConnectionReader {
                stream: read_half,
                decoder: self.decoder,
                read_timeout: self.read_timeout,
            },
            ConnectionWriter {
                stream: write_half,
                encoder: self.encoder,
                write_timeout: self.write_timeout,
            },
        )
    }
}

/// Opens a TCP connection and runs the handshake.
#[instrument(skip(info), fields(addr = %info.addr()), level = "debug")]
pub(crate) async fn open(info: &ConnectionInfo) -> Result<Connection<TcpStream>> {
    let addr = info.addr();
    let stream = with_deadline(info.connection_timeout, "connect", async {
        TcpStream::connect(&addr).await.map_err(Error::from)
    })
    .await?;
    stream.set_nodelay(true)?;

    let mut connection = Connection::new(stream).with_timeouts(info.read_timeout, info.write_timeout);
    connection.handshake(info).await?;
    debug!("connection established");
    Ok(connection)
}

impl<S> fmt::Debug for Connection<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("stream", &self.stream)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

/// Read half of a split [`Connection`].
pub struct ConnectionReader<S> {
    stream: ReadHalf<S>,
    decoder: Decoder,
    read_timeout: Option<Duration>,
}

impl<S> ConnectionReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Reads the next complete frame.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        with_deadline(
            self.read_timeout,
            "read",
            read_frame_from(&mut self.stream, &mut self.decoder),
        )
        .await
    }
}

/// Write half of a split [`Connection`].
pub struct ConnectionWriter<S> {
    stream: WriteHalf<S>,
    encoder: Encoder,
    write_timeout: Option<Duration>,
}

impl<S> ConnectionWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Writes a single frame.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        with_deadline(
            self.write_timeout,
            "write",
            write_frames_to(
                &mut self.stream,
                &mut self.encoder,
                std::slice::from_ref(frame),
            ),
        )
        .await
    }
}
