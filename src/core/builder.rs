use std::time::Duration;

use crate::core::connection::ConnectionInfo;
use crate::core::pool::PoolConfig;
use crate::{Client, Error};

const DEFAULT_QUEUE_SIZE: usize = 1024;

/// Builder for configuring and creating a [`Client`] connection.
///
/// Credentials and the database index may be given in the address URL or
/// through the builder; builder values win.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use redpipe::ClientBuilder;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ClientBuilder::new()
///     .address("redis://localhost:6379")
///     .password("secret")
///     .database(0)
///     .pool_size(4)
///     .acquire_timeout(Duration::from_secs(2))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ClientBuilder {
    address: Option<String>,
    password: Option<String>,
    username: Option<String>,
    database: Option<u8>,
    client_name: Option<String>,
    connection_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    queue_size: Option<usize>,
    pool_size: Option<usize>,
    min_idle: Option<usize>,
    acquire_timeout: Option<Duration>,
}

impl ClientBuilder {
    /// Creates a new [`ClientBuilder`] instance.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the Redis server address.
    ///
    /// # Arguments
    ///
    /// * `address` - Redis address in format `redis://[[user]:pass@]host[:port][/db]`
    #[inline]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets the password for authentication.
    #[inline]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the username for ACL authentication.
    #[inline]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the Redis database number to select after connection.
    #[inline]
    pub fn database(mut self, database: u8) -> Self {
        self.database = Some(database);
        self
    }

    /// Sets the client connection name shown by `CLIENT LIST`.
    #[inline]
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Sets the connection timeout.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum time to wait for connection establishment
    #[inline]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Sets the read timeout for commands. `None` means no timeout.
    #[inline]
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the write timeout for commands. `None` means no timeout.
    #[inline]
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the maximum number of pending requests on the multiplexed
    /// connection (default: 1024).
    #[inline]
    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = Some(size);
        self
    }

    /// Sets how many dedicated connections pipelines and transactions may
    /// hold at once (default: 8).
    #[inline]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Sets how many dedicated connections to open up front (default: 0).
    #[inline]
    pub fn min_idle(mut self, count: usize) -> Self {
        self.min_idle = Some(count);
        self
    }

    /// Sets how long starting a pipeline or transaction may wait for a free
    /// dedicated connection.
    #[inline]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    fn connection_info(&self) -> Result<ConnectionInfo, Error> {
        let address = self.address.as_deref().ok_or_else(|| Error::InvalidArgument {
            message: "address is required".to_string(),
        })?;

        let mut info = ConnectionInfo::from_url(address)?;
        if self.username.is_some() {
            info.username = self.username.clone();
        }
        if self.password.is_some() {
            info.password = self.password.clone();
        }
        if self.database.is_some() {
            info.database = self.database;
        }
        info.client_name = self.client_name.clone();
        info.connection_timeout = self.connection_timeout;
        info.read_timeout = self.read_timeout;
        info.write_timeout = self.write_timeout;
        Ok(info)
    }

    fn pool_config(&self) -> Result<PoolConfig, Error> {
        let defaults = PoolConfig::default();
        let max_size = self.pool_size.unwrap_or(defaults.max_size);
        if max_size == 0 {
            return Err(Error::InvalidArgument {
                message: "pool size must be at least 1".to_string(),
            });
        }
        Ok(PoolConfig {
            max_size,
            min_idle: self.min_idle.unwrap_or(defaults.min_idle).min(max_size),
            acquire_timeout: self.acquire_timeout,
        })
    }

    /// Builds the [`Client`] connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the address is missing or
    /// malformed, or the pool size is zero.
    /// Returns [`Error::Io`] if connection fails.
    pub async fn build(self) -> Result<Client, Error> {
        let info = self.connection_info()?;
        let pool_config = self.pool_config()?;
        Client::connect_inner(
            info,
            pool_config,
            self.queue_size.unwrap_or(DEFAULT_QUEUE_SIZE),
        )
        .await
    }
}
