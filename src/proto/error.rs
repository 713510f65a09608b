use std::io;

use thiserror::Error;

/// Result type alias for redpipe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to Redis.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An IO error occurred.
    #[error("IO error: {source}")]
    Io {
        /// The underlying IO error.
        #[from]
        source: io::Error,
    },

    /// A protocol error occurred.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the error.
        message: String,
    },

    /// The server returned an error.
    #[error("server error: {message}")]
    Server {
        /// Error message from server.
        message: String,
    },

    /// Authentication failed.
    #[error("authentication failed")]
    Auth,

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of invalid argument.
        message: String,
    },

    /// Decoding failed.
    #[error("decode error: {source}")]
    Decode {
        /// Underlying decode error.
        #[from]
        source: DecodeError,
    },

    /// An operation did not complete within its configured deadline.
    #[error("{operation} timed out")]
    Timeout {
        /// The operation that timed out (e.g. "read", "connect").
        operation: &'static str,
    },

    /// The operation is not allowed in the current pipeline or transaction state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the violated state.
        message: String,
    },

    /// A response placeholder was read before its batch was executed.
    #[error("response is not available until the batch has been executed")]
    ResponseNotReady,

    /// A response placeholder belongs to a batch that was discarded or aborted.
    #[error("response was discarded because its batch never executed")]
    Discarded,
}

impl Error {
    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState {
            message: message.into(),
        }
    }

    pub(crate) fn connection_closed() -> Self {
        Error::Io {
            source: io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"),
        }
    }
}

/// Error returned when frame decoding fails.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    /// Creates a new decode error with the given description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the description of the malformed input.
    pub fn message(&self) -> &str {
        &self.message
    }
}
