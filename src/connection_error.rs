//! Connection error types for the proxy
//!
//! Errors raised while dialing, checking out, or talking to an upstream
//! connection. Each variant knows whether it poisoned the connection it
//! happened on, what a client should be told, and how loudly to log it.

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::ProtocolError;

/// Errors that can occur during upstream connection management
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// Connecting to the upstream failed (refused, unresolvable, timed out)
    #[error("Failed to connect to {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    /// The upstream refused the database selection on a fresh connection
    #[error("SELECT {database} failed on {target}: {reason}")]
    SelectFailed {
        target: String,
        database: u32,
        reason: String,
    },

    /// No connection became available within the checkout timeout
    #[error("Connection pool exhausted for {target} (max size: {max_size}, waited {waited:?})")]
    PoolExhausted {
        target: String,
        max_size: usize,
        waited: Duration,
    },

    /// The pool was closed by shutdown
    #[error("Connection pool for {target} is closed")]
    PoolClosed { target: String },

    /// An upstream read or write did not complete in time
    #[error("Upstream {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The upstream closed the connection while a reply was expected
    #[error("Upstream closed the connection")]
    UpstreamClosed,

    /// Bytes were left over after the expected replies
    #[error("Upstream sent unexpected data after the expected replies")]
    Desync,

    /// The upstream sent something that is not a valid reply
    #[error("Protocol error: {0}")]
    Protocol(#[source] ProtocolError),

    /// I/O error during communication
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<ProtocolError> for ConnectionError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => Self::Io(e),
            other => Self::Protocol(other),
        }
    }
}

impl ConnectionError {
    /// Whether the connection this error happened on can no longer be trusted
    ///
    /// Dial, selection and pool errors never involve a checked-out
    /// connection; everything else happened mid-protocol.
    #[must_use]
    pub const fn marks_unhealthy(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::UpstreamClosed
                | Self::Desync
                | Self::Protocol(_)
                | Self::Io(_)
        )
    }

    /// Check if this is a pool exhaustion error
    #[must_use]
    pub const fn is_pool_exhausted(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }

    /// Check if this is a client disconnection (broken pipe or reset)
    #[must_use]
    pub fn is_client_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if matches!(e.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset)
        )
    }

    /// Message sent to the client in an error reply
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::PoolExhausted { waited, .. } => format!(
                "pool exhausted, no upstream connection available after {}ms",
                waited.as_millis()
            ),
            Self::PoolClosed { .. } => "proxy is shutting down".to_string(),
            Self::Dial { target, .. } => format!("upstream {target} unavailable"),
            other => format!("upstream error: {other}"),
        }
    }

    /// Get the appropriate log level for this error
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        match self {
            // Expected during shutdown
            Self::PoolClosed { .. } => tracing::Level::DEBUG,
            _ if self.is_client_disconnect() => tracing::Level::DEBUG,
            Self::SelectFailed { .. } => tracing::Level::ERROR,
            _ => tracing::Level::WARN,
        }
    }
}
