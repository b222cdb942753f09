//! Health checks for idle pooled connections
//!
//! Run on every checkout of an idle connection. Nothing is sent upstream;
//! the check only inspects state the proxy already has.

use deadpool::managed;
use thiserror::Error;

use super::connection::UpstreamConnection;
use crate::connection_error::ConnectionError;
use crate::constants::socket::PEEK_BUFFER_SIZE;

/// Reasons an idle connection is rejected
#[derive(Debug, Error)]
pub enum HealthCheckError {
    /// A previous holder saw an error mid-protocol
    #[error("connection was marked unhealthy")]
    MarkedUnhealthy,

    /// The upstream closed the connection while it sat idle
    #[error("connection closed by upstream")]
    Closed,

    /// Unread bytes are buffered or waiting on the socket
    #[error("unexpected data on idle connection")]
    UnexpectedData,

    /// Socket-level error
    #[error("socket error: {0}")]
    Socket(std::io::Error),
}

impl From<HealthCheckError> for managed::RecycleError<ConnectionError> {
    fn from(err: HealthCheckError) -> Self {
        managed::RecycleError::Message(err.to_string().into())
    }
}

/// Decide whether an idle connection may be handed out again
///
/// `try_read()` on an idle, healthy socket returns `WouldBlock`: the
/// upstream only ever speaks in answer to a request. `Ok(0)` is EOF and
/// `Ok(n)` is data nobody asked for; either way the stream position can no
/// longer be trusted.
pub fn check_idle(conn: &UpstreamConnection) -> Result<(), HealthCheckError> {
    if !conn.is_healthy() {
        return Err(HealthCheckError::MarkedUnhealthy);
    }
    if conn.has_buffered_input() {
        return Err(HealthCheckError::UnexpectedData);
    }

    let mut peek_buf = [0u8; PEEK_BUFFER_SIZE];
    match conn.try_read(&mut peek_buf) {
        Ok(0) => Err(HealthCheckError::Closed),
        Ok(_) => Err(HealthCheckError::UnexpectedData),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(HealthCheckError::Socket(e)),
    }
}
