//! Error classification for finished sessions
//!
//! Session errors arrive wrapped in `anyhow::Error`; these helpers look
//! through the wrapper to decide how loudly a session's end is logged.

use crate::connection_error::ConnectionError;
use crate::protocol::ProtocolError;
use std::io::ErrorKind;

/// Classify an anyhow error and determine appropriate handling
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Check if error is a client disconnect (broken pipe or connection reset)
    ///
    /// When a client disconnects, we can receive either:
    /// - `BrokenPipe` - writing to a closed socket
    /// - `ConnectionReset` - peer forcibly closed the connection
    /// - a truncated frame, when the client vanished mid-request
    pub fn is_client_disconnect(error: &anyhow::Error) -> bool {
        if let Some(conn_err) = error.downcast_ref::<ConnectionError>() {
            return conn_err.is_client_disconnect();
        }

        if let Some(proto_err) = error.downcast_ref::<ProtocolError>() {
            return match proto_err {
                ProtocolError::UnexpectedEof => true,
                ProtocolError::Io(io_err) => is_disconnect_kind(io_err.kind()),
                _ => false,
            };
        }

        if let Some(io_err) = error.downcast_ref::<std::io::Error>() {
            return is_disconnect_kind(io_err.kind());
        }

        false
    }

    /// Check if the client sent something that is not RESP
    pub fn is_protocol_violation(error: &anyhow::Error) -> bool {
        matches!(
            error.downcast_ref::<ProtocolError>(),
            Some(
                ProtocolError::Invalid(_)
                    | ProtocolError::TooLarge { .. }
                    | ProtocolError::TooDeep { .. }
            )
        )
    }

    /// Log level for a session that ended with `error`
    pub fn log_level(error: &anyhow::Error) -> tracing::Level {
        if Self::is_client_disconnect(error) {
            tracing::Level::DEBUG
        } else if Self::is_protocol_violation(error) {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }
}

fn is_disconnect_kind(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::BrokenPipe | ErrorKind::ConnectionReset)
}
