//! A single framed connection to an upstream
//!
//! Every exchange is bounded by the configured read/write timeouts. Any
//! failure once bytes may have gone out leaves the request/reply stream in
//! an unknown position, so the connection flags itself unhealthy and the
//! pool discards it on return.

use std::slice;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

use super::target::UpstreamTarget;
use crate::connection_error::ConnectionError;
use crate::constants::pool::{
    DEFAULT_DIAL_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT, QUIT_COMMAND,
};
use crate::protocol::{Frame, FrameStream};
use crate::stream::ConnectionStream;

/// Per-connection I/O bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    pub dial: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self {
            dial: DEFAULT_DIAL_TIMEOUT,
            read: DEFAULT_READ_TIMEOUT,
            write: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Live connection to an upstream, owned by the pool or by one caller
#[derive(Debug)]
pub struct UpstreamConnection {
    id: u64,
    stream: FrameStream<ConnectionStream>,
    healthy: bool,
    database_selected: bool,
    last_used: Instant,
    timeouts: ConnectionTimeouts,
}

impl UpstreamConnection {
    /// Dial `target` and select its database, if any
    ///
    /// A connection whose selection fails is dropped here and never reaches
    /// the pool.
    pub async fn connect(
        target: &UpstreamTarget,
        id: u64,
        timeouts: ConnectionTimeouts,
    ) -> Result<Self, ConnectionError> {
        let stream = target.dial(timeouts.dial).await?;
        let mut conn = Self::from_stream(stream, id, timeouts);

        if let Some(database) = target.database() {
            conn.select_database(database)
                .await
                .map_err(|e| match e {
                    ConnectionError::SelectFailed { .. } => e,
                    other => ConnectionError::SelectFailed {
                        target: target.to_string(),
                        database,
                        reason: other.to_string(),
                    },
                })?;
        }

        debug!(conn_id = id, upstream = %target, "Opened upstream connection");
        Ok(conn)
    }

    /// Wrap an already-open transport
    pub fn from_stream(stream: ConnectionStream, id: u64, timeouts: ConnectionTimeouts) -> Self {
        Self {
            id,
            stream: FrameStream::new(stream),
            healthy: true,
            database_selected: false,
            last_used: Instant::now(),
            timeouts,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Whether `SELECT` was issued on this physical connection
    #[must_use]
    pub fn database_selected(&self) -> bool {
        self.database_selected
    }

    #[must_use]
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    /// Issue `SELECT database` and require `+OK`
    pub async fn select_database(&mut self, database: u32) -> Result<(), ConnectionError> {
        let request = Frame::command(["SELECT".to_string(), database.to_string()]);
        match self.round_trip(&request).await? {
            Frame::Simple(ref s) if s == "OK" => {
                self.database_selected = true;
                Ok(())
            }
            other => {
                self.healthy = false;
                let reason = match other {
                    Frame::Error(msg) => msg,
                    unexpected => format!("unexpected reply {unexpected:?}"),
                };
                Err(ConnectionError::SelectFailed {
                    target: format!("connection {}", self.id),
                    database,
                    reason,
                })
            }
        }
    }

    /// Write `frames` back-to-back and flush once
    pub async fn send(&mut self, frames: &[Frame]) -> Result<(), ConnectionError> {
        let stream = &mut self.stream;
        let write = async {
            for frame in frames {
                stream.write_frame(frame).await?;
            }
            stream.flush().await
        };

        match timeout(self.timeouts.write, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.healthy = false;
                Err(ConnectionError::Io(e))
            }
            Err(_) => {
                self.healthy = false;
                Err(ConnectionError::Timeout {
                    operation: "write",
                    timeout: self.timeouts.write,
                })
            }
        }
    }

    /// Read exactly one reply
    pub async fn receive(&mut self) -> Result<Frame, ConnectionError> {
        let result = match timeout(self.timeouts.read, self.stream.read_frame()).await {
            Ok(Ok(Some(frame))) => Ok(frame),
            Ok(Ok(None)) => Err(ConnectionError::UpstreamClosed),
            Ok(Err(e)) => Err(ConnectionError::from(e)),
            Err(_) => Err(ConnectionError::Timeout {
                operation: "read",
                timeout: self.timeouts.read,
            }),
        };

        match result {
            Ok(frame) => {
                self.last_used = Instant::now();
                Ok(frame)
            }
            Err(e) => {
                self.healthy = false;
                Err(e)
            }
        }
    }

    /// Fail if bytes beyond the expected replies were received
    pub fn ensure_drained(&mut self) -> Result<(), ConnectionError> {
        if self.stream.has_buffered_input() {
            self.healthy = false;
            return Err(ConnectionError::Desync);
        }
        Ok(())
    }

    /// Send one request and read its reply
    pub async fn round_trip(&mut self, request: &Frame) -> Result<Frame, ConnectionError> {
        self.send(slice::from_ref(request)).await?;
        let reply = self.receive().await?;
        self.ensure_drained()?;
        Ok(reply)
    }

    /// Best-effort `QUIT` before the connection is dropped
    pub async fn quit(&mut self) {
        let stream = &mut self.stream;
        let write = async {
            stream.write_raw(QUIT_COMMAND).await?;
            stream.flush().await
        };
        match timeout(self.timeouts.write, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(conn_id = self.id, "Failed to send QUIT: {}", e),
            Err(_) => debug!(conn_id = self.id, "Timed out sending QUIT"),
        }
    }

    /// Whether unread bytes sit in the read buffer
    pub(crate) fn has_buffered_input(&self) -> bool {
        self.stream.has_buffered_input()
    }

    /// Non-blocking read on the raw transport, for idle liveness checks
    pub(crate) fn try_read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.get_ref().try_read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    fn pair(timeouts: ConnectionTimeouts) -> (UpstreamConnection, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        (
            UpstreamConnection::from_stream(ConnectionStream::from(a), 7, timeouts),
            b,
        )
    }

    fn short_timeouts() -> ConnectionTimeouts {
        ConnectionTimeouts {
            dial: Duration::from_millis(100),
            read: Duration::from_millis(100),
            write: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (mut conn, mut peer) = pair(short_timeouts());
        let server = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let n = peer.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"*1\r\n$4\r\nPING\r\n");
            peer.write_all(b"+PONG\r\n").await.unwrap();
            peer
        });

        let reply = conn.round_trip(&Frame::command(["PING"])).await.unwrap();
        assert_eq!(reply, Frame::Simple("PONG".into()));
        assert!(conn.is_healthy());
        assert_eq!(conn.id(), 7);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_timeout_marks_unhealthy() {
        let (mut conn, _peer) = pair(short_timeouts());
        let err = conn.round_trip(&Frame::command(["GET", "k"])).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Timeout { operation: "read", .. }));
        assert!(!conn.is_healthy());
    }

    #[tokio::test]
    async fn test_upstream_close_marks_unhealthy() {
        let (mut conn, peer) = pair(short_timeouts());
        drop(peer);
        let err = conn.receive().await.unwrap_err();
        assert!(err.marks_unhealthy());
        assert!(!conn.is_healthy());
    }

    #[tokio::test]
    async fn test_extra_bytes_are_desync() {
        let (mut conn, mut peer) = pair(short_timeouts());
        peer.write_all(b"+OK\r\n+SURPRISE\r\n").await.unwrap();
        let err = conn.round_trip(&Frame::command(["SET", "k", "v"])).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Desync));
        assert!(!conn.is_healthy());
    }

    #[tokio::test]
    async fn test_select_database_ok() {
        let (mut conn, mut peer) = pair(short_timeouts());
        peer.write_all(b"+OK\r\n").await.unwrap();
        conn.select_database(3).await.unwrap();
        assert!(conn.database_selected());

        let mut buf = [0u8; 64];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"*2\r\n$6\r\nSELECT\r\n$1\r\n3\r\n");
    }

    #[tokio::test]
    async fn test_select_database_error_reply() {
        let (mut conn, mut peer) = pair(short_timeouts());
        peer.write_all(b"-ERR DB index is out of range\r\n")
            .await
            .unwrap();
        let err = conn.select_database(99).await.unwrap_err();
        match err {
            ConnectionError::SelectFailed {
                database, reason, ..
            } => {
                assert_eq!(database, 99);
                assert!(reason.contains("out of range"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!conn.database_selected());
    }

    #[tokio::test]
    async fn test_quit_writes_command() {
        let (mut conn, mut peer) = pair(short_timeouts());
        conn.quit().await;
        let mut buf = [0u8; 32];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], QUIT_COMMAND);
    }
}
