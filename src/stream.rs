//! Stream abstraction over TCP and unix domain sockets
//!
//! Both the client side (listener) and the upstream side (pool) may use
//! either transport, so everything past the accept/dial step works on
//! [`ConnectionStream`].

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UnixStream};

/// Unified stream type for TCP and unix socket connections
///
/// An enum rather than a trait object keeps reads and writes free of
/// dynamic dispatch and lets callers reach the concrete socket when needed.
#[derive(Debug)]
pub enum ConnectionStream {
    /// TCP connection
    Tcp(TcpStream),
    /// Unix domain socket connection
    Unix(UnixStream),
}

impl ConnectionStream {
    /// Get a reference to the underlying TCP stream (if TCP)
    pub fn as_tcp_stream(&self) -> Option<&TcpStream> {
        match self {
            Self::Tcp(tcp) => Some(tcp),
            Self::Unix(_) => None,
        }
    }

    /// Returns true if this is a unix socket connection
    pub fn is_unix(&self) -> bool {
        matches!(self, Self::Unix(_))
    }

    /// Non-blocking read used for liveness checks on idle connections
    ///
    /// `Err(WouldBlock)` means no data is pending, which is the expected
    /// state for an idle connection.
    pub fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(tcp) => tcp.try_read(buf),
            Self::Unix(unix) => unix.try_read(buf),
        }
    }
}

impl From<TcpStream> for ConnectionStream {
    fn from(stream: TcpStream) -> Self {
        Self::Tcp(stream)
    }
}

impl From<UnixStream> for ConnectionStream {
    fn from(stream: UnixStream) -> Self {
        Self::Unix(stream)
    }
}

impl AsyncRead for ConnectionStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnectionStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Self::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_unix_stream_read_write() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut a = ConnectionStream::from(a);
        let mut b = ConnectionStream::from(b);
        assert!(a.is_unix());
        assert!(a.as_tcp_stream().is_none());

        a.write_all(b"+PONG\r\n").await.unwrap();
        let mut buf = [0u8; 7];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_try_read_would_block_when_idle() {
        let (a, _b) = UnixStream::pair().unwrap();
        let a = ConnectionStream::from(a);
        let mut buf = [0u8; 1];
        let err = a.try_read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[tokio::test]
    async fn test_try_read_sees_eof_after_peer_close() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        let a = ConnectionStream::from(a);
        a.get_readable().await;
        let mut buf = [0u8; 1];
        assert_eq!(a.try_read(&mut buf).unwrap(), 0);
    }

    impl ConnectionStream {
        async fn get_readable(&self) {
            match self {
                Self::Tcp(tcp) => tcp.readable().await.unwrap(),
                Self::Unix(unix) => unix.readable().await.unwrap(),
            }
        }
    }
}
