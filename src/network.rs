//! Listener binding and upstream dialing
//!
//! Wraps tokio's TCP and unix listeners behind one type, handles stale
//! unix socket files, and applies socket tuning to upstream connections.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tracing::debug;

use crate::address::LocalAddress;
use crate::constants::socket::{KEEPALIVE_INTERVAL, KEEPALIVE_TIME};
use crate::stream::ConnectionStream;

/// Where a proxy should listen, before binding
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindAddress {
    /// Unix domain socket path
    Unix(PathBuf),
    /// TCP `host:port` (port 0 binds an ephemeral port)
    Tcp(String),
}

impl std::fmt::Display for BindAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

/// Family of the client-facing listeners
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Unix sockets named after the upstream
    #[default]
    Unix,
    /// TCP listeners
    Tcp,
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unix => write!(f, "unix"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// A bound client-facing listener
///
/// A unix listener removes its socket file when dropped.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

impl Listener {
    /// Bind the listener, removing a stale unix socket file first if `unlink`
    pub async fn bind(address: &BindAddress, unlink: bool) -> io::Result<Self> {
        match address {
            BindAddress::Tcp(addr) => Ok(Self::Tcp(TcpListener::bind(addr.as_str()).await?)),
            BindAddress::Unix(path) => {
                if unlink {
                    remove_stale_socket(path).await?;
                }
                let listener = UnixListener::bind(path)?;
                Ok(Self::Unix {
                    listener,
                    path: path.clone(),
                })
            }
        }
    }

    /// Accept the next client, returning the stream and a printable peer
    pub async fn accept(&self) -> io::Result<(ConnectionStream, String)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY on client socket: {}", e);
                }
                Ok((ConnectionStream::Tcp(stream), peer.to_string()))
            }
            Self::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                Ok((ConnectionStream::Unix(stream), path.display().to_string()))
            }
        }
    }

    /// The address actually bound (resolves ephemeral TCP ports)
    pub fn local_address(&self) -> io::Result<LocalAddress> {
        match self {
            Self::Tcp(listener) => Ok(LocalAddress::Tcp(listener.local_addr()?)),
            Self::Unix { path, .. } => Ok(LocalAddress::Unix(path.clone())),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Self::Unix { path, .. } = self {
            if let Err(e) = std::fs::remove_file(&*path) {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!("Failed to remove socket file {}: {}", path.display(), e);
                }
            }
        }
    }
}

async fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed stale socket file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Dial an upstream TCP address and tune the socket for pooled reuse
pub async fn dial_tcp(address: &str, timeout: Duration) -> io::Result<ConnectionStream> {
    let addrs: Vec<SocketAddr> = tokio::time::timeout(timeout, tokio::net::lookup_host(address))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "dns lookup timed out"))??
        .collect();

    let mut last_error = None;
    for addr in addrs {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                tune_upstream_socket(&stream);
                return Ok(ConnectionStream::Tcp(stream));
            }
            Ok(Err(e)) => last_error = Some(e),
            Err(_) => {
                last_error = Some(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {addr} timed out"),
                ))
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses found for {address}"),
        )
    }))
}

/// Dial an upstream unix socket
pub async fn dial_unix(path: &str, timeout: Duration) -> io::Result<ConnectionStream> {
    tokio::time::timeout(timeout, UnixStream::connect(path))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "unix connect timed out"))?
        .map(ConnectionStream::Unix)
}

/// Keepalive and no-delay for long-lived upstream connections
///
/// Failures are logged and ignored; an untuned socket still works.
fn tune_upstream_socket(stream: &TcpStream) {
    use socket2::{SockRef, TcpKeepalive};

    let sock_ref = SockRef::from(stream);
    if let Err(e) = sock_ref.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY on upstream socket: {}", e);
    }

    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_TIME)
        .with_interval(KEEPALIVE_INTERVAL);
    if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
        debug!("Failed to set TCP keepalive on upstream socket: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_unix_unlinks_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, b"").unwrap();

        let listener = Listener::bind(&BindAddress::Unix(path.clone()), true)
            .await
            .unwrap();
        assert_eq!(
            listener.local_address().unwrap(),
            LocalAddress::Unix(path.clone())
        );
        drop(listener);
        assert!(!path.exists(), "socket file removed on drop");
    }

    #[tokio::test]
    async fn test_bind_unix_without_unlink_fails_on_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taken.sock");
        std::fs::write(&path, b"").unwrap();

        let err = Listener::bind(&BindAddress::Unix(path), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[tokio::test]
    async fn test_bind_tcp_ephemeral_and_accept() {
        let listener = Listener::bind(&BindAddress::Tcp("127.0.0.1:0".into()), false)
            .await
            .unwrap();
        let LocalAddress::Tcp(addr) = listener.local_address().unwrap() else {
            panic!("expected tcp address");
        };
        assert_ne!(addr.port(), 0);

        let dial = tokio::spawn(async move { dial_tcp(&addr.to_string(), Duration::from_secs(1)).await });
        let (stream, peer) = listener.accept().await.unwrap();
        assert!(stream.as_tcp_stream().is_some());
        assert!(peer.starts_with("127.0.0.1:"));
        assert!(dial.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_dial_unix_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.sock");
        let result = dial_unix(path.to_str().unwrap(), Duration::from_millis(200)).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_bind_address_display() {
        assert_eq!(
            BindAddress::Unix(PathBuf::from("/tmp/x.sock")).to_string(),
            "unix:/tmp/x.sock"
        );
        assert_eq!(
            BindAddress::Tcp("127.0.0.1:7000".into()).to_string(),
            "tcp:127.0.0.1:7000"
        );
    }
}
