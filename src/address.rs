//! Local address derivation
//!
//! Every proxy instance listens on an address derived mechanically from the
//! upstream it fronts. The same derivation is used when rewriting cluster
//! topology replies, so a client told to "move" to another node ends up on
//! the local socket of the proxy fronting that node.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Derive the local socket path for an upstream address
///
/// The first `:` of `upstream` becomes `-`, a `-{db}` suffix is appended
/// when a database index is given, and the result is wrapped in `prefix`
/// and `suffix`. No other character is touched and nothing is validated.
///
/// # Examples
///
/// ```
/// use redis_local_proxy::address::local_socket_path;
///
/// assert_eq!(
///     local_socket_path("with.host:colon", None, "prefix-", ".suffix"),
///     "prefix-with.host-colon.suffix"
/// );
/// assert_eq!(
///     local_socket_path("with.host:db", Some(1), "prefix-", ".suffix"),
///     "prefix-with.host-db-1.suffix"
/// );
/// ```
#[must_use]
pub fn local_socket_path(upstream: &str, db: Option<u32>, prefix: &str, suffix: &str) -> String {
    let translated = upstream.replacen(':', "-", 1);
    match db {
        Some(db) => format!("{prefix}{translated}-{db}{suffix}"),
        None => format!("{prefix}{translated}{suffix}"),
    }
}

/// Address a proxy instance listens on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocalAddress {
    /// Unix domain socket path
    Unix(PathBuf),
    /// TCP socket address
    Tcp(SocketAddr),
}

impl LocalAddress {
    /// Host and port advertised in rewritten topology replies
    ///
    /// A unix socket has no port; its path is advertised as the host with
    /// port 0.
    #[must_use]
    pub fn advertised(&self) -> (String, u16) {
        match self {
            Self::Unix(path) => (path.to_string_lossy().into_owned(), 0),
            Self::Tcp(addr) => (addr.ip().to_string(), addr.port()),
        }
    }

    /// `host:port` form used inside `MOVED`/`ASK` errors and node lists
    #[must_use]
    pub fn advertised_host_port(&self) -> String {
        let (host, port) = self.advertised();
        format!("{host}:{port}")
    }

    /// Socket path, if this is a unix address
    #[must_use]
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Unix(path) => Some(path),
            Self::Tcp(_) => None,
        }
    }
}

impl fmt::Display for LocalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}
