//! Constants used throughout the proxy
//!
//! Centralizes magic numbers, reserved keys and default values so the
//! codec, pool and session code share one source of truth.

use std::time::Duration;

/// Reserved pipelining signal keys
///
/// Clients delimit an atomic batch by issuing an ordinary request (typically
/// `GET`) whose argument is one of these keys. The requests still reach the
/// upstream, which normally answers with a null reply.
pub mod pipeline {
    /// Marks the start of a pipelined batch
    pub const SIGNAL_START_KEY: &str = "🔜";

    /// Marks the end of a pipelined batch
    pub const SIGNAL_END_KEY: &str = "🔚";
}

/// Buffer size constants for the RESP codec
pub mod buffer {
    /// Initial capacity of the per-stream read buffer (16KB)
    pub const READ_INITIAL: usize = 16 * 1024;

    /// Capacity of the buffered writer wrapping each stream (16KB)
    pub const WRITE_CAPACITY: usize = 16 * 1024;

    /// Largest bulk string accepted from either side (512MB, matches the
    /// store's own `proto-max-bulk-len` default)
    pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

    /// Largest inline command line accepted from a client (64KB)
    pub const MAX_INLINE_LEN: usize = 64 * 1024;

    /// Largest number of elements accepted in a single array frame
    pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

    /// Deepest array nesting accepted in a reply; requests are always flat
    pub const MAX_NESTING_DEPTH: usize = 128;
}

/// Socket tuning for upstream TCP connections
pub mod socket {
    use super::Duration;

    /// Idle time before the first keepalive probe
    pub const KEEPALIVE_TIME: Duration = Duration::from_secs(60);

    /// Interval between keepalive probes
    pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

    /// Buffer size for the non-blocking liveness peek on idle connections
    pub const PEEK_BUFFER_SIZE: usize = 1;
}

/// Connection pool constants
pub mod pool {
    use super::Duration;

    /// Default maximum connections per upstream pool
    pub const DEFAULT_MAX_SIZE: usize = 10;

    /// Default number of connections opened at startup
    pub const DEFAULT_MIN_SIZE: usize = 1;

    /// Default bound on waiting for a pooled connection
    pub const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(1);

    /// Default bound on dialing (and selecting on) a new upstream connection
    pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(1);

    /// Default bound on every upstream read
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

    /// Default bound on every upstream write
    pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

    /// Wait used when draining idle connections during shutdown
    pub const SHUTDOWN_DRAIN_WAIT: Duration = Duration::from_millis(1);

    /// Bytes sent to idle connections before the pool closes
    pub const QUIT_COMMAND: &[u8] = b"*1\r\n$4\r\nQUIT\r\n";
}

/// Listener naming defaults
pub mod listener {
    /// Default prefix of derived unix socket paths
    pub const DEFAULT_SOCKET_PREFIX: &str = "/var/tmp/redisbetween-";

    /// Default suffix of derived unix socket paths
    pub const DEFAULT_SOCKET_SUFFIX: &str = ".sock";

    /// Host used by TCP listeners of discovered cluster nodes
    pub const DEFAULT_CLUSTER_LISTEN_HOST: &str = "127.0.0.1";

    /// Pause after a failed accept (e.g. out of file descriptors)
    pub const ACCEPT_ERROR_BACKOFF: std::time::Duration = std::time::Duration::from_millis(100);
}

/// Prefix of every error reply generated by the proxy itself
pub const ERROR_PREFIX: &str = "ERR proxy:";

/// Default interval for periodic stats logging
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(60);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_keys_are_distinct() {
        assert_ne!(pipeline::SIGNAL_START_KEY, pipeline::SIGNAL_END_KEY);
    }

    #[test]
    fn test_quit_command_is_resp_array() {
        assert!(pool::QUIT_COMMAND.starts_with(b"*1\r\n"));
        assert!(pool::QUIT_COMMAND.ends_with(b"QUIT\r\n"));
    }

    #[test]
    fn test_pool_defaults_are_consistent() {
        assert!(pool::DEFAULT_MIN_SIZE <= pool::DEFAULT_MAX_SIZE);
    }
}
