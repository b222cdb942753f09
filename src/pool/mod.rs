//! Upstream connection pooling
//!
//! One bounded pool per upstream target, built on deadpool's managed pool.
//! Connections are dialed lazily (or prewarmed), checked for liveness on
//! every reuse, and discarded as soon as anything goes wrong mid-protocol.

mod connection;
mod health_check;
mod manager;
mod prewarming;
mod provider;
mod target;

pub use connection::{ConnectionTimeouts, UpstreamConnection};
pub use health_check::{HealthCheckError, check_idle};
pub use manager::UpstreamManager;
pub use provider::{Builder, PooledConnection, UpstreamPool};
pub use target::{Family, UpstreamTarget};

use std::fmt;

/// Occupancy of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    /// Configured upper bound on live connections
    pub max_size: usize,
    /// Live connections, idle or checked out
    pub live: usize,
    /// Idle connections ready for checkout
    pub idle: usize,
    /// Tasks waiting for a connection
    pub waiting: usize,
}

impl PoolStatus {
    /// Connections currently checked out
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.live.saturating_sub(self.idle)
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "live={}/{} idle={} in_use={} waiting={}",
            self.live,
            self.max_size,
            self.idle,
            self.in_use(),
            self.waiting
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_status_in_use() {
        let status = PoolStatus {
            max_size: 10,
            live: 4,
            idle: 1,
            waiting: 0,
        };
        assert_eq!(status.in_use(), 3);
        assert_eq!(status.to_string(), "live=4/10 idle=1 in_use=3 waiting=0");
    }
}
