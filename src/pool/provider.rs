//! Connection pool provider
//!
//! [`UpstreamPool`] wraps a deadpool managed pool of upstream connections:
//! - bounded size with a bounded checkout wait
//! - health-based recycling of idle connections
//! - explicit checkin that discards unhealthy connections
//! - graceful shutdown sending `QUIT` to idle connections

use deadpool::Runtime;
use deadpool::managed::{self, Object, PoolError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::PoolStatus;
use super::connection::ConnectionTimeouts;
use super::manager::UpstreamManager;
use super::target::UpstreamTarget;
use crate::connection_error::ConnectionError;
use crate::constants::pool::{DEFAULT_CHECKOUT_TIMEOUT, DEFAULT_MIN_SIZE, SHUTDOWN_DRAIN_WAIT};
use crate::metrics::MetricsCollector;
use crate::types::MaxPoolSize;

type Pool = managed::Pool<UpstreamManager>;

/// A checked-out upstream connection
///
/// Dropping it returns it to the pool, where the next checkout re-checks
/// its health. Prefer [`UpstreamPool::checkin`] to state the outcome.
pub type PooledConnection = Object<UpstreamManager>;

/// Bounded pool of connections to one upstream target
#[derive(Debug, Clone)]
pub struct UpstreamPool {
    pool: Pool,
    name: String,
    min_size: usize,
    max_size: usize,
    checkout_timeout: Duration,
    metrics: MetricsCollector,
}

/// Builder for constructing [`UpstreamPool`] instances
///
/// # Examples
///
/// ```no_run
/// use redis_local_proxy::pool::{UpstreamPool, UpstreamTarget};
/// use redis_local_proxy::types::MaxPoolSize;
/// use std::time::Duration;
///
/// let pool = UpstreamPool::builder(UpstreamTarget::tcp("127.0.0.1:6379"))
///     .name("cache")
///     .max_size(MaxPoolSize::try_new(5).unwrap())
///     .checkout_timeout(Duration::from_millis(250))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug)]
pub struct Builder {
    target: UpstreamTarget,
    name: Option<String>,
    min_size: usize,
    max_size: MaxPoolSize,
    checkout_timeout: Duration,
    timeouts: ConnectionTimeouts,
    metrics: Option<MetricsCollector>,
}

impl Builder {
    /// Create a new builder for `target`
    #[must_use]
    pub fn new(target: UpstreamTarget) -> Self {
        Self {
            target,
            name: None,
            min_size: DEFAULT_MIN_SIZE,
            max_size: MaxPoolSize::default(),
            checkout_timeout: DEFAULT_CHECKOUT_TIMEOUT,
            timeouts: ConnectionTimeouts::default(),
            metrics: None,
        }
    }

    /// Set a friendly name for logging (defaults to the target)
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Connections opened by [`UpstreamPool::prewarm`]
    #[must_use]
    pub fn min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    #[must_use]
    pub fn max_size(mut self, max_size: MaxPoolSize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Bound on waiting for a connection when the pool is saturated
    #[must_use]
    pub fn checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    /// Dial, read and write bounds for every connection
    #[must_use]
    pub fn timeouts(mut self, timeouts: ConnectionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Share a metrics collector (a private one is created otherwise)
    #[must_use]
    pub fn metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the pool; no connection is opened until the first checkout
    ///
    /// # Errors
    ///
    /// Returns deadpool's build error if the pool cannot be constructed
    pub fn build(self) -> Result<UpstreamPool, managed::BuildError> {
        let name = self.name.unwrap_or_else(|| self.target.to_string());
        let metrics = self.metrics.unwrap_or_default();
        let max_size = self.max_size.get();

        let manager = UpstreamManager::new(self.target, name.clone(), self.timeouts, metrics.clone());
        let pool = Pool::builder(manager)
            .max_size(max_size)
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(self.checkout_timeout))
            .build()?;

        debug!(pool = %name, max_size, "Created upstream pool");

        Ok(UpstreamPool {
            pool,
            name,
            min_size: self.min_size.min(max_size),
            max_size,
            checkout_timeout: self.checkout_timeout,
            metrics,
        })
    }
}

impl UpstreamPool {
    /// Create a builder for a pool targeting `target`
    #[must_use]
    pub fn builder(target: UpstreamTarget) -> Builder {
        Builder::new(target)
    }

    /// Check out a connection, waiting at most the configured checkout timeout
    pub async fn checkout(&self) -> Result<PooledConnection, ConnectionError> {
        let mut timeouts = managed::Timeouts::new();
        timeouts.wait = Some(self.checkout_timeout);
        self.checkout_with(timeouts).await
    }

    /// Check out a connection with caller-supplied bounds
    pub async fn checkout_with(
        &self,
        timeouts: managed::Timeouts,
    ) -> Result<PooledConnection, ConnectionError> {
        let started = Instant::now();
        match self.pool.timeout_get(&timeouts).await {
            Ok(conn) => {
                self.metrics.checkout_completed(started.elapsed());
                Ok(conn)
            }
            Err(PoolError::Timeout(_)) => {
                self.metrics.pool_exhausted();
                Err(ConnectionError::PoolExhausted {
                    target: self.name.clone(),
                    max_size: self.max_size,
                    waited: started.elapsed(),
                })
            }
            Err(PoolError::Closed) => Err(ConnectionError::PoolClosed {
                target: self.name.clone(),
            }),
            Err(PoolError::Backend(e)) => Err(e),
            Err(other) => Err(ConnectionError::Io(std::io::Error::other(other.to_string()))),
        }
    }

    /// Return a connection, discarding it unless it is healthy
    ///
    /// A discarded connection is detached from the pool and its transport
    /// dropped, freeing its slot for a fresh dial.
    pub fn checkin(&self, mut conn: PooledConnection, healthy: bool) {
        if !healthy {
            conn.mark_unhealthy();
        }
        if conn.is_healthy() {
            drop(conn);
        } else {
            debug!(pool = %self.name, conn_id = conn.id(), "Discarding unhealthy connection");
            drop(Object::take(conn));
        }
    }

    /// Close the pool
    ///
    /// Pending and future checkouts fail with `PoolClosed`, idle connections
    /// are dropped and checked-out ones are dropped when returned.
    pub fn close(&self) {
        self.pool.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Send `QUIT` to idle connections, then close the pool
    pub async fn graceful_shutdown(&self) {
        let status = self.pool.status();
        info!(
            pool = %self.name,
            idle = status.available,
            "Shutting down upstream pool"
        );

        // Only take what is idle right now; never dial during shutdown
        let mut timeouts = managed::Timeouts::new();
        timeouts.wait = Some(SHUTDOWN_DRAIN_WAIT);
        timeouts.create = Some(SHUTDOWN_DRAIN_WAIT);

        for _ in 0..status.available {
            match self.pool.timeout_get(&timeouts).await {
                Ok(conn_obj) => {
                    let mut conn = Object::take(conn_obj);
                    conn.quit().await;
                }
                Err(_) => break,
            }
        }

        self.pool.close();
        debug!(pool = %self.name, "Upstream pool closed");
    }

    /// Open `min_size` connections concurrently
    ///
    /// Returns the number opened; failures are logged and never fatal.
    pub async fn prewarm(&self) -> usize {
        super::prewarming::prewarm_pool(self).await
    }

    /// Snapshot of the pool's occupancy
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: self.max_size,
            live: status.size,
            idle: status.available,
            waiting: status.waiting,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    #[must_use]
    pub fn target(&self) -> &UpstreamTarget {
        self.pool.manager().target()
    }

    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = Builder::new(UpstreamTarget::tcp("127.0.0.1:6379"));
        assert_eq!(builder.max_size.get(), 10);
        assert_eq!(builder.min_size, DEFAULT_MIN_SIZE);
        assert_eq!(builder.checkout_timeout, DEFAULT_CHECKOUT_TIMEOUT);
        assert!(builder.name.is_none());
    }

    #[tokio::test]
    async fn test_builder_default_name_from_target() {
        let pool = Builder::new(UpstreamTarget::tcp("10.1.2.3:6379"))
            .build()
            .unwrap();
        assert_eq!(pool.name(), "10.1.2.3:6379");
    }

    #[tokio::test]
    async fn test_builder_chaining() {
        let pool = UpstreamPool::builder(UpstreamTarget::tcp("localhost:6379"))
            .name("cache")
            .min_size(3)
            .max_size(MaxPoolSize::try_new(2).unwrap())
            .checkout_timeout(Duration::from_millis(50))
            .build()
            .unwrap();

        assert_eq!(pool.name(), "cache");
        assert_eq!(pool.max_size(), 2);
        // min_size is clamped to max_size
        assert_eq!(pool.min_size(), 2);
        assert_eq!(pool.target().address(), "localhost:6379");
    }

    #[tokio::test]
    async fn test_fresh_pool_status_is_empty() {
        let pool = UpstreamPool::builder(UpstreamTarget::tcp("localhost:6379"))
            .max_size(MaxPoolSize::try_new(15).unwrap())
            .build()
            .unwrap();

        let status = pool.status();
        assert_eq!(status.max_size, 15);
        assert_eq!(status.live, 0);
        assert_eq!(status.idle, 0);
    }

    #[tokio::test]
    async fn test_checkout_after_close_fails_with_pool_closed() {
        let pool = UpstreamPool::builder(UpstreamTarget::tcp("127.0.0.1:1"))
            .build()
            .unwrap();
        pool.close();
        pool.close();
        assert!(pool.is_closed());

        let err = pool.checkout().await.unwrap_err();
        assert!(matches!(err, ConnectionError::PoolClosed { .. }));
    }
}
