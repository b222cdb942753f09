//! deadpool manager for upstream connections

use deadpool::managed;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::connection::{ConnectionTimeouts, UpstreamConnection};
use super::health_check::check_idle;
use super::target::UpstreamTarget;
use crate::connection_error::ConnectionError;
use crate::metrics::MetricsCollector;

/// Creates and recycles [`UpstreamConnection`]s for one target
#[derive(Debug)]
pub struct UpstreamManager {
    target: UpstreamTarget,
    name: String,
    timeouts: ConnectionTimeouts,
    next_id: AtomicU64,
    metrics: MetricsCollector,
}

impl UpstreamManager {
    pub fn new(
        target: UpstreamTarget,
        name: String,
        timeouts: ConnectionTimeouts,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            target,
            name,
            timeouts,
            next_id: AtomicU64::new(1),
            metrics,
        }
    }

    #[must_use]
    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn timeouts(&self) -> ConnectionTimeouts {
        self.timeouts
    }
}

impl managed::Manager for UpstreamManager {
    type Type = UpstreamConnection;
    type Error = ConnectionError;

    async fn create(&self) -> Result<UpstreamConnection, ConnectionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(pool = %self.name, conn_id = id, "Creating upstream connection");

        match UpstreamConnection::connect(&self.target, id, self.timeouts).await {
            Ok(conn) => {
                self.metrics.upstream_connection_opened();
                Ok(conn)
            }
            Err(e) => {
                self.metrics.dial_failed();
                warn!(pool = %self.name, conn_id = id, error = %e, "Failed to open upstream connection");
                Err(e)
            }
        }
    }

    async fn recycle(
        &self,
        conn: &mut UpstreamConnection,
        _: &managed::Metrics,
    ) -> managed::RecycleResult<ConnectionError> {
        check_idle(conn).map_err(|e| {
            debug!(pool = %self.name, conn_id = conn.id(), reason = %e, "Discarding idle connection");
            e.into()
        })
    }

    fn detach(&self, conn: &mut UpstreamConnection) {
        debug!(pool = %self.name, conn_id = conn.id(), "Connection detached from pool");
    }
}
