//! Builder for constructing [`Proxy`] instances

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use super::error::ProxyError;
use super::{Proxy, ProxyInner, ProxyState};
use crate::constants::pool::{DEFAULT_CHECKOUT_TIMEOUT, DEFAULT_MIN_SIZE};
use crate::metrics::MetricsCollector;
use crate::network::BindAddress;
use crate::pool::{ConnectionTimeouts, UpstreamPool, UpstreamTarget};
use crate::session::{ReplyHook, SessionContext};
use crate::types::MaxPoolSize;

/// Builder for a single proxy: one listener in front of one upstream pool
///
/// # Examples
///
/// ```no_run
/// use redis_local_proxy::network::BindAddress;
/// use redis_local_proxy::pool::UpstreamTarget;
/// use redis_local_proxy::proxy::Proxy;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let proxy = Proxy::builder(
///     UpstreamTarget::tcp("127.0.0.1:6379"),
///     BindAddress::Unix("/var/tmp/redisbetween-127.0.0.1-6379.sock".into()),
/// )
/// .label("cache")
/// .build()?;
/// proxy.run().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ProxyBuilder {
    target: UpstreamTarget,
    bind_address: BindAddress,
    label: Option<String>,
    unlink: bool,
    min_size: usize,
    max_size: MaxPoolSize,
    checkout_timeout: Duration,
    timeouts: ConnectionTimeouts,
    hook: Option<Arc<dyn ReplyHook>>,
    metrics: Option<MetricsCollector>,
}

impl ProxyBuilder {
    #[must_use]
    pub fn new(target: UpstreamTarget, bind_address: BindAddress) -> Self {
        Self {
            target,
            bind_address,
            label: None,
            unlink: true,
            min_size: DEFAULT_MIN_SIZE,
            max_size: MaxPoolSize::default(),
            checkout_timeout: DEFAULT_CHECKOUT_TIMEOUT,
            timeouts: ConnectionTimeouts::default(),
            hook: None,
            metrics: None,
        }
    }

    /// Name used in logs and metrics (defaults to the upstream target)
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Remove a stale unix socket file before binding
    #[must_use]
    pub fn unlink(mut self, unlink: bool) -> Self {
        self.unlink = unlink;
        self
    }

    #[must_use]
    pub fn min_pool_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    #[must_use]
    pub fn max_pool_size(mut self, max_size: MaxPoolSize) -> Self {
        self.max_size = max_size;
        self
    }

    #[must_use]
    pub fn checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    #[must_use]
    pub fn timeouts(mut self, timeouts: ConnectionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Post-process every upstream reply (cluster topology rewriting)
    #[must_use]
    pub fn reply_hook(mut self, hook: Arc<dyn ReplyHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the proxy in the `Created` state; nothing is bound or dialed yet
    ///
    /// # Errors
    /// Returns [`ProxyError::PoolBuild`] if the pool cannot be constructed
    pub fn build(self) -> Result<Proxy, ProxyError> {
        let label = self.label.unwrap_or_else(|| self.target.to_string());
        let metrics = self.metrics.unwrap_or_default();
        let database = self.target.database();

        let pool = UpstreamPool::builder(self.target)
            .name(label.clone())
            .min_size(self.min_size)
            .max_size(self.max_size)
            .checkout_timeout(self.checkout_timeout)
            .timeouts(self.timeouts)
            .metrics(metrics.clone())
            .build()?;

        debug!(proxy = %label, listen = %self.bind_address, "Built proxy");

        let (shutdown_tx, _) = watch::channel(false);
        let (stopped_tx, _) = watch::channel(false);

        Ok(Proxy {
            inner: Arc::new(ProxyInner {
                session: SessionContext {
                    label: Arc::from(label),
                    pool,
                    hook: self.hook,
                    database,
                    metrics,
                },
                bind_address: self.bind_address,
                unlink: self.unlink,
                state: Mutex::new(ProxyState::Created),
                listener: tokio::sync::Mutex::new(None),
                local_address: Mutex::new(None),
                shutdown_tx,
                stopped_tx,
            }),
        })
    }
}
