//! Proxy supervision
//!
//! [`ProxySupervisor`] turns a validated [`Config`] into running proxies:
//! one per standalone upstream and one per node of every clustered
//! upstream. Every listener is bound before any proxy starts serving, so a
//! bind failure aborts startup cleanly.

use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::address::LocalAddress;
use crate::cluster::{NodeMap, NodeNaming, TopologyRewriter, discover_nodes};
use crate::config::{Config, UpstreamConfig};
use crate::metrics::MetricsCollector;
use crate::network::BindAddress;
use crate::pool::{Family, UpstreamTarget};
use crate::proxy::{Proxy, ProxyError, ProxyState};
use crate::session::{ReplyHook, shutdown_requested};

/// Owns every proxy of the process
#[derive(Debug, Clone)]
pub struct ProxySupervisor {
    inner: Arc<SupervisorInner>,
}

#[derive(Debug)]
struct SupervisorInner {
    config: Config,
    metrics: MetricsCollector,
    proxies: Mutex<Vec<Proxy>>,
    runners: Mutex<Vec<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

/// A clustered upstream while its node proxies are being started
struct ClusterPlan {
    upstream: UpstreamConfig,
    nodes: NodeMap,
    hook: Arc<TopologyRewriter>,
    unknown_rx: mpsc::UnboundedReceiver<String>,
}

impl ProxySupervisor {
    /// Create a supervisor; the configuration should already be validated
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_metrics(config, MetricsCollector::new())
    }

    #[must_use]
    pub fn with_metrics(config: Config, metrics: MetricsCollector) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                metrics,
                proxies: Mutex::new(Vec::new()),
                runners: Mutex::new(Vec::new()),
                background: Mutex::new(Vec::new()),
                shutdown_tx,
            }),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.inner.metrics
    }

    /// Every proxy started so far, in start order
    #[must_use]
    pub fn proxies(&self) -> Vec<Proxy> {
        self.inner
            .proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Find a proxy by label
    #[must_use]
    pub fn proxy(&self, label: &str) -> Option<Proxy> {
        self.proxies().into_iter().find(|p| p.label() == label)
    }

    /// Build and bind every proxy, then start serving
    ///
    /// Cluster seeds are asked for their nodes first. Any bind or discovery
    /// failure stops the proxies bound so far and is returned.
    ///
    /// # Errors
    /// [`ProxyError::Bind`], [`ProxyError::Discovery`],
    /// [`ProxyError::PoolBuild`] or [`ProxyError::Config`]
    pub async fn start(&self) -> Result<(), ProxyError> {
        match self.bind_all().await {
            Ok(clusters) => {
                for proxy in self.proxies() {
                    self.spawn_runner(proxy);
                }
                for cluster in clusters {
                    self.spawn_node_watcher(cluster);
                }
                self.spawn_stats_logger();
                info!(proxies = self.proxies().len(), "All proxies started");
                Ok(())
            }
            Err(e) => {
                self.shutdown().await;
                Err(e)
            }
        }
    }

    async fn bind_all(&self) -> Result<Vec<ClusterPlan>, ProxyError> {
        let config = &self.inner.config;
        let mut clusters = Vec::new();

        for upstream in &config.upstreams {
            if upstream.cluster {
                clusters.push(self.bind_cluster(upstream).await?);
                continue;
            }

            let bind_address = config.bind_address(upstream).ok_or_else(|| {
                ProxyError::Config(format!(
                    "upstream '{}' has no listen address",
                    upstream.display_label()
                ))
            })?;
            let proxy = self.build_proxy(
                upstream,
                upstream.display_label().to_string(),
                upstream.target(),
                bind_address,
                None,
            )?;
            self.register(proxy.clone());
            proxy.bind().await?;
        }

        Ok(clusters)
    }

    async fn bind_cluster(&self, upstream: &UpstreamConfig) -> Result<ClusterPlan, ProxyError> {
        let config = &self.inner.config;
        let seed = upstream.target().with_database(None);
        let discovered = discover_nodes(&seed, upstream.timeouts()).await?;

        let nodes: NodeMap = Arc::new(DashMap::new());
        let (unknown_tx, unknown_rx) = mpsc::unbounded_channel();
        let hook = Arc::new(TopologyRewriter::new(
            Arc::clone(&nodes),
            unknown_tx,
            NodeNaming {
                network: config.network,
                prefix: config.local_socket_prefix.clone(),
                suffix: config.local_socket_suffix.clone(),
            },
            self.inner.metrics.clone(),
        ));

        let seed_bind = config
            .bind_address(upstream)
            .unwrap_or_else(|| config.node_bind_address(&upstream.address));
        let seed_proxy = self.build_proxy(
            upstream,
            upstream.display_label().to_string(),
            seed,
            seed_bind,
            Some(hook.clone()),
        )?;
        self.register(seed_proxy.clone());
        let local = seed_proxy.bind().await?;
        nodes.insert(upstream.address.clone(), local);

        for node in discovered {
            if nodes.contains_key(&node) {
                continue;
            }
            let (_, local) = self.bind_node(upstream, &hook, &node).await?;
            nodes.insert(node, local);
        }

        info!(
            cluster = %upstream.display_label(),
            nodes = nodes.len(),
            "Cluster proxies bound"
        );
        Ok(ClusterPlan {
            upstream: upstream.clone(),
            nodes,
            hook,
            unknown_rx,
        })
    }

    async fn bind_node(
        &self,
        upstream: &UpstreamConfig,
        hook: &Arc<TopologyRewriter>,
        node: &str,
    ) -> Result<(Proxy, LocalAddress), ProxyError> {
        let proxy = self.build_proxy(
            upstream,
            format!("{}[{node}]", upstream.display_label()),
            UpstreamTarget::new(node, Family::Tcp, None),
            self.inner.config.node_bind_address(node),
            Some(hook.clone()),
        )?;
        self.register(proxy.clone());
        let local = proxy.bind().await?;
        Ok((proxy, local))
    }

    fn build_proxy(
        &self,
        upstream: &UpstreamConfig,
        label: String,
        target: UpstreamTarget,
        bind_address: BindAddress,
        hook: Option<Arc<TopologyRewriter>>,
    ) -> Result<Proxy, ProxyError> {
        let builder = Proxy::builder(target, bind_address)
            .label(label)
            .unlink(self.inner.config.unlink)
            .min_pool_size(upstream.min_pool_size)
            .max_pool_size(upstream.max_pool_size)
            .checkout_timeout(upstream.checkout_timeout)
            .timeouts(upstream.timeouts())
            .metrics(self.inner.metrics.clone());
        let builder = match hook {
            Some(hook) => builder.reply_hook(hook as Arc<dyn ReplyHook>),
            None => builder,
        };
        builder.build()
    }

    fn register(&self, proxy: Proxy) {
        self.inner
            .proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(proxy);
    }

    fn spawn_runner(&self, proxy: Proxy) {
        let handle = tokio::spawn(async move {
            if let Err(e) = proxy.run().await {
                warn!(proxy = %proxy.label(), error = %e, "Proxy stopped with an error");
            }
        });
        self.inner
            .runners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    fn spawn_background(&self, handle: JoinHandle<()>) {
        self.inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Start proxies for nodes that topology replies reveal later on
    fn spawn_node_watcher(&self, mut cluster: ClusterPlan) {
        let supervisor = self.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                let node = tokio::select! {
                    biased;
                    () = shutdown_requested(&mut shutdown_rx) => break,
                    node = cluster.unknown_rx.recv() => match node {
                        Some(node) => node,
                        None => break,
                    },
                };

                if supervisor.knows_node(&cluster.nodes, &node) {
                    continue;
                }
                info!(cluster = %cluster.upstream.display_label(), node = %node, "Starting proxy for new cluster node");

                match supervisor.bind_node(&cluster.upstream, &cluster.hook, &node).await {
                    Ok((proxy, local)) => {
                        cluster.nodes.insert(node.clone(), local);
                        supervisor.spawn_runner(proxy);
                    }
                    Err(e) => warn!(node = %node, error = %e, "Failed to start proxy for cluster node"),
                }
            }
        });
        self.spawn_background(handle);
    }

    /// A node counts as known once a proxy for it is registered
    fn knows_node(&self, nodes: &NodeMap, node: &str) -> bool {
        if nodes.contains_key(node) {
            return true;
        }
        self.proxies()
            .iter()
            .any(|p| p.pool().target().address() == node && p.state() != ProxyState::Stopped)
    }

    fn spawn_stats_logger(&self) {
        let interval = self.inner.config.stats_interval;
        if interval.is_zero() {
            return;
        }

        let supervisor = self.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    () = shutdown_requested(&mut shutdown_rx) => break,
                    _ = ticker.tick() => supervisor.log_stats(),
                }
            }
        });
        self.spawn_background(handle);
    }

    /// Log a metrics snapshot and every pool's occupancy
    pub fn log_stats(&self) {
        info!("Stats: {}", self.inner.metrics.snapshot());
        for proxy in self.proxies() {
            info!(proxy = %proxy.label(), "Pool: {}", proxy.pool().status());
        }
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been requested
    pub async fn wait_for_shutdown(&self) {
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let _ = shutdown_rx.wait_for(|stop| *stop).await;
    }

    /// Stop every proxy and background task; idempotent
    pub async fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);

        let background: Vec<_> = std::mem::take(
            &mut *self.inner.background.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in background {
            handle.abort();
            let _ = handle.await;
        }

        let mut stopping = tokio::task::JoinSet::new();
        for proxy in self.proxies() {
            stopping.spawn(async move { proxy.shutdown().await });
        }
        while stopping.join_next().await.is_some() {}

        let runners: Vec<_> = std::mem::take(
            &mut *self.inner.runners.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in runners {
            if let Err(e) = handle.await {
                debug!("Proxy task ended abnormally: {}", e);
            }
        }

        info!("All proxies stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path, upstreams: Vec<UpstreamConfig>) -> Config {
        Config {
            local_socket_prefix: format!("{}/rb-", dir.display()),
            stats_interval: std::time::Duration::ZERO,
            upstreams,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_start_binds_derived_sockets_and_shutdown_removes_them() {
        let dir = tempfile::tempdir().unwrap();
        let mut upstream = UpstreamConfig::new("127.0.0.1:1", Family::Tcp);
        upstream.min_pool_size = 0;
        upstream.database = Some(3);
        let supervisor = ProxySupervisor::new(config_in(dir.path(), vec![upstream]));

        supervisor.start().await.unwrap();
        let socket = dir.path().join("rb-127.0.0.1-1-3.sock");
        assert!(socket.exists());

        supervisor.shutdown().await;
        assert!(!socket.exists());
        assert!(supervisor
            .proxies()
            .iter()
            .all(|p| p.state() == ProxyState::Stopped));
    }

    #[tokio::test]
    async fn test_bind_failure_aborts_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut good = UpstreamConfig::new("127.0.0.1:1", Family::Tcp);
        good.min_pool_size = 0;
        let mut bad = UpstreamConfig::new("127.0.0.1:2", Family::Tcp);
        bad.listen = Some(dir.path().join("no-such-dir/x.sock").display().to_string());

        let supervisor = ProxySupervisor::new(config_in(dir.path(), vec![good, bad]));
        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, ProxyError::Bind { .. }));

        // The proxy bound before the failure is gone again
        assert!(!dir.path().join("rb-127.0.0.1-1.sock").exists());
    }

    #[tokio::test]
    async fn test_unreachable_cluster_seed_fails_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let mut seed = UpstreamConfig::new(dir.path().join("seed.sock").display().to_string(), Family::Unix);
        seed.cluster = true;
        seed.listen = Some(dir.path().join("cluster.sock").display().to_string());

        let supervisor = ProxySupervisor::new(config_in(dir.path(), vec![seed]));
        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, ProxyError::Discovery(_)));
    }
}
