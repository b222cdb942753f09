//! Real-time metrics collection for the proxy
//!
//! Lock-free counters shared by clone between every proxy, pool and session
//! of the process. Updates use relaxed atomics; a snapshot is a best-effort
//! view, not a consistent cut.

mod snapshot;

pub use snapshot::{MetricsSnapshot, UpstreamStats};

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Thread-safe metrics collector for the entire proxy
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    // Client side
    total_clients: AtomicU64,
    active_clients: AtomicUsize,

    // Upstream side
    upstream_connections_opened: AtomicU64,
    dial_failures: AtomicU64,
    checkouts: AtomicU64,
    checkout_wait_micros_total: AtomicU64,
    checkout_wait_micros_max: AtomicU64,
    exhaustion_errors: AtomicU64,
    transport_errors: AtomicU64,
    desyncs: AtomicU64,

    // Pipelining and cluster
    pipelines: AtomicU64,
    pipeline_commands: AtomicU64,
    topology_rewrites: AtomicU64,

    // Requests forwarded, keyed by proxy label
    upstream_requests: DashMap<String, UpstreamCounters>,

    start_time: Instant,
}

#[derive(Debug, Default)]
struct UpstreamCounters {
    requests: AtomicU64,
    errors: AtomicU64,
}

impl MetricsCollector {
    /// Create a new collector
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                total_clients: AtomicU64::new(0),
                active_clients: AtomicUsize::new(0),
                upstream_connections_opened: AtomicU64::new(0),
                dial_failures: AtomicU64::new(0),
                checkouts: AtomicU64::new(0),
                checkout_wait_micros_total: AtomicU64::new(0),
                checkout_wait_micros_max: AtomicU64::new(0),
                exhaustion_errors: AtomicU64::new(0),
                transport_errors: AtomicU64::new(0),
                desyncs: AtomicU64::new(0),
                pipelines: AtomicU64::new(0),
                pipeline_commands: AtomicU64::new(0),
                topology_rewrites: AtomicU64::new(0),
                upstream_requests: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    /// A client connection was accepted
    #[inline]
    pub fn client_connected(&self) {
        self.inner.total_clients.fetch_add(1, Ordering::Relaxed);
        self.inner.active_clients.fetch_add(1, Ordering::Relaxed);
    }

    /// A client connection ended
    #[inline]
    pub fn client_disconnected(&self) {
        // Saturating so a stray double call cannot wrap the gauge
        let _ = self.inner.active_clients.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |n| Some(n.saturating_sub(1)),
        );
    }

    #[inline]
    pub fn upstream_connection_opened(&self) {
        self.inner
            .upstream_connections_opened
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn dial_failed(&self) {
        self.inner.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A checkout succeeded after waiting `waited`
    pub fn checkout_completed(&self, waited: Duration) {
        let micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
        self.inner.checkouts.fetch_add(1, Ordering::Relaxed);
        self.inner
            .checkout_wait_micros_total
            .fetch_add(micros, Ordering::Relaxed);
        self.inner
            .checkout_wait_micros_max
            .fetch_max(micros, Ordering::Relaxed);
    }

    #[inline]
    pub fn pool_exhausted(&self) {
        self.inner.exhaustion_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn transport_error(&self) {
        self.inner.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn desync_detected(&self) {
        self.inner.desyncs.fetch_add(1, Ordering::Relaxed);
    }

    /// A pipelined batch of `commands` frames was executed
    pub fn pipeline_executed(&self, commands: usize) {
        self.inner.pipelines.fetch_add(1, Ordering::Relaxed);
        self.inner
            .pipeline_commands
            .fetch_add(commands as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn topology_rewritten(&self) {
        self.inner.topology_rewrites.fetch_add(1, Ordering::Relaxed);
    }

    /// Count requests forwarded to the upstream behind `label`
    pub fn record_requests(&self, label: &str, count: u64) {
        // Fast path avoids allocating the key once the entry exists
        if let Some(counters) = self.inner.upstream_requests.get(label) {
            counters.requests.fetch_add(count, Ordering::Relaxed);
            return;
        }
        self.inner
            .upstream_requests
            .entry(label.to_string())
            .or_default()
            .requests
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Count a failed upstream exchange for `label`
    pub fn record_upstream_error(&self, label: &str) {
        self.inner
            .upstream_requests
            .entry(label.to_string())
            .or_default()
            .errors
            .fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn active_clients(&self) -> usize {
        self.inner.active_clients.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.inner.start_time.elapsed()
    }

    /// Take a point-in-time copy of every counter
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        let mut upstreams: Vec<UpstreamStats> = inner
            .upstream_requests
            .iter()
            .map(|entry| UpstreamStats {
                label: entry.key().clone(),
                requests: load(&entry.value().requests),
                errors: load(&entry.value().errors),
            })
            .collect();
        upstreams.sort_by(|a, b| a.label.cmp(&b.label));

        MetricsSnapshot {
            total_clients: load(&inner.total_clients),
            active_clients: inner.active_clients.load(Ordering::Relaxed),
            upstream_connections_opened: load(&inner.upstream_connections_opened),
            dial_failures: load(&inner.dial_failures),
            checkouts: load(&inner.checkouts),
            checkout_wait_total: Duration::from_micros(load(&inner.checkout_wait_micros_total)),
            checkout_wait_max: Duration::from_micros(load(&inner.checkout_wait_micros_max)),
            exhaustion_errors: load(&inner.exhaustion_errors),
            transport_errors: load(&inner.transport_errors),
            desyncs: load(&inner.desyncs),
            pipelines: load(&inner.pipelines),
            pipeline_commands: load(&inner.pipeline_commands),
            topology_rewrites: load(&inner.topology_rewrites),
            upstreams,
            uptime: inner.start_time.elapsed(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_gauges() {
        let metrics = MetricsCollector::new();
        metrics.client_connected();
        metrics.client_connected();
        metrics.client_disconnected();
        assert_eq!(metrics.active_clients(), 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_clients, 2);
        assert_eq!(snapshot.active_clients, 1);
    }

    #[test]
    fn test_active_clients_never_underflow() {
        let metrics = MetricsCollector::new();
        metrics.client_disconnected();
        assert_eq!(metrics.active_clients(), 0);
    }

    #[test]
    fn test_checkout_wait_tracking() {
        let metrics = MetricsCollector::new();
        metrics.checkout_completed(Duration::from_millis(2));
        metrics.checkout_completed(Duration::from_millis(5));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.checkouts, 2);
        assert_eq!(snapshot.checkout_wait_total, Duration::from_millis(7));
        assert_eq!(snapshot.checkout_wait_max, Duration::from_millis(5));
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = MetricsCollector::new();
        let clone = metrics.clone();
        clone.pipeline_executed(4);
        clone.topology_rewritten();
        metrics.pool_exhausted();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.pipelines, 1);
        assert_eq!(snapshot.pipeline_commands, 4);
        assert_eq!(snapshot.topology_rewrites, 1);
        assert_eq!(snapshot.exhaustion_errors, 1);
    }

    #[test]
    fn test_per_upstream_counters_sorted() {
        let metrics = MetricsCollector::new();
        metrics.record_requests("sessions", 3);
        metrics.record_requests("cache", 1);
        metrics.record_requests("sessions", 2);
        metrics.record_upstream_error("cache");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.upstreams.len(), 2);
        assert_eq!(snapshot.upstreams[0].label, "cache");
        assert_eq!(snapshot.upstreams[0].requests, 1);
        assert_eq!(snapshot.upstreams[0].errors, 1);
        assert_eq!(snapshot.upstreams[1].requests, 5);
    }
}
