//! Plain-data view of the metrics counters

use std::fmt;
use std::time::Duration;

/// Counters for one upstream, keyed by proxy label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamStats {
    pub label: String,
    pub requests: u64,
    pub errors: u64,
}

/// Point-in-time copy of every process-wide counter
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub total_clients: u64,
    pub active_clients: usize,
    pub upstream_connections_opened: u64,
    pub dial_failures: u64,
    pub checkouts: u64,
    pub checkout_wait_total: Duration,
    pub checkout_wait_max: Duration,
    pub exhaustion_errors: u64,
    pub transport_errors: u64,
    pub desyncs: u64,
    pub pipelines: u64,
    pub pipeline_commands: u64,
    pub topology_rewrites: u64,
    pub upstreams: Vec<UpstreamStats>,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Mean time spent waiting for a pooled connection
    #[must_use]
    pub fn average_checkout_wait(&self) -> Duration {
        match u32::try_from(self.checkouts) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.checkout_wait_total / n,
            Err(_) => Duration::from_secs_f64(
                self.checkout_wait_total.as_secs_f64() / self.checkouts as f64,
            ),
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "clients={}/{} upstream_opened={} dial_failures={} checkouts={} \
             wait_avg={:?} wait_max={:?} exhausted={} transport_errors={} desyncs={} \
             pipelines={} pipeline_cmds={} topology_rewrites={} uptime={}s",
            self.active_clients,
            self.total_clients,
            self.upstream_connections_opened,
            self.dial_failures,
            self.checkouts,
            self.average_checkout_wait(),
            self.checkout_wait_max,
            self.exhaustion_errors,
            self.transport_errors,
            self.desyncs,
            self.pipelines,
            self.pipeline_commands,
            self.topology_rewrites,
            self.uptime.as_secs(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_checkout_wait() {
        let snapshot = MetricsSnapshot {
            checkouts: 4,
            checkout_wait_total: Duration::from_millis(8),
            ..Default::default()
        };
        assert_eq!(snapshot.average_checkout_wait(), Duration::from_millis(2));
        assert_eq!(
            MetricsSnapshot::default().average_checkout_wait(),
            Duration::ZERO
        );
    }

    #[test]
    fn test_display_contains_key_counters() {
        let snapshot = MetricsSnapshot {
            active_clients: 2,
            total_clients: 9,
            exhaustion_errors: 1,
            ..Default::default()
        };
        let line = snapshot.to_string();
        assert!(line.contains("clients=2/9"));
        assert!(line.contains("exhausted=1"));
    }
}
