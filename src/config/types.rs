//! Configuration type definitions

use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::defaults;
use crate::address::local_socket_path;
use crate::network::{BindAddress, Network};
use crate::pool::{ConnectionTimeouts, Family, UpstreamTarget};
use crate::types::{MaxPoolSize, duration_ms_serde, duration_secs_serde};

/// Output format of the console log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Main proxy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Family of the client-facing listeners
    pub network: Network,
    /// Prepended to derived unix socket paths
    pub local_socket_prefix: String,
    /// Appended to derived unix socket paths
    pub local_socket_suffix: String,
    /// Remove a stale socket file before binding
    pub unlink: bool,
    /// Host TCP listeners of cluster nodes bind to
    pub cluster_listen_host: String,
    /// Period of the stats log line (zero disables it)
    #[serde(rename = "stats_interval_secs", with = "duration_secs_serde")]
    pub stats_interval: Duration,
    pub logging: LoggingConfig,
    pub upstreams: Vec<UpstreamConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network::default(),
            local_socket_prefix: defaults::local_socket_prefix(),
            local_socket_suffix: defaults::local_socket_suffix(),
            unlink: true,
            cluster_listen_host: defaults::cluster_listen_host(),
            stats_interval: defaults::stats_interval(),
            logging: LoggingConfig::default(),
            upstreams: Vec::new(),
        }
    }
}

impl Config {
    /// Where a standalone upstream (or a cluster seed) listens
    ///
    /// `None` when the network is TCP and no explicit `listen` is set; a
    /// standalone upstream fails validation in that case.
    #[must_use]
    pub fn bind_address(&self, upstream: &UpstreamConfig) -> Option<BindAddress> {
        match (self.network, &upstream.listen) {
            (Network::Unix, Some(listen)) => Some(BindAddress::Unix(PathBuf::from(listen))),
            (Network::Unix, None) => Some(BindAddress::Unix(PathBuf::from(local_socket_path(
                &upstream.address,
                upstream.database,
                &self.local_socket_prefix,
                &self.local_socket_suffix,
            )))),
            (Network::Tcp, Some(listen)) => Some(BindAddress::Tcp(listen.clone())),
            (Network::Tcp, None) => None,
        }
    }

    /// Where the proxy for a discovered cluster node listens
    #[must_use]
    pub fn node_bind_address(&self, node: &str) -> BindAddress {
        match self.network {
            Network::Unix => BindAddress::Unix(PathBuf::from(local_socket_path(
                node,
                None,
                &self.local_socket_prefix,
                &self.local_socket_suffix,
            ))),
            Network::Tcp => BindAddress::Tcp(format!("{}:0", self.cluster_listen_host)),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
    /// Optional second sink, written without ANSI colors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// One upstream endpoint and its pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// `host:port`, or a socket path for the unix family
    pub address: String,
    #[serde(default)]
    pub family: Family,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Database selected on every connection (`-1` or absent: none)
    #[serde(
        default,
        deserialize_with = "database_index",
        skip_serializing_if = "Option::is_none"
    )]
    pub database: Option<u32>,
    #[serde(default)]
    pub cluster: bool,
    /// Explicit listen address, overriding the derived one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    #[serde(default = "defaults::min_pool_size")]
    pub min_pool_size: usize,
    #[serde(default)]
    pub max_pool_size: MaxPoolSize,
    #[serde(
        rename = "checkout_timeout_ms",
        with = "duration_ms_serde",
        default = "defaults::checkout_timeout"
    )]
    pub checkout_timeout: Duration,
    #[serde(
        rename = "dial_timeout_ms",
        with = "duration_ms_serde",
        default = "defaults::dial_timeout"
    )]
    pub dial_timeout: Duration,
    #[serde(
        rename = "read_timeout_ms",
        with = "duration_ms_serde",
        default = "defaults::read_timeout"
    )]
    pub read_timeout: Duration,
    #[serde(
        rename = "write_timeout_ms",
        with = "duration_ms_serde",
        default = "defaults::write_timeout"
    )]
    pub write_timeout: Duration,
}

impl UpstreamConfig {
    /// Upstream with default pool settings
    pub fn new(address: impl Into<String>, family: Family) -> Self {
        Self {
            address: address.into(),
            family,
            label: None,
            database: None,
            cluster: false,
            listen: None,
            min_pool_size: defaults::min_pool_size(),
            max_pool_size: MaxPoolSize::default(),
            checkout_timeout: defaults::checkout_timeout(),
            dial_timeout: defaults::dial_timeout(),
            read_timeout: defaults::read_timeout(),
            write_timeout: defaults::write_timeout(),
        }
    }

    /// Label for logs and metrics, falling back to the address
    #[must_use]
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.address)
    }

    #[must_use]
    pub fn target(&self) -> UpstreamTarget {
        UpstreamTarget::new(self.address.clone(), self.family, self.database)
    }

    #[must_use]
    pub fn timeouts(&self) -> ConnectionTimeouts {
        ConnectionTimeouts {
            dial: self.dial_timeout,
            read: self.read_timeout,
            write: self.write_timeout,
        }
    }
}

/// Accept `-1` (or nothing) as "no database selection"
fn database_index<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<i64>::deserialize(deserializer)? {
        None | Some(-1) => Ok(None),
        Some(db) => u32::try_from(db)
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid database index {db}, expected -1 or 0.."))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.network, Network::Unix);
        assert_eq!(config.local_socket_prefix, "/var/tmp/redisbetween-");
        assert_eq!(config.local_socket_suffix, ".sock");
        assert!(config.unlink);
        assert_eq!(config.stats_interval, Duration::from_secs(60));
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert!(config.upstreams.is_empty());
    }

    #[test]
    fn test_upstream_from_toml_with_defaults() {
        let upstream: UpstreamConfig = toml::from_str(r#"address = "127.0.0.1:6379""#).unwrap();
        assert_eq!(upstream.family, Family::Tcp);
        assert_eq!(upstream.database, None);
        assert_eq!(upstream.max_pool_size.get(), 10);
        assert_eq!(upstream.min_pool_size, 1);
        assert_eq!(upstream.checkout_timeout, Duration::from_secs(1));
        assert_eq!(upstream.display_label(), "127.0.0.1:6379");
    }

    #[test]
    fn test_database_minus_one_means_none() {
        let upstream: UpstreamConfig =
            toml::from_str("address = \"h:1\"\ndatabase = -1").unwrap();
        assert_eq!(upstream.database, None);

        let upstream: UpstreamConfig = toml::from_str("address = \"h:1\"\ndatabase = 3").unwrap();
        assert_eq!(upstream.database, Some(3));

        assert!(toml::from_str::<UpstreamConfig>("address = \"h:1\"\ndatabase = -2").is_err());
    }

    #[test]
    fn test_zero_max_pool_size_rejected() {
        assert!(toml::from_str::<UpstreamConfig>("address = \"h:1\"\nmax_pool_size = 0").is_err());
    }

    #[test]
    fn test_bind_address_derivation() {
        let config = Config {
            local_socket_prefix: "/tmp/p-".into(),
            ..Config::default()
        };
        let mut upstream = UpstreamConfig::new("127.0.0.1:7006", Family::Tcp);
        upstream.database = Some(3);
        assert_eq!(
            config.bind_address(&upstream),
            Some(BindAddress::Unix("/tmp/p-127.0.0.1-7006-3.sock".into()))
        );

        upstream.listen = Some("/tmp/explicit.sock".into());
        assert_eq!(
            config.bind_address(&upstream),
            Some(BindAddress::Unix("/tmp/explicit.sock".into()))
        );

        let tcp = Config {
            network: Network::Tcp,
            ..Config::default()
        };
        assert_eq!(
            tcp.bind_address(&upstream),
            Some(BindAddress::Tcp("/tmp/explicit.sock".into()))
        );
        upstream.listen = None;
        assert_eq!(tcp.bind_address(&upstream), None);
        assert_eq!(
            tcp.node_bind_address("10.0.0.1:7000"),
            BindAddress::Tcp("127.0.0.1:0".into())
        );
    }
}
