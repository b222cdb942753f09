//! Configuration validation
//!
//! Pool sizes are enforced by their types; this checks the constraints that
//! span fields or upstreams.

use anyhow::{Result, bail};
use std::collections::HashSet;

use super::types::{Config, UpstreamConfig};
use crate::network::{BindAddress, Network};

impl Config {
    /// Validate configuration for correctness
    ///
    /// - at least one upstream
    /// - `min_pool_size <= max_pool_size`
    /// - no database selection on cluster upstreams
    /// - TCP standalone upstreams have an explicit `listen`
    /// - listen addresses are unique
    pub fn validate(&self) -> Result<()> {
        if self.upstreams.is_empty() {
            bail!("Configuration must have at least one upstream");
        }

        let mut bound = HashSet::new();
        for upstream in &self.upstreams {
            validate_upstream(upstream)?;

            let address = match self.bind_address(upstream) {
                Some(address) => address,
                None if upstream.cluster => continue,
                None => bail!(
                    "Upstream '{}' needs a listen address when network is {}",
                    upstream.display_label(),
                    Network::Tcp
                ),
            };
            // Ephemeral TCP ports never collide
            if matches!(&address, BindAddress::Tcp(addr) if addr.ends_with(":0")) {
                continue;
            }
            if !bound.insert(address.clone()) {
                bail!(
                    "Upstream '{}' would listen on {}, which another upstream already uses",
                    upstream.display_label(),
                    address
                );
            }
        }

        Ok(())
    }
}

fn validate_upstream(upstream: &UpstreamConfig) -> Result<()> {
    if upstream.address.trim().is_empty() {
        bail!("Upstream address must not be empty");
    }

    if upstream.min_pool_size > upstream.max_pool_size.get() {
        bail!(
            "Upstream '{}' has min_pool_size {} above max_pool_size {}",
            upstream.display_label(),
            upstream.min_pool_size,
            upstream.max_pool_size
        );
    }

    if upstream.cluster && upstream.database.is_some() {
        bail!(
            "Upstream '{}' is a cluster; clusters only have database 0, remove the database setting",
            upstream.display_label()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Family;
    use crate::types::MaxPoolSize;

    fn config_with(upstreams: Vec<UpstreamConfig>) -> Config {
        Config {
            upstreams,
            ..Config::default()
        }
    }

    #[test]
    fn test_valid_config() {
        let config = config_with(vec![
            UpstreamConfig::new("127.0.0.1:6379", Family::Tcp),
            UpstreamConfig::new("127.0.0.1:6380", Family::Tcp),
        ]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_no_upstreams() {
        let err = config_with(vec![]).validate().unwrap_err();
        assert!(err.to_string().contains("at least one upstream"));
    }

    #[test]
    fn test_min_above_max() {
        let mut upstream = UpstreamConfig::new("127.0.0.1:6379", Family::Tcp);
        upstream.min_pool_size = 5;
        upstream.max_pool_size = MaxPoolSize::try_new(2).unwrap();
        assert!(config_with(vec![upstream]).validate().is_err());
    }

    #[test]
    fn test_cluster_with_database() {
        let mut upstream = UpstreamConfig::new("127.0.0.1:7000", Family::Tcp);
        upstream.cluster = true;
        upstream.database = Some(1);
        assert!(config_with(vec![upstream]).validate().is_err());
    }

    #[test]
    fn test_tcp_standalone_needs_listen() {
        let mut config = config_with(vec![UpstreamConfig::new("127.0.0.1:6379", Family::Tcp)]);
        config.network = Network::Tcp;
        assert!(config.validate().is_err());

        config.upstreams[0].listen = Some("127.0.0.1:7379".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tcp_cluster_without_listen_is_fine() {
        let mut upstream = UpstreamConfig::new("127.0.0.1:7000", Family::Tcp);
        upstream.cluster = true;
        let mut config = config_with(vec![upstream]);
        config.network = Network::Tcp;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_socket_paths() {
        let config = config_with(vec![
            UpstreamConfig::new("127.0.0.1:6379", Family::Tcp),
            UpstreamConfig::new("127.0.0.1:6379", Family::Tcp),
        ]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("already uses"));
    }

    #[test]
    fn test_same_host_different_db_is_distinct() {
        let mut a = UpstreamConfig::new("127.0.0.1:6379", Family::Tcp);
        a.database = Some(0);
        let mut b = UpstreamConfig::new("127.0.0.1:6379", Family::Tcp);
        b.database = Some(1);
        assert!(config_with(vec![a, b]).validate().is_ok());
    }
}
