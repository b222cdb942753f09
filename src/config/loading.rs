//! Configuration loading from files, upstream URIs and environment variables
//!
//! Upstreams can come from three places. Environment variables
//! (`PROXY_UPSTREAM_0`, `PROXY_UPSTREAM_1`, ...) replace the upstreams of
//! the file, and URIs given on the command line replace both.

use anyhow::{Context, Result, anyhow, bail};
use std::path::Path;
use url::Url;

use super::types::{Config, UpstreamConfig};
use crate::pool::Family;
use crate::types::{MaxPoolSize, parse_duration};

/// Prefix of indexed upstream environment variables
pub const UPSTREAM_ENV_PREFIX: &str = "PROXY_UPSTREAM_";

/// Load configuration from a TOML file
///
/// Validation is left to the caller so overrides can be applied first.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

/// Parse an upstream URI
///
/// `redis://host:port?label=x&db=3&cluster=true&minpoolsize=1&maxpoolsize=10&checkouttimeout=1s&dialtimeout=1s&readtimeout=1s&writetimeout=1s&listen=addr`
/// or `unix:///path/to/redis.sock?...` with the same parameters.
///
/// # Examples
///
/// ```
/// use redis_local_proxy::config::parse_upstream_uri;
///
/// let upstream = parse_upstream_uri("redis://127.0.0.1:7006?db=3&maxpoolsize=5").unwrap();
/// assert_eq!(upstream.address, "127.0.0.1:7006");
/// assert_eq!(upstream.database, Some(3));
/// assert_eq!(upstream.max_pool_size.get(), 5);
/// ```
pub fn parse_upstream_uri(uri: &str) -> Result<UpstreamConfig> {
    let url = Url::parse(uri).with_context(|| format!("Invalid upstream URI '{uri}'"))?;

    let mut upstream = match url.scheme() {
        "redis" | "tcp" => {
            let host = url
                .host_str()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| anyhow!("Upstream URI '{uri}' has no host"))?;
            let port = url.port().unwrap_or(6379);
            UpstreamConfig::new(format!("{host}:{port}"), Family::Tcp)
        }
        "unix" => {
            if url.path().is_empty() {
                bail!("Upstream URI '{uri}' has no socket path");
            }
            UpstreamConfig::new(url.path(), Family::Unix)
        }
        other => bail!("Unsupported upstream scheme '{other}' in '{uri}'"),
    };

    for (key, value) in url.query_pairs() {
        let invalid = |e: String| anyhow!("Invalid value '{value}' for '{key}' in '{uri}': {e}");
        match key.as_ref() {
            "label" => upstream.label = Some(value.to_string()),
            "db" => {
                let db: i64 = value.parse().map_err(|e| invalid(format!("{e}")))?;
                upstream.database = match db {
                    -1 => None,
                    db => Some(u32::try_from(db).map_err(|e| invalid(e.to_string()))?),
                };
            }
            "cluster" => upstream.cluster = value.parse().map_err(|e| invalid(format!("{e}")))?,
            "listen" => upstream.listen = Some(value.to_string()),
            "minpoolsize" => {
                upstream.min_pool_size = value.parse().map_err(|e| invalid(format!("{e}")))?;
            }
            "maxpoolsize" => upstream.max_pool_size = value.parse::<MaxPoolSize>().map_err(invalid)?,
            "checkouttimeout" => upstream.checkout_timeout = parse_duration(&value).map_err(invalid)?,
            "dialtimeout" => upstream.dial_timeout = parse_duration(&value).map_err(invalid)?,
            "readtimeout" => upstream.read_timeout = parse_duration(&value).map_err(invalid)?,
            "writetimeout" => upstream.write_timeout = parse_duration(&value).map_err(invalid)?,
            other => bail!("Unknown upstream parameter '{other}' in '{uri}'"),
        }
    }

    Ok(upstream)
}

/// Collect upstreams from `PROXY_UPSTREAM_<n>` variables, ordered by `n`
///
/// Takes the variables as an iterator so it can be tested without touching
/// the process environment. Returns `None` when no such variable is set.
pub fn upstreams_from_vars<I>(vars: I) -> Result<Option<Vec<UpstreamConfig>>>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut indexed = Vec::new();
    for (key, value) in vars {
        let Some(index) = key.strip_prefix(UPSTREAM_ENV_PREFIX) else {
            continue;
        };
        let index: usize = index
            .parse()
            .with_context(|| format!("Invalid upstream variable name '{key}'"))?;
        let upstream =
            parse_upstream_uri(&value).with_context(|| format!("Invalid value of '{key}'"))?;
        indexed.push((index, upstream));
    }

    if indexed.is_empty() {
        return Ok(None);
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(Some(indexed.into_iter().map(|(_, upstream)| upstream).collect()))
}

impl Config {
    /// Replace the upstreams with those from the environment, if any are set
    pub fn apply_env_upstreams<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        if let Some(upstreams) = upstreams_from_vars(vars)? {
            tracing::info!(
                "Using {} upstream(s) from environment variables (overriding config file)",
                upstreams.len()
            );
            self.upstreams = upstreams;
        }
        Ok(())
    }

    /// Replace the upstreams with URIs given on the command line, if any
    pub fn apply_uri_upstreams(&mut self, uris: &[String]) -> Result<()> {
        if uris.is_empty() {
            return Ok(());
        }
        self.upstreams = uris
            .iter()
            .map(|uri| parse_upstream_uri(uri))
            .collect::<Result<_>>()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_full_redis_uri() {
        let upstream = parse_upstream_uri(
            "redis://localhost:7000?label=cache&db=2&minpoolsize=2&maxpoolsize=4\
             &checkouttimeout=250ms&dialtimeout=2s&readtimeout=300&writetimeout=1m&listen=/tmp/x.sock",
        )
        .unwrap();

        assert_eq!(upstream.address, "localhost:7000");
        assert_eq!(upstream.family, Family::Tcp);
        assert_eq!(upstream.label.as_deref(), Some("cache"));
        assert_eq!(upstream.database, Some(2));
        assert_eq!(upstream.min_pool_size, 2);
        assert_eq!(upstream.max_pool_size.get(), 4);
        assert_eq!(upstream.checkout_timeout, Duration::from_millis(250));
        assert_eq!(upstream.dial_timeout, Duration::from_secs(2));
        assert_eq!(upstream.read_timeout, Duration::from_millis(300));
        assert_eq!(upstream.write_timeout, Duration::from_secs(60));
        assert_eq!(upstream.listen.as_deref(), Some("/tmp/x.sock"));
        assert!(!upstream.cluster);
    }

    #[test]
    fn test_parse_unix_uri() {
        let upstream = parse_upstream_uri("unix:///var/run/redis.sock?db=-1").unwrap();
        assert_eq!(upstream.address, "/var/run/redis.sock");
        assert_eq!(upstream.family, Family::Unix);
        assert_eq!(upstream.database, None);
    }

    #[test]
    fn test_parse_cluster_uri_default_port() {
        let upstream = parse_upstream_uri("redis://10.0.0.1?cluster=true").unwrap();
        assert_eq!(upstream.address, "10.0.0.1:6379");
        assert!(upstream.cluster);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_upstream_uri("not a uri").is_err());
        assert!(parse_upstream_uri("http://h:1").is_err());
        assert!(parse_upstream_uri("redis://h:1?bogus=1").is_err());
        assert!(parse_upstream_uri("redis://h:1?maxpoolsize=0").is_err());
        assert!(parse_upstream_uri("redis://h:1?db=-5").is_err());
        assert!(parse_upstream_uri("redis://h:1?readtimeout=soon").is_err());
    }

    #[test]
    fn test_upstreams_from_vars_ordered_by_index() {
        let vars = vec![
            ("PROXY_UPSTREAM_10".to_string(), "redis://c:3".to_string()),
            ("HOME".to_string(), "/root".to_string()),
            ("PROXY_UPSTREAM_2".to_string(), "redis://b:2".to_string()),
            ("PROXY_UPSTREAM_0".to_string(), "redis://a:1".to_string()),
        ];
        let upstreams = upstreams_from_vars(vars).unwrap().unwrap();
        let addresses: Vec<&str> = upstreams.iter().map(|u| u.address.as_str()).collect();
        assert_eq!(addresses, vec!["a:1", "b:2", "c:3"]);
    }

    #[test]
    fn test_upstreams_from_vars_none_set() {
        let vars = vec![("PATH".to_string(), "/bin".to_string())];
        assert!(upstreams_from_vars(vars).unwrap().is_none());
    }

    #[test]
    fn test_upstreams_from_vars_bad_index() {
        let vars = vec![("PROXY_UPSTREAM_X".to_string(), "redis://a:1".to_string())];
        assert!(upstreams_from_vars(vars).is_err());
    }

    #[test]
    fn test_precedence_env_then_cli() {
        let mut config = Config {
            upstreams: vec![UpstreamConfig::new("file:1", Family::Tcp)],
            ..Config::default()
        };

        config
            .apply_env_upstreams(vec![("PROXY_UPSTREAM_0".to_string(), "redis://env:1".to_string())])
            .unwrap();
        assert_eq!(config.upstreams[0].address, "env:1");

        config.apply_uri_upstreams(&[]).unwrap();
        assert_eq!(config.upstreams[0].address, "env:1");

        config
            .apply_uri_upstreams(&["redis://cli:1".to_string(), "redis://cli:2".to_string()])
            .unwrap();
        assert_eq!(config.upstreams.len(), 2);
        assert_eq!(config.upstreams[1].address, "cli:2");
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.toml");
        std::fs::write(
            &path,
            r#"
network = "tcp"
stats_interval_secs = 0

[logging]
level = "debug"
format = "json"

[[upstreams]]
address = "127.0.0.1:6379"
listen = "127.0.0.1:7379"
database = 1
max_pool_size = 3
read_timeout_ms = 50
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.network, crate::network::Network::Tcp);
        assert_eq!(config.stats_interval, Duration::ZERO);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.upstreams.len(), 1);
        assert_eq!(config.upstreams[0].database, Some(1));
        assert_eq!(config.upstreams[0].max_pool_size.get(), 3);
        assert_eq!(config.upstreams[0].read_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("/nonexistent/proxy.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
