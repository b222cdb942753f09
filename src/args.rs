//! Command-line argument parsing

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::config::{Config, LogFormat};
use crate::network::Network;
use crate::types::ThreadCount;

/// Local-socket connection pooling proxy for Redis-compatible stores
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "redis-local-proxy", version, about)]
pub struct Args {
    /// Upstream URIs, e.g. `redis://127.0.0.1:6379?db=1&maxpoolsize=5`
    /// (replace upstreams from the config file and environment)
    #[arg(value_name = "UPSTREAM")]
    pub upstreams: Vec<String>,

    /// Configuration file path
    #[arg(short, long, env = "PROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Family of the client-facing listeners
    #[arg(long, value_enum, env = "PROXY_NETWORK")]
    pub network: Option<Network>,

    /// Prefix of derived unix socket paths
    #[arg(long, env = "PROXY_LOCAL_SOCKET_PREFIX")]
    pub local_socket_prefix: Option<String>,

    /// Suffix of derived unix socket paths
    #[arg(long, env = "PROXY_LOCAL_SOCKET_SUFFIX")]
    pub local_socket_suffix: Option<String>,

    /// Remove stale socket files before binding (true/false)
    #[arg(long, env = "PROXY_UNLINK")]
    pub unlink: Option<bool>,

    /// Log level or filter directive (RUST_LOG still wins)
    #[arg(long, env = "PROXY_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Console log format
    #[arg(long, value_enum, env = "PROXY_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Also write logs to this file
    #[arg(long, env = "PROXY_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Number of worker threads (default: 1, use 0 for CPU cores)
    #[arg(short, long, env = "PROXY_THREADS")]
    pub threads: Option<usize>,
}

impl Args {
    /// Apply command-line overrides on top of file and environment settings
    ///
    /// # Errors
    /// Returns error if an upstream URI cannot be parsed
    pub fn apply_to(&self, config: &mut Config) -> Result<()> {
        config.apply_uri_upstreams(&self.upstreams)?;

        if let Some(network) = self.network {
            config.network = network;
        }
        if let Some(prefix) = &self.local_socket_prefix {
            config.local_socket_prefix.clone_from(prefix);
        }
        if let Some(suffix) = &self.local_socket_suffix {
            config.local_socket_suffix.clone_from(suffix);
        }
        if let Some(unlink) = self.unlink {
            config.unlink = unlink;
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }
        Ok(())
    }

    /// Worker threads for the runtime, `None` for the single-threaded default
    #[must_use]
    pub fn thread_count(&self) -> Option<ThreadCount> {
        self.threads.map(ThreadCount::from_requested)
    }
}
