use std::io;
use thiserror::Error;

use super::ProxyState;
use crate::cluster::discovery::DiscoveryError;

/// Errors raised while building, binding or running proxies
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot {operation} a proxy that is {state}")]
    InvalidState {
        operation: &'static str,
        state: ProxyState,
    },

    #[error("cluster discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("failed to build upstream pool: {0}")]
    PoolBuild(#[from] deadpool::managed::BuildError),

    #[error("invalid proxy configuration: {0}")]
    Config(String),
}
