//! Cluster support
//!
//! A clustered upstream gets one proxy per node. Replies that advertise node
//! addresses are rewritten so clients are steered to those local proxies
//! instead of the real nodes.

pub mod discovery;
pub mod topology;

pub use discovery::{discover_nodes, parse_slots_nodes};
pub use topology::TopologyRewriter;

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::address::{LocalAddress, local_socket_path};
use crate::network::Network;

/// Upstream node address (`host:port`) to the local address fronting it
pub type NodeMap = Arc<DashMap<String, LocalAddress>>;

/// How local listeners for cluster nodes are named
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeNaming {
    pub network: Network,
    pub prefix: String,
    pub suffix: String,
}

impl NodeNaming {
    /// Local address a node proxy will bind, when it can be known in advance
    ///
    /// Unix paths derive from the node address alone. TCP node listeners bind
    /// an ephemeral port, so their address is only known after binding.
    #[must_use]
    pub fn predicted(&self, node: &str) -> Option<LocalAddress> {
        match self.network {
            Network::Unix => Some(LocalAddress::Unix(PathBuf::from(local_socket_path(
                node,
                None,
                &self.prefix,
                &self.suffix,
            )))),
            Network::Tcp => None,
        }
    }
}
