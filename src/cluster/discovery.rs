//! Cluster node discovery
//!
//! Asks a seed node for `CLUSTER SLOTS` and collects every node address it
//! advertises, masters and replicas alike.

use thiserror::Error;
use tracing::{debug, info};

use crate::connection_error::ConnectionError;
use crate::pool::{ConnectionTimeouts, UpstreamConnection, UpstreamTarget};
use crate::protocol::Frame;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("cannot reach seed node: {0}")]
    Connection(#[from] ConnectionError),

    #[error("seed node {seed} rejected CLUSTER SLOTS: {message}")]
    Rejected { seed: String, message: String },

    #[error("seed node {seed} returned a malformed CLUSTER SLOTS reply")]
    Malformed { seed: String },
}

/// Node addresses (`host:port`) found in a `CLUSTER SLOTS` reply
///
/// Order of first appearance is kept and duplicates dropped. Entries with an
/// empty host (a node that does not know its own address) are skipped.
#[must_use]
pub fn parse_slots_nodes(reply: &Frame) -> Option<Vec<String>> {
    let Frame::Array(ranges) = reply else {
        return None;
    };

    let mut nodes: Vec<String> = Vec::new();
    for range in ranges {
        let Frame::Array(entry) = range else {
            return None;
        };
        for node in entry.iter().skip(2) {
            if let Frame::Array(fields) = node
                && let [Frame::Bulk(host), Frame::Integer(port), ..] = fields.as_slice()
                && !host.is_empty()
            {
                let address = format!("{}:{port}", String::from_utf8_lossy(host));
                if !nodes.contains(&address) {
                    nodes.push(address);
                }
            }
        }
    }
    Some(nodes)
}

/// Connect to `seed` directly (outside any pool) and list the cluster's nodes
pub async fn discover_nodes(
    seed: &UpstreamTarget,
    timeouts: ConnectionTimeouts,
) -> Result<Vec<String>, DiscoveryError> {
    debug!(seed = %seed, "Discovering cluster nodes");

    let mut conn = UpstreamConnection::connect(seed, 0, timeouts).await?;
    let reply = conn.round_trip(&Frame::command(["CLUSTER", "SLOTS"])).await;
    conn.quit().await;

    let nodes = match reply? {
        Frame::Error(message) => {
            return Err(DiscoveryError::Rejected {
                seed: seed.to_string(),
                message,
            });
        }
        reply => parse_slots_nodes(&reply).ok_or_else(|| DiscoveryError::Malformed {
            seed: seed.to_string(),
        })?,
    };

    info!(seed = %seed, nodes = nodes.len(), "Discovered cluster nodes");
    Ok(nodes)
}
