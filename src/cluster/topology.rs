//! Topology reply rewriting
//!
//! Node addresses appear in three places: `CLUSTER SLOTS` entries,
//! the address field of `CLUSTER NODES`-style text lines, and the target of
//! `MOVED`/`ASK` redirections. Each is swapped for the local address of the
//! proxy fronting that node.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{NodeMap, NodeNaming};
use crate::address::LocalAddress;
use crate::metrics::MetricsCollector;
use crate::protocol::command::topology_request;
use crate::protocol::{Frame, TopologyRequest};
use crate::session::ReplyHook;

/// Reply hook shared by every proxy of one cluster
#[derive(Debug, Clone)]
pub struct TopologyRewriter {
    nodes: NodeMap,
    unknown_tx: mpsc::UnboundedSender<String>,
    naming: NodeNaming,
    metrics: MetricsCollector,
}

impl TopologyRewriter {
    pub fn new(
        nodes: NodeMap,
        unknown_tx: mpsc::UnboundedSender<String>,
        naming: NodeNaming,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            nodes,
            unknown_tx,
            naming,
            metrics,
        }
    }

    /// Local address for `node`, reporting it if no proxy fronts it yet
    fn resolve(&self, node: &str) -> Option<LocalAddress> {
        if let Some(local) = self.nodes.get(node) {
            return Some(local.value().clone());
        }

        debug!(node = %node, "Topology reply names an unknown node");
        // The receiver only goes away during shutdown
        let _ = self.unknown_tx.send(node.to_string());
        self.naming.predicted(node)
    }

    /// Rewrite one `[host, port, ...]` node entry of a slot range
    fn rewrite_slot_node(&self, node: &mut Frame) -> bool {
        let Frame::Array(fields) = node else {
            return false;
        };
        let (host, port) = match fields.as_slice() {
            [Frame::Bulk(host), Frame::Integer(port), ..] if !host.is_empty() => {
                (String::from_utf8_lossy(host).into_owned(), *port)
            }
            _ => return false,
        };

        let Some(local) = self.resolve(&format!("{host}:{port}")) else {
            return false;
        };
        let (local_host, local_port) = local.advertised();
        fields[0] = Frame::Bulk(Bytes::from(local_host));
        fields[1] = Frame::Integer(i64::from(local_port));
        true
    }

    fn rewrite_slots(&self, reply: &mut Frame) -> bool {
        let Frame::Array(ranges) = reply else {
            return false;
        };
        let mut changed = false;
        for range in ranges {
            if let Frame::Array(entry) = range {
                for node in entry.iter_mut().skip(2) {
                    changed |= self.rewrite_slot_node(node);
                }
            }
        }
        changed
    }

    /// Rewrite the `host:port@cport[,hostname]` field of each line
    fn rewrite_node_lines(&self, text: &str) -> Option<String> {
        let mut changed = false;
        let lines: Vec<String> = text
            .split('\n')
            .map(|line| match self.rewrite_node_line(line) {
                Some(rewritten) => {
                    changed = true;
                    rewritten
                }
                None => line.to_string(),
            })
            .collect();
        changed.then(|| lines.join("\n"))
    }

    fn rewrite_node_line(&self, line: &str) -> Option<String> {
        let field = line.split(' ').nth(1)?;
        let (address, rest) = match field.find(['@', ',']) {
            Some(i) => field.split_at(i),
            None => (field, ""),
        };
        // Nodes that have not learned their address show up as ":0"
        if address.is_empty() || address.starts_with(':') {
            return None;
        }

        let local = self.resolve(address)?.advertised_host_port();
        let replaced = format!("{local}{rest}");
        let fields: Vec<&str> = line
            .split(' ')
            .enumerate()
            .map(|(i, f)| if i == 1 { replaced.as_str() } else { f })
            .collect();
        Some(fields.join(" "))
    }

    fn rewrite_nodes(&self, reply: &mut Frame) -> bool {
        match reply {
            Frame::Bulk(body) => {
                let rewritten = self.rewrite_node_lines(&String::from_utf8_lossy(body));
                match rewritten {
                    Some(text) => {
                        *body = Bytes::from(text);
                        true
                    }
                    None => false,
                }
            }
            Frame::Array(lines) => {
                let mut changed = false;
                for line in lines {
                    changed |= self.rewrite_nodes(line);
                }
                changed
            }
            _ => false,
        }
    }

    /// `MOVED <slot> <host:port>` and `ASK <slot> <host:port>`
    fn rewrite_redirect(&self, message: &mut String) -> bool {
        let mut parts = message.splitn(3, ' ');
        let (Some(kind), Some(slot), Some(target)) = (parts.next(), parts.next(), parts.next()) else {
            return false;
        };
        if kind != "MOVED" && kind != "ASK" {
            return false;
        }

        match self.resolve(target) {
            Some(local) => {
                *message = format!("{kind} {slot} {}", local.advertised_host_port());
                true
            }
            None => false,
        }
    }
}

impl ReplyHook for TopologyRewriter {
    fn on_reply(&self, request: &Frame, mut reply: Frame) -> Frame {
        let changed = match (&mut reply, topology_request(request)) {
            (Frame::Error(message), _) => self.rewrite_redirect(message),
            (reply, Some(TopologyRequest::Slots)) => self.rewrite_slots(reply),
            (reply, Some(TopologyRequest::Nodes)) => self.rewrite_nodes(reply),
            (_, None) => false,
        };

        if changed {
            trace!("Rewrote topology reply");
            self.metrics.topology_rewritten();
        }
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use dashmap::DashMap;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn rewriter(network: Network) -> (TopologyRewriter, mpsc::UnboundedReceiver<String>) {
        let nodes: NodeMap = Arc::new(DashMap::new());
        nodes.insert(
            "10.0.0.1:7000".to_string(),
            LocalAddress::Unix(PathBuf::from("/tmp/rb-10.0.0.1-7000.sock")),
        );
        nodes.insert(
            "10.0.0.2:7001".to_string(),
            LocalAddress::Tcp("127.0.0.1:40001".parse().unwrap()),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let naming = NodeNaming {
            network,
            prefix: "/tmp/rb-".into(),
            suffix: ".sock".into(),
        };
        (
            TopologyRewriter::new(nodes, tx, naming, MetricsCollector::new()),
            rx,
        )
    }

    fn slot_node(host: &str, port: i64) -> Frame {
        Frame::Array(vec![
            Frame::Bulk(Bytes::copy_from_slice(host.as_bytes())),
            Frame::Integer(port),
            Frame::Bulk(Bytes::from_static(b"abcdef")),
        ])
    }

    #[test]
    fn test_rewrite_cluster_slots() {
        let (rewriter, _rx) = rewriter(Network::Unix);
        let reply = Frame::Array(vec![Frame::Array(vec![
            Frame::Integer(0),
            Frame::Integer(5460),
            slot_node("10.0.0.1", 7000),
            slot_node("10.0.0.2", 7001),
        ])]);

        let rewritten = rewriter.on_reply(&Frame::command(["CLUSTER", "SLOTS"]), reply);
        let expected = Frame::Array(vec![Frame::Array(vec![
            Frame::Integer(0),
            Frame::Integer(5460),
            slot_node("/tmp/rb-10.0.0.1-7000.sock", 0),
            slot_node("127.0.0.1", 40001),
        ])]);
        assert_eq!(rewritten, expected);
        assert_eq!(rewriter.metrics.snapshot().topology_rewrites, 1);
    }

    #[test]
    fn test_rewrite_cluster_nodes_lines() {
        let (rewriter, _rx) = rewriter(Network::Unix);
        let body = "id1 10.0.0.1:7000@17000 myself,master - 0 0 1 connected 0-5460\n\
                    id2 10.0.0.2:7001@17001,node-b master - 0 0 2 connected 5461-10922\n";
        let reply = Frame::Bulk(Bytes::from(body.to_string()));

        let rewritten = rewriter.on_reply(&Frame::command(["cluster", "nodes"]), reply);
        let Frame::Bulk(text) = rewritten else {
            panic!("expected a bulk reply");
        };
        let text = String::from_utf8(text.to_vec()).unwrap();
        assert_eq!(
            text,
            "id1 /tmp/rb-10.0.0.1-7000.sock:0@17000 myself,master - 0 0 1 connected 0-5460\n\
             id2 127.0.0.1:40001@17001,node-b master - 0 0 2 connected 5461-10922\n"
        );
    }

    #[test]
    fn test_rewrite_replicas_array() {
        let (rewriter, _rx) = rewriter(Network::Unix);
        let reply = Frame::Array(vec![Frame::Bulk(Bytes::from_static(
            b"id2 10.0.0.2:7001@17001 slave id1 0 0 2 connected",
        ))]);
        let rewritten = rewriter.on_reply(&Frame::command(["CLUSTER", "REPLICAS", "id1"]), reply);
        assert_eq!(
            rewritten,
            Frame::Array(vec![Frame::Bulk(Bytes::from_static(
                b"id2 127.0.0.1:40001@17001 slave id1 0 0 2 connected",
            ))])
        );
    }

    #[test]
    fn test_rewrite_moved_and_ask() {
        let (rewriter, _rx) = rewriter(Network::Unix);
        let moved = rewriter.on_reply(
            &Frame::command(["GET", "k"]),
            Frame::Error("MOVED 3999 10.0.0.2:7001".into()),
        );
        assert_eq!(moved, Frame::Error("MOVED 3999 127.0.0.1:40001".into()));

        let ask = rewriter.on_reply(
            &Frame::command(["GET", "k"]),
            Frame::Error("ASK 3999 10.0.0.1:7000".into()),
        );
        assert_eq!(
            ask,
            Frame::Error("ASK 3999 /tmp/rb-10.0.0.1-7000.sock:0".into())
        );
    }

    #[test]
    fn test_other_errors_untouched() {
        let (rewriter, _rx) = rewriter(Network::Unix);
        let err = Frame::Error("ERR unknown command".into());
        assert_eq!(rewriter.on_reply(&Frame::command(["FOO"]), err.clone()), err);
    }

    #[test]
    fn test_unknown_unix_node_rewritten_and_reported() {
        let (rewriter, mut rx) = rewriter(Network::Unix);
        let moved = rewriter.on_reply(
            &Frame::command(["GET", "k"]),
            Frame::Error("MOVED 1 10.0.0.9:7009".into()),
        );
        assert_eq!(moved, Frame::Error("MOVED 1 /tmp/rb-10.0.0.9-7009.sock:0".into()));
        assert_eq!(rx.try_recv().unwrap(), "10.0.0.9:7009");
    }

    #[test]
    fn test_unknown_tcp_node_left_alone_and_reported() {
        let (rewriter, mut rx) = rewriter(Network::Tcp);
        let original = Frame::Error("MOVED 1 10.0.0.9:7009".into());
        let moved = rewriter.on_reply(&Frame::command(["GET", "k"]), original.clone());
        assert_eq!(moved, original);
        assert_eq!(rx.try_recv().unwrap(), "10.0.0.9:7009");
    }

    #[test]
    fn test_non_topology_reply_untouched() {
        let (rewriter, mut rx) = rewriter(Network::Unix);
        let reply = Frame::Bulk(Bytes::from_static(b"id1 10.0.0.1:7000@17000 master"));
        assert_eq!(rewriter.on_reply(&Frame::command(["GET", "k"]), reply.clone()), reply);
        assert!(rx.try_recv().is_err());
    }
}
