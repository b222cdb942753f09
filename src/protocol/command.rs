//! Request inspection and local command policy
//!
//! The proxy forwards requests verbatim. It only looks inside them to spot
//! the pipelining signal keys, topology-bearing cluster commands, and the
//! handful of commands that would change the state of a shared upstream
//! connection and therefore cannot be forwarded.

use super::frame::Frame;
use crate::constants::ERROR_PREFIX;

/// Upper-cased command name of a request, if it is a well-formed command
#[must_use]
pub fn command_name(request: &Frame) -> Option<String> {
    match request {
        Frame::Array(parts) => parts
            .first()
            .and_then(Frame::as_bytes)
            .map(|name| String::from_utf8_lossy(name).to_ascii_uppercase()),
        _ => None,
    }
}

/// Arguments of a request (everything after the command name)
pub fn arguments(request: &Frame) -> impl Iterator<Item = &[u8]> {
    let parts: &[Frame] = match request {
        Frame::Array(parts) if !parts.is_empty() => &parts[1..],
        _ => &[],
    };
    parts.iter().filter_map(Frame::as_bytes)
}

/// Whether any argument of the request equals `key`
#[must_use]
pub fn has_argument(request: &Frame, key: &str) -> bool {
    arguments(request).any(|arg| arg == key.as_bytes())
}

/// Cluster commands whose replies advertise node addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyRequest {
    /// `CLUSTER SLOTS`: nested arrays of `[host, port, id, ...]`
    Slots,
    /// `CLUSTER NODES`, `CLUSTER REPLICAS`, `CLUSTER SLAVES`: text lines
    Nodes,
}

/// Classify a request as topology-bearing
#[must_use]
pub fn topology_request(request: &Frame) -> Option<TopologyRequest> {
    if command_name(request).as_deref() != Some("CLUSTER") {
        return None;
    }
    let sub = arguments(request).next()?;
    match String::from_utf8_lossy(sub).to_ascii_uppercase().as_str() {
        "SLOTS" => Some(TopologyRequest::Slots),
        "NODES" | "REPLICAS" | "SLAVES" => Some(TopologyRequest::Nodes),
        _ => None,
    }
}

/// What a session does with a request before touching the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Send it upstream
    Forward,
    /// Answer locally without touching the pool
    Reply(Frame),
    /// Answer locally, then close the client connection
    ReplyAndClose(Frame),
    /// Nothing to do (empty request)
    Ignore,
}

/// Decide how to treat a request given the database the pool is pinned to
#[must_use]
pub fn classify(request: &Frame, database: Option<u32>) -> Disposition {
    let Some(name) = command_name(request) else {
        return match request {
            Frame::Array(parts) if parts.is_empty() => Disposition::Ignore,
            _ => Disposition::Reply(proxy_error("invalid request, expected an array of strings")),
        };
    };

    match name.as_str() {
        "QUIT" => Disposition::ReplyAndClose(Frame::ok()),
        "SELECT" => select_reply(request, database),
        "HELLO" => Disposition::Reply(Frame::error(
            "NOPROTO this proxy only speaks RESP2",
        )),
        "SUBSCRIBE" | "PSUBSCRIBE" | "SSUBSCRIBE" | "MONITOR" => Disposition::Reply(proxy_error(
            &format!("{name} is not supported through a pooled connection"),
        )),
        _ => Disposition::Forward,
    }
}

/// `SELECT` is answered locally: every pooled connection is already on the
/// configured database and must stay there.
fn select_reply(request: &Frame, database: Option<u32>) -> Disposition {
    let requested = arguments(request)
        .next()
        .and_then(|arg| std::str::from_utf8(arg).ok())
        .and_then(|arg| arg.parse::<u32>().ok());
    let pinned = database.unwrap_or(0);

    match requested {
        Some(db) if db == pinned => Disposition::Reply(Frame::ok()),
        Some(db) => Disposition::Reply(proxy_error(&format!(
            "SELECT {db} rejected, this proxy is pinned to database {pinned}"
        ))),
        None => Disposition::Reply(proxy_error("SELECT requires a numeric database index")),
    }
}

/// Error reply generated by the proxy itself
#[must_use]
pub fn proxy_error(message: &str) -> Frame {
    Frame::error(format!("{ERROR_PREFIX} {message}"))
}
