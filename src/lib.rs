//! # redis-local-proxy
//!
//! Local-socket connection pooling proxy for Redis-compatible stores.
//!
//! Every configured upstream gets a proxy: a unix (or TCP) listener whose
//! clients share a bounded pool of upstream connections. A connection is
//! held by a client only for one command, or for a whole pipeline opened
//! with the `🔜` signal key and closed with `🔚`. Clustered upstreams get one
//! proxy per node, and topology replies are rewritten to point clients at
//! those local proxies.
//!
//! The [`ProxySupervisor`] builds and owns every proxy of a process;
//! [`Proxy`] can also be used on its own.

pub mod address;
pub mod args;
pub mod cluster;
pub mod config;
pub mod connection_error;
pub mod constants;
pub mod logging;
pub mod metrics;
pub mod network;
pub mod pool;
pub mod protocol;
pub mod proxy;
pub mod runtime;
pub mod session;
pub mod stream;
pub mod supervisor;
pub mod types;

pub use address::{LocalAddress, local_socket_path};
pub use args::Args;
pub use config::{Config, UpstreamConfig, load_config};
pub use connection_error::ConnectionError;
pub use logging::init_logging;
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use network::{BindAddress, Network};
pub use pool::{Family, UpstreamPool, UpstreamTarget};
pub use protocol::Frame;
pub use proxy::{Proxy, ProxyBuilder, ProxyError, ProxyState};
pub use runtime::{RuntimeConfig, shutdown_signal};
pub use supervisor::ProxySupervisor;
