//! Proxy implementation
//!
//! A [`Proxy`] is one client-facing listener in front of one upstream pool.
//! Clients are served by [`ClientSession`](crate::session::ClientSession)
//! tasks; the proxy owns their shutdown signal and waits for them on stop.
//!
//! ## Module structure
//!
//! - [`builder`]: Builder pattern for constructing proxy instances
//! - `lifecycle`: bind, accept loop, and shutdown sequencing

mod builder;
mod error;
mod lifecycle;

pub use builder::ProxyBuilder;
pub use error::ProxyError;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

use crate::address::LocalAddress;
use crate::network::{BindAddress, Listener};
use crate::pool::{UpstreamPool, UpstreamTarget};
use crate::session::SessionContext;

/// Lifecycle of a proxy; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProxyState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// One listener plus one upstream pool
///
/// Cheap to clone; clones share the same listener, pool and state.
#[derive(Debug, Clone)]
pub struct Proxy {
    pub(super) inner: Arc<ProxyInner>,
}

#[derive(Debug)]
pub(super) struct ProxyInner {
    pub(super) session: SessionContext,
    pub(super) bind_address: BindAddress,
    pub(super) unlink: bool,
    pub(super) state: Mutex<ProxyState>,
    /// Bound but not yet accepting; `run` takes it
    pub(super) listener: tokio::sync::Mutex<Option<Listener>>,
    pub(super) local_address: Mutex<Option<LocalAddress>>,
    /// Flipped to true once to stop the accept loop and every session
    pub(super) shutdown_tx: watch::Sender<bool>,
    /// Flipped to true once the proxy reaches `Stopped`
    pub(super) stopped_tx: watch::Sender<bool>,
}

impl Proxy {
    /// Create a builder for a proxy fronting `target` and listening on `bind_address`
    #[must_use]
    pub fn builder(target: UpstreamTarget, bind_address: BindAddress) -> ProxyBuilder {
        ProxyBuilder::new(target, bind_address)
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.session.label
    }

    #[must_use]
    pub fn state(&self) -> ProxyState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn bind_address(&self) -> &BindAddress {
        &self.inner.bind_address
    }

    /// Address actually bound, once [`bind`](Self::bind) succeeded
    #[must_use]
    pub fn local_address(&self) -> Option<LocalAddress> {
        self.inner
            .local_address
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn pool(&self) -> &UpstreamPool {
        &self.inner.session.pool
    }

    /// Move to `next`, returning the state it replaced
    pub(super) fn transition(&self, next: ProxyState) -> ProxyState {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *state, next)
    }
}
