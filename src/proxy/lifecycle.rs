//! Bind, accept loop, and shutdown sequencing

use std::sync::PoisonError;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{Proxy, ProxyError, ProxyState};
use crate::address::LocalAddress;
use crate::constants::listener::ACCEPT_ERROR_BACKOFF;
use crate::network::Listener;
use crate::session::{ClientSession, ErrorClassifier, shutdown_requested};
use crate::stream::ConnectionStream;

impl Proxy {
    /// Bind the listener without accepting yet
    ///
    /// Lets a supervisor surface every bind failure before any proxy starts
    /// serving. Binding twice returns the address bound first.
    ///
    /// # Errors
    /// [`ProxyError::Bind`] if the address cannot be bound,
    /// [`ProxyError::InvalidState`] once the proxy has started
    pub async fn bind(&self) -> Result<LocalAddress, ProxyError> {
        let state = self.state();
        if state != ProxyState::Created {
            return Err(ProxyError::InvalidState {
                operation: "bind",
                state,
            });
        }

        let mut slot = self.inner.listener.lock().await;
        if let (Some(_), Some(address)) = (slot.as_ref(), self.local_address()) {
            return Ok(address);
        }

        let listener = self.bind_listener().await?;
        let address = listener
            .local_address()
            .map_err(|source| self.bind_error(source))?;
        *self.inner.local_address.lock().unwrap_or_else(PoisonError::into_inner) = Some(address.clone());
        *slot = Some(listener);

        info!(
            proxy = %self.label(),
            listen = %address,
            upstream = %self.pool().target(),
            "Proxy listening"
        );
        Ok(address)
    }

    async fn bind_listener(&self) -> Result<Listener, ProxyError> {
        Listener::bind(&self.inner.bind_address, self.inner.unlink)
            .await
            .map_err(|source| self.bind_error(source))
    }

    fn bind_error(&self, source: std::io::Error) -> ProxyError {
        ProxyError::Bind {
            address: self.inner.bind_address.to_string(),
            source,
        }
    }

    /// Serve clients until [`shutdown`](Self::shutdown) is called
    ///
    /// Binds first if [`bind`](Self::bind) was not called, prewarms the pool
    /// in the background, then accepts clients and spawns one session each.
    /// Returns once every session has finished and the pool is closed.
    ///
    /// # Errors
    /// [`ProxyError::Bind`] if binding fails, [`ProxyError::InvalidState`]
    /// if the proxy already ran or was shut down
    pub async fn run(&self) -> Result<(), ProxyError> {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != ProxyState::Created {
                return Err(ProxyError::InvalidState {
                    operation: "run",
                    state: *state,
                });
            }
            *state = ProxyState::Running;
        }

        let bound = self.inner.listener.lock().await.take();
        let listener = match bound {
            Some(listener) => listener,
            None => match self.bind_listener().await {
                Ok(listener) => {
                    if let Ok(address) = listener.local_address() {
                        info!(proxy = %self.label(), listen = %address, "Proxy listening");
                        *self.inner.local_address.lock().unwrap_or_else(PoisonError::into_inner) = Some(address);
                    }
                    listener
                }
                Err(e) => {
                    self.pool().close();
                    self.finish();
                    return Err(e);
                }
            },
        };

        let pool = self.pool().clone();
        let prewarm = tokio::spawn(async move {
            pool.prewarm().await;
        });

        let mut sessions = JoinSet::new();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                biased;
                () = shutdown_requested(&mut shutdown_rx) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(&mut sessions, stream, peer),
                    Err(e) => {
                        warn!(proxy = %self.label(), error = %e, "Failed to accept client");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        // Stop accepting first; a unix listener removes its socket file on drop
        drop(listener);
        prewarm.abort();

        debug!(proxy = %self.label(), sessions = sessions.len(), "Waiting for sessions to finish");
        while sessions.join_next().await.is_some() {}

        self.pool().graceful_shutdown().await;
        self.finish();
        info!(proxy = %self.label(), "Proxy stopped");
        Ok(())
    }

    fn spawn_session(&self, sessions: &mut JoinSet<()>, stream: ConnectionStream, peer: String) {
        let ctx = self.inner.session.clone();
        let metrics = ctx.metrics.clone();
        let session = ClientSession::new(ctx, peer, self.inner.shutdown_tx.subscribe());
        let client = session.id();
        let label = self.label().to_string();

        metrics.client_connected();
        sessions.spawn(async move {
            let result = session.run(stream).await;
            metrics.client_disconnected();

            if let Err(e) = result {
                match ErrorClassifier::log_level(&e) {
                    tracing::Level::DEBUG => debug!(proxy = %label, client = %client, error = %e, "Client session ended"),
                    tracing::Level::INFO => info!(proxy = %label, client = %client, error = %e, "Client session ended"),
                    _ => warn!(proxy = %label, client = %client, error = %e, "Client session failed"),
                }
            }
        });
    }

    /// Stop the proxy and wait until it is fully stopped
    ///
    /// Stops accepting, removes the listener, lets every session finish its
    /// in-flight exchange, then drains the pool. A proxy that never ran goes
    /// straight to `Stopped`. Safe to call repeatedly and concurrently.
    pub async fn shutdown(&self) {
        let previous = {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = *state;
            match previous {
                ProxyState::Created => *state = ProxyState::Stopped,
                ProxyState::Running => *state = ProxyState::ShuttingDown,
                ProxyState::ShuttingDown | ProxyState::Stopped => {}
            }
            previous
        };

        match previous {
            ProxyState::Created => {
                self.inner.listener.lock().await.take();
                self.inner.shutdown_tx.send_replace(true);
                self.pool().close();
                self.inner.stopped_tx.send_replace(true);
                debug!(proxy = %self.label(), "Stopped proxy that never ran");
            }
            ProxyState::Running => {
                info!(proxy = %self.label(), "Shutting down proxy");
                self.inner.shutdown_tx.send_replace(true);
                self.wait_stopped().await;
            }
            ProxyState::ShuttingDown | ProxyState::Stopped => self.wait_stopped().await,
        }
    }

    /// Wait until the proxy reaches `Stopped`
    pub async fn wait_stopped(&self) {
        let mut stopped = self.inner.stopped_tx.subscribe();
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }

    fn finish(&self) {
        self.transition(ProxyState::Stopped);
        self.inner.stopped_tx.send_replace(true);
    }
}
