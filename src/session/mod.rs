//! Client session management
//!
//! One [`ClientSession`] per accepted client. It reads requests in order,
//! answers the few commands that must not reach a shared connection,
//! forwards the rest through the pool and writes replies back in the order
//! the requests arrived. Pipelined batches are delegated to [`pipeline`].

pub mod error_classification;
pub mod pipeline;

pub use error_classification::ErrorClassifier;
pub use pipeline::{BatchEntry, Pipeline, PipelineState, Step};

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::connection_error::ConnectionError;
use crate::metrics::MetricsCollector;
use crate::pool::{PooledConnection, UpstreamPool};
use crate::protocol::{Disposition, Frame, FrameStream, ProtocolError, classify, proxy_error};
use crate::types::ClientId;

/// Post-processing applied to every upstream reply before it reaches the client
///
/// Standalone proxies have none; cluster proxies install a topology rewriter.
pub trait ReplyHook: Send + Sync + std::fmt::Debug {
    fn on_reply(&self, request: &Frame, reply: Frame) -> Frame;
}

/// Everything a session borrows from its proxy
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub label: Arc<str>,
    pub pool: UpstreamPool,
    pub hook: Option<Arc<dyn ReplyHook>>,
    pub database: Option<u32>,
    pub metrics: MetricsCollector,
}

/// Counters reported when a session ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Requests forwarded upstream (batch members included)
    pub forwarded: u64,
    /// Requests answered without touching the pool
    pub answered_locally: u64,
    /// Pipelined batches executed
    pub pipelines: u64,
    /// Requests that got a proxy error reply
    pub errors: u64,
}

/// Why the request loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    ClientClosed,
    Quit,
    Shutdown,
}

/// Represents an active client session
pub struct ClientSession {
    id: ClientId,
    peer: String,
    ctx: SessionContext,
    pipeline: Pipeline,
    held: Option<PooledConnection>,
    shutdown: watch::Receiver<bool>,
    stats: SessionStats,
}

impl ClientSession {
    /// Create a new client session
    ///
    /// The session stops once `shutdown` turns true or its sender is dropped.
    pub fn new(ctx: SessionContext, peer: impl Into<String>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            id: ClientId::new(),
            peer: peer.into(),
            ctx,
            pipeline: Pipeline::new(),
            held: None,
            shutdown,
            stats: SessionStats::default(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Serve the client until it leaves, sends `QUIT`, or shutdown is signalled
    ///
    /// Shutdown interrupts a client read or a checkout wait, never an
    /// exchange that already started upstream.
    pub async fn run<S>(mut self, stream: S) -> Result<SessionStats>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut client = FrameStream::client(stream);
        debug!(client = %self.id, peer = %self.peer, proxy = %self.ctx.label, "Session started");

        let outcome = self.serve(&mut client).await;

        // Nothing from an unfinished batch was written upstream
        if let Some(conn) = self.held.take() {
            self.ctx.pool.checkin(conn, true);
        }
        self.pipeline.abort();

        let exit = outcome?;
        debug!(
            client = %self.id,
            proxy = %self.ctx.label,
            forwarded = self.stats.forwarded,
            pipelines = self.stats.pipelines,
            ?exit,
            "Session finished"
        );
        Ok(self.stats)
    }

    async fn serve<S>(&mut self, client: &mut FrameStream<S>) -> Result<Exit>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let read = tokio::select! {
                biased;
                () = shutdown_requested(&mut self.shutdown) => return Ok(Exit::Shutdown),
                read = client.read_frame() => read,
            };

            let request = match read {
                Ok(Some(request)) => request,
                Ok(None) => return Ok(Exit::ClientClosed),
                Err(ProtocolError::Io(e)) => return Err(e.into()),
                Err(ProtocolError::UnexpectedEof) => return Err(ProtocolError::UnexpectedEof.into()),
                Err(e) => {
                    // The stream position is lost; report and hang up
                    let reply = Frame::error(format!("ERR Protocol error: {e}"));
                    let _ = client.write_frame(&reply).await;
                    let _ = client.flush().await;
                    return Err(e.into());
                }
            };

            if let Some(exit) = self.handle(request, client).await? {
                return Ok(exit);
            }
        }
    }

    /// Process one request; `Some` ends the session
    async fn handle<S>(&mut self, request: Frame, client: &mut FrameStream<S>) -> Result<Option<Exit>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match classify(&request, self.ctx.database) {
            Disposition::Ignore => Ok(None),
            Disposition::Reply(reply) => {
                self.stats.answered_locally += 1;
                if self.pipeline.is_collecting() {
                    self.pipeline.queue_local(reply);
                } else {
                    write_and_flush(client, &reply).await?;
                }
                Ok(None)
            }
            Disposition::ReplyAndClose(reply) => {
                self.stats.answered_locally += 1;
                if self.pipeline.is_collecting() {
                    // Requests queued ahead of it are still owed their replies
                    let batch = self.pipeline.close_early(reply);
                    self.execute_batch(batch, client).await?;
                } else {
                    write_and_flush(client, &reply).await?;
                }
                Ok(Some(Exit::Quit))
            }
            Disposition::Forward => {
                match self.pipeline.accept(request) {
                    Step::Single(request) => self.forward_one(request, client).await?,
                    Step::Begin => self.begin_batch(client).await?,
                    Step::Queued => {}
                    Step::Execute(batch) => self.execute_batch(batch, client).await?,
                }
                Ok(None)
            }
        }
    }

    /// Normal mode: checkout, one round trip, checkin, reply
    async fn forward_one<S>(&mut self, request: Frame, client: &mut FrameStream<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut conn = match self.checkout().await {
            Ok(conn) => conn,
            Err(e) => {
                let reply = self.error_reply(&e);
                return write_and_flush(client, &reply).await;
            }
        };

        self.stats.forwarded += 1;
        self.ctx.metrics.record_requests(&self.ctx.label, 1);

        let reply = match conn.round_trip(&request).await {
            Ok(reply) => {
                self.ctx.pool.checkin(conn, true);
                self.apply_hook(&request, reply)
            }
            Err(e) => {
                let healthy = !e.marks_unhealthy();
                self.ctx.pool.checkin(conn, healthy);
                self.error_reply(&e)
            }
        };

        write_and_flush(client, &reply).await
    }

    /// Start signal seen: hold one connection for the whole batch
    async fn begin_batch<S>(&mut self, client: &mut FrameStream<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.checkout().await {
            Ok(conn) => {
                debug!(client = %self.id, conn_id = conn.id(), "Pipeline started");
                self.held = Some(conn);
                Ok(())
            }
            Err(e) => {
                let reply = self.error_reply(&e);
                for _ in self.pipeline.abort() {
                    client.write_frame(&reply).await?;
                }
                client.flush().await?;
                Ok(())
            }
        }
    }

    /// End signal seen: write the batch back-to-back, relay replies FIFO
    async fn execute_batch<S>(&mut self, batch: Vec<BatchEntry>, client: &mut FrameStream<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let held = match self.held.take() {
            Some(conn) => Ok(conn),
            None => self.checkout().await,
        };
        let mut conn = match held {
            Ok(conn) => conn,
            Err(e) => {
                let reply = self.error_reply(&e);
                for entry in &batch {
                    match entry {
                        BatchEntry::Local(local) => client.write_frame(local).await?,
                        BatchEntry::Upstream(_) => client.write_frame(&reply).await?,
                    }
                }
                client.flush().await?;
                self.pipeline.finish();
                return Ok(());
            }
        };

        let requests: Vec<Frame> = batch.iter().filter_map(BatchEntry::upstream).cloned().collect();
        let count = requests.len();
        self.stats.forwarded += count as u64;
        self.stats.pipelines += 1;
        self.ctx.metrics.record_requests(&self.ctx.label, count as u64);
        self.ctx.metrics.pipeline_executed(count);

        let mut failure: Option<ConnectionError> = conn.send(&requests).await.err();
        let mut failure_reply: Option<Frame> = failure.as_ref().map(|e| self.error_reply(e));

        for entry in &batch {
            let reply = match entry {
                BatchEntry::Local(local) => local.clone(),
                BatchEntry::Upstream(request) => match &failure_reply {
                    Some(reply) => reply.clone(),
                    None => match conn.receive().await {
                        Ok(reply) => self.apply_hook(request, reply),
                        Err(e) => {
                            let reply = self.error_reply(&e);
                            failure_reply = Some(reply.clone());
                            failure = Some(e);
                            reply
                        }
                    },
                },
            };

            if let Err(e) = client.write_frame(&reply).await {
                // Replies still pending upstream; the connection is out of step
                self.ctx.pool.checkin(conn, false);
                self.pipeline.finish();
                return Err(e.into());
            }
        }

        if failure.is_none() {
            failure = conn.ensure_drained().err();
            if let Some(e) = &failure {
                self.record_connection_error(e);
            }
        }

        match &failure {
            None => debug!(client = %self.id, conn_id = conn.id(), commands = count, "Pipeline drained"),
            Some(e) => warn!(client = %self.id, conn_id = conn.id(), error = %e, "Pipeline failed, discarding connection"),
        }

        self.ctx.pool.checkin(conn, failure.is_none());
        self.pipeline.finish();
        client.flush().await?;
        Ok(())
    }

    /// Pool checkout that gives up as soon as shutdown is signalled
    async fn checkout(&mut self) -> Result<PooledConnection, ConnectionError> {
        tokio::select! {
            biased;
            () = shutdown_requested(&mut self.shutdown) => Err(ConnectionError::PoolClosed {
                target: self.ctx.pool.name().to_string(),
            }),
            result = self.ctx.pool.checkout() => result,
        }
    }

    fn apply_hook(&self, request: &Frame, reply: Frame) -> Frame {
        match &self.ctx.hook {
            Some(hook) => hook.on_reply(request, reply),
            None => reply,
        }
    }

    /// Log and count an upstream failure, returning the client's error reply
    fn error_reply(&mut self, error: &ConnectionError) -> Frame {
        self.stats.errors += 1;
        self.record_connection_error(error);
        proxy_error(&error.client_message())
    }

    fn record_connection_error(&self, error: &ConnectionError) {
        match error {
            ConnectionError::Desync => self.ctx.metrics.desync_detected(),
            e if e.marks_unhealthy() => self.ctx.metrics.transport_error(),
            _ => {}
        }
        if !error.is_pool_exhausted() {
            self.ctx.metrics.record_upstream_error(&self.ctx.label);
        }

        match error.log_level() {
            tracing::Level::DEBUG => debug!(client = %self.id, proxy = %self.ctx.label, error = %error, "Upstream request failed"),
            _ => warn!(client = %self.id, proxy = %self.ctx.label, error = %error, "Upstream request failed"),
        }
    }
}

/// Resolves once shutdown is signalled or the proxy dropped its sender
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn write_and_flush<S>(client: &mut FrameStream<S>, reply: &Frame) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    client.write_frame(reply).await?;
    client.flush().await?;
    Ok(())
}
