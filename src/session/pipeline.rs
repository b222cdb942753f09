//! Client-driven pipelining
//!
//! A client opens a batch with a request carrying [`SIGNAL_START_KEY`] as an
//! argument and closes it with one carrying [`SIGNAL_END_KEY`]. Everything
//! in between is held back and then written to a single upstream connection
//! back-to-back, so no other client's command can interleave.
//!
//! This module is the pure state machine; the session owns the connection
//! and does the I/O.

use crate::constants::pipeline::{SIGNAL_END_KEY, SIGNAL_START_KEY};
use crate::protocol::{Frame, has_argument};

/// Where the session is in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Requests are forwarded one at a time
    Idle,
    /// Requests are queued until the end signal
    Collecting,
    /// The queued batch is being executed
    Draining,
}

/// One request slot in a batch, in client order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEntry {
    /// Sent upstream; its reply is relayed
    Upstream(Frame),
    /// Answered by the proxy itself, in position
    Local(Frame),
}

impl BatchEntry {
    /// The request to send upstream, if any
    #[must_use]
    pub fn upstream(&self) -> Option<&Frame> {
        match self {
            Self::Upstream(frame) => Some(frame),
            Self::Local(_) => None,
        }
    }
}

/// What the session has to do after feeding a request in
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    /// Not part of a batch: forward it on its own
    Single(Frame),
    /// A batch opened: check out and hold a connection
    Begin,
    /// Queued behind the start signal; nothing to send yet
    Queued,
    /// The batch is complete: execute it on the held connection
    Execute(Vec<BatchEntry>),
}

/// Batch state of one client session
#[derive(Debug)]
pub struct Pipeline {
    state: PipelineState,
    queue: Vec<BatchEntry>,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            queue: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    #[must_use]
    pub fn is_collecting(&self) -> bool {
        self.state == PipelineState::Collecting
    }

    /// Requests queued so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Feed in a request bound for the upstream
    pub fn accept(&mut self, request: Frame) -> Step {
        let starts = has_argument(&request, SIGNAL_START_KEY);
        let ends = has_argument(&request, SIGNAL_END_KEY);

        match self.state {
            PipelineState::Idle | PipelineState::Draining => {
                self.queue.clear();
                if !starts {
                    self.state = PipelineState::Idle;
                    return Step::Single(request);
                }
                self.queue.push(BatchEntry::Upstream(request));
                if ends {
                    // Start and end on the same request: a batch of one
                    self.state = PipelineState::Draining;
                    Step::Execute(std::mem::take(&mut self.queue))
                } else {
                    self.state = PipelineState::Collecting;
                    Step::Begin
                }
            }
            PipelineState::Collecting => {
                self.queue.push(BatchEntry::Upstream(request));
                if ends {
                    self.state = PipelineState::Draining;
                    Step::Execute(std::mem::take(&mut self.queue))
                } else {
                    Step::Queued
                }
            }
        }
    }

    /// Queue a locally generated reply in position (only while collecting)
    pub fn queue_local(&mut self, reply: Frame) {
        debug_assert!(self.is_collecting(), "local replies are only queued inside a batch");
        self.queue.push(BatchEntry::Local(reply));
    }

    /// End the batch early on a request that closes the session
    ///
    /// `reply` answers the closing request after everything queued ahead
    /// of it; the returned batch is executed like a complete one.
    pub fn close_early(&mut self, reply: Frame) -> Vec<BatchEntry> {
        self.queue.push(BatchEntry::Local(reply));
        self.state = PipelineState::Draining;
        std::mem::take(&mut self.queue)
    }

    /// Abandon the batch, returning whatever was queued
    pub fn abort(&mut self) -> Vec<BatchEntry> {
        self.state = PipelineState::Idle;
        std::mem::take(&mut self.queue)
    }

    /// The executed batch has been relayed
    pub fn finish(&mut self) {
        self.state = PipelineState::Idle;
        self.queue.clear();
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
