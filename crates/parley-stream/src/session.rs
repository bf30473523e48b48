//! Per-request stream session and its state machine.
//!
//! Valid transitions:
//! - Open -> Streaming (first pull from the generation source)
//! - Streaming -> Finalizing (source exhausted, persisting the reply)
//! - Finalizing -> Closed (done frame written)
//! - Streaming | Finalizing -> Failed -> Closed (error frame written)
//! - Open | Streaming | Finalizing -> Cancelled -> Closed (client gone)

use std::fmt;

use tracing::debug;
use uuid::Uuid;

use crate::error::StreamError;
use crate::frame::{EventFrame, StreamEvent};

/// Lifecycle state of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Session created, nothing emitted yet.
    Open,
    /// Relaying fragments as `delta` frames.
    Streaming,
    /// Source exhausted; persisting the assembled reply.
    Finalizing,
    /// Terminated abnormally; an `error` frame is being emitted.
    Failed,
    /// Client disconnected; nothing more is emitted or persisted.
    Cancelled,
    /// Transport closed. No frames may follow.
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamState::Open => write!(f, "Open"),
            StreamState::Streaming => write!(f, "Streaming"),
            StreamState::Finalizing => write!(f, "Finalizing"),
            StreamState::Failed => write!(f, "Failed"),
            StreamState::Cancelled => write!(f, "Cancelled"),
            StreamState::Closed => write!(f, "Closed"),
        }
    }
}

impl StreamState {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &StreamState) -> bool {
        matches!(
            (self, target),
            (StreamState::Open, StreamState::Streaming)
                | (StreamState::Streaming, StreamState::Finalizing)
                | (StreamState::Finalizing, StreamState::Closed)
                // Error path
                | (StreamState::Streaming, StreamState::Failed)
                | (StreamState::Finalizing, StreamState::Failed)
                | (StreamState::Failed, StreamState::Closed)
                // Cancellation path
                | (StreamState::Open, StreamState::Cancelled)
                | (StreamState::Streaming, StreamState::Cancelled)
                | (StreamState::Finalizing, StreamState::Cancelled)
                | (StreamState::Cancelled, StreamState::Closed)
        )
    }

    /// Whether frames may still be emitted in this state.
    pub fn can_emit(&self) -> bool {
        matches!(
            self,
            StreamState::Streaming | StreamState::Finalizing | StreamState::Failed
        )
    }
}

/// In-memory state of one streaming request. Never persisted.
#[derive(Debug)]
pub struct StreamSession {
    id: Uuid,
    conversation_id: Uuid,
    content: String,
    seq: u64,
    delivered: u64,
    state: StreamState,
}

impl StreamSession {
    pub fn new(conversation_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            content: String::new(),
            seq: 0,
            delivered: 0,
            state: StreamState::Open,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// The reply assembled so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Number of frames built so far, including any that failed to send.
    pub fn frames_emitted(&self) -> u64 {
        self.seq
    }

    /// Number of frames the transport accepted.
    pub fn frames_delivered(&self) -> u64 {
        self.delivered
    }

    /// Record that the transport accepted the most recent frame.
    pub fn record_delivery(&mut self) {
        self.delivered += 1;
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Move to `target`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, target: StreamState) -> Result<(), StreamError> {
        if !self.state.can_transition_to(&target) {
            return Err(StreamError::InvalidTransition {
                from: self.state,
                to: target,
            });
        }
        debug!(session_id = %self.id, from = %self.state, to = %target, "Stream state transition");
        self.state = target;
        Ok(())
    }

    /// Append a fragment and build its `delta` frame.
    pub fn push_fragment(&mut self, fragment: String) -> Result<EventFrame, StreamError> {
        let frame = self.next_frame(StreamEvent::delta(fragment.as_str()))?;
        self.content.push_str(&fragment);
        Ok(frame)
    }

    /// Assign the next sequence number to an event.
    pub fn next_frame(&mut self, event: StreamEvent) -> Result<EventFrame, StreamError> {
        if !self.state.can_emit() {
            return Err(StreamError::Transport(format!(
                "cannot emit {} frame in state {}",
                event.name(),
                self.state
            )));
        }
        self.seq += 1;
        Ok(EventFrame {
            seq: self.seq,
            event,
        })
    }
}
