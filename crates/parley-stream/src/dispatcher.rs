//! Stream dispatcher: one instance drives one streaming request.
//!
//! Fragments are relayed as `delta` frames the moment they arrive. When the
//! source is exhausted the assembled reply is persisted in a single unit of
//! work and a `done` frame carrying its ID closes the stream. A failing
//! source or store ends the stream with an `error` frame instead. A client
//! disconnect observed at any point cancels the stream: the source is
//! dropped and nothing is persisted.

use std::sync::Arc;

use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parley_core::types::{Message, NewMessage, Role};
use parley_storage::MessageStore;

use crate::error::StreamError;
use crate::frame::{encode, EventFrame, StreamEvent};
use crate::generation::{FragmentStream, GenerationRequest, GenerationSource};
use crate::session::{StreamSession, StreamState};
use crate::sink::FrameSink;

/// How a stream ended. Frame counts include only frames the sink accepted.
#[derive(Debug)]
pub enum StreamOutcome {
    /// Every fragment was delivered, the reply is committed and `done` was sent.
    Completed { message: Message, frames: u64 },
    /// An `error` frame ended the stream. Nothing was persisted.
    Failed { error: StreamError, frames: u64 },
    /// The client went away. Nothing was persisted.
    Cancelled { delivered: u64 },
}

impl StreamOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, StreamOutcome::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamOutcome::Cancelled { .. })
    }
}

/// Drives stream sessions against the message store.
#[derive(Clone)]
pub struct StreamDispatcher {
    messages: Arc<MessageStore>,
}

/// Result of waiting for the next fragment.
enum Pulled {
    Fragment(String),
    Failed(StreamError),
    Exhausted,
    Disconnected,
}

impl StreamDispatcher {
    pub fn new(messages: Arc<MessageStore>) -> Self {
        Self { messages }
    }

    /// Generate a reply for `request` and stream it to `sink`.
    pub async fn dispatch<S: FrameSink>(
        &self,
        request: GenerationRequest,
        source: &dyn GenerationSource,
        sink: &mut S,
    ) -> StreamOutcome {
        let conversation_id = request.conversation_id;
        let fragments = source.generate(request);
        self.run(conversation_id, fragments, sink).await
    }

    /// Stream `fragments` to `sink` and persist the result in `conversation_id`.
    pub async fn run<S: FrameSink>(
        &self,
        conversation_id: Uuid,
        mut fragments: FragmentStream,
        sink: &mut S,
    ) -> StreamOutcome {
        let mut session = StreamSession::new(conversation_id);
        info!(
            session_id = %session.id(),
            conversation_id = %conversation_id,
            "Stream session opened"
        );

        if let Err(e) = session.transition(StreamState::Streaming) {
            return self.fail(&mut session, sink, e).await;
        }

        loop {
            let pulled = tokio::select! {
                biased;
                _ = sink.closed() => Pulled::Disconnected,
                item = fragments.next() => match item {
                    Some(Ok(fragment)) => Pulled::Fragment(fragment),
                    Some(Err(e)) => Pulled::Failed(e.into()),
                    None => Pulled::Exhausted,
                },
            };

            match pulled {
                Pulled::Fragment(fragment) => {
                    let frame = match session.push_fragment(fragment) {
                        Ok(frame) => frame,
                        Err(e) => return self.fail(&mut session, sink, e).await,
                    };
                    if let Err(e) = emit(sink, &frame).await {
                        drop(fragments);
                        return cancel(&mut session, e);
                    }
                    session.record_delivery();
                }
                Pulled::Failed(e) => {
                    drop(fragments);
                    return self.fail(&mut session, sink, e).await;
                }
                Pulled::Disconnected => {
                    drop(fragments);
                    return cancel(
                        &mut session,
                        StreamError::Transport("client disconnected".to_string()),
                    );
                }
                Pulled::Exhausted => break,
            }
        }
        drop(fragments);

        self.finalize(session, sink).await
    }

    /// Persist the assembled reply and emit `done`.
    async fn finalize<S: FrameSink>(
        &self,
        mut session: StreamSession,
        sink: &mut S,
    ) -> StreamOutcome {
        if let Err(e) = session.transition(StreamState::Finalizing) {
            return self.fail(&mut session, sink, e).await;
        }

        if sink.is_closed() {
            return cancel(
                &mut session,
                StreamError::Transport("client disconnected before persistence".to_string()),
            );
        }

        let message = match self.persist(&session).await {
            Ok(message) => message,
            Err(e) => return self.fail(&mut session, sink, e).await,
        };

        let done = session.next_frame(StreamEvent::Done {
            message_id: message.id,
        });
        let sent = match done {
            Ok(frame) => emit(sink, &frame).await,
            Err(e) => Err(e),
        };

        if let Err(e) = sent {
            // The client never saw `done`, so the reply must not survive.
            self.retract(&session, message.id).await;
            return cancel(&mut session, e);
        }

        session.record_delivery();
        close(&mut session);
        info!(
            session_id = %session.id(),
            message_id = %message.id,
            frames = session.frames_delivered(),
            "Stream completed"
        );
        StreamOutcome::Completed {
            frames: session.frames_delivered(),
            message,
        }
    }

    /// Run the store write on the blocking pool.
    async fn persist(&self, session: &StreamSession) -> Result<Message, StreamError> {
        let new = NewMessage::new(
            session.conversation_id(),
            Role::Assistant,
            session.content(),
        )
        .with_metadata(serde_json::json!({
            "stream_session_id": session.id(),
            "fragments": session.frames_emitted(),
        }));
        let store = Arc::clone(&self.messages);

        tokio::task::spawn_blocking(move || store.persist(&new))
            .await
            .map_err(|e| StreamError::Persistence(format!("persistence task failed: {}", e)))?
            .map_err(StreamError::from)
    }

    async fn retract(&self, session: &StreamSession, message_id: Uuid) {
        let store = Arc::clone(&self.messages);
        let result = tokio::task::spawn_blocking(move || store.delete(message_id)).await;

        match result {
            Ok(Ok(_)) => {
                warn!(
                    session_id = %session.id(),
                    message_id = %message_id,
                    "Client left before done, persisted reply retracted"
                );
            }
            Ok(Err(e)) => {
                error!(session_id = %session.id(), message_id = %message_id, error = %e, "Failed to retract reply");
            }
            Err(e) => {
                error!(session_id = %session.id(), message_id = %message_id, error = %e, "Retract task failed");
            }
        }
    }

    /// Emit a best-effort `error` frame and close.
    async fn fail<S: FrameSink>(
        &self,
        session: &mut StreamSession,
        sink: &mut S,
        cause: StreamError,
    ) -> StreamOutcome {
        warn!(
            session_id = %session.id(),
            code = cause.code(),
            error = %cause,
            "Stream failed"
        );

        if session.transition(StreamState::Failed).is_ok() {
            let frame = session.next_frame(StreamEvent::Error {
                code: cause.code().to_string(),
                detail: cause.to_string(),
            });
            if let Ok(frame) = frame {
                match emit(sink, &frame).await {
                    Ok(()) => session.record_delivery(),
                    Err(e) => {
                        debug!(session_id = %session.id(), error = %e, "Error frame not delivered")
                    }
                }
            }
        }

        close(session);
        StreamOutcome::Failed {
            error: cause,
            frames: session.frames_delivered(),
        }
    }
}

async fn emit<S: FrameSink>(sink: &mut S, frame: &EventFrame) -> Result<(), StreamError> {
    let wire = encode(frame)?;
    sink.send(wire).await?;
    debug!(seq = frame.seq, event = %frame.event.name(), "Frame emitted");
    Ok(())
}

fn cancel(session: &mut StreamSession, cause: StreamError) -> StreamOutcome {
    if let Err(e) = session.transition(StreamState::Cancelled) {
        debug!(session_id = %session.id(), error = %e, "Cancel from unexpected state");
    }
    close(session);
    info!(
        session_id = %session.id(),
        delivered = session.frames_delivered(),
        reason = %cause,
        "Stream cancelled"
    );
    StreamOutcome::Cancelled {
        delivered: session.frames_delivered(),
    }
}

fn close(session: &mut StreamSession) {
    if let Err(e) = session.transition(StreamState::Closed) {
        debug!(session_id = %session.id(), error = %e, "Close from unexpected state");
    }
}
