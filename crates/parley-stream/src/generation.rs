//! Generation sources: the collaborators that produce reply fragments.
//!
//! A source hands back a lazy, finite [`FragmentStream`]. Dropping the
//! stream is how a consumer cancels generation; sources must release their
//! resources when that happens.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::debug;
use uuid::Uuid;

use parley_core::types::Message;

/// Errors raised by a generation source while producing fragments.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("generation source failed: {0}")]
    Source(String),
}

/// Lazy sequence of reply fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// Everything a source needs to produce a reply.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub conversation_id: Uuid,
    /// The user message being answered.
    pub prompt: String,
    /// Recent conversation turns, oldest first. Includes the prompt itself.
    pub history: Vec<Message>,
}

impl GenerationRequest {
    pub fn new(conversation_id: Uuid, prompt: impl Into<String>) -> Self {
        Self {
            conversation_id,
            prompt: prompt.into(),
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

/// Produces reply fragments for a request.
pub trait GenerationSource: Send + Sync {
    fn generate(&self, request: GenerationRequest) -> FragmentStream;
}

/// Replays a fixed list of fragments, optionally failing afterwards.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    fragments: Vec<String>,
    failure: Option<String>,
}

impl ScriptedSource {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            failure: None,
        }
    }

    /// Yield the fragments, then fail with `detail`.
    pub fn failing_after<I, S>(fragments: I, detail: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failure: Some(detail.into()),
            ..Self::new(fragments)
        }
    }
}

impl GenerationSource for ScriptedSource {
    fn generate(&self, _request: GenerationRequest) -> FragmentStream {
        let mut items: Vec<Result<String, GenerationError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if let Some(ref detail) = self.failure {
            items.push(Err(GenerationError::Source(detail.clone())));
        }
        Box::pin(tokio_stream::iter(items))
    }
}

/// Echoes the prompt back word by word from a background producer task.
///
/// The producer stops as soon as the consumer drops its stream.
#[derive(Debug, Clone)]
pub struct EchoSource {
    delay: Duration,
    buffer: usize,
    active: Arc<AtomicUsize>,
}

impl EchoSource {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            buffer: 1,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of producer tasks still running.
    pub fn active_producers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// The full reply produced for a prompt.
    pub fn reply_for(prompt: &str) -> String {
        format!("You said: {}", prompt.trim())
    }
}

/// Decrements the live-producer count when the task ends, however it ends.
struct ProducerGuard(Arc<AtomicUsize>);

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl GenerationSource for EchoSource {
    fn generate(&self, request: GenerationRequest) -> FragmentStream {
        let (tx, rx) = mpsc::channel(self.buffer);
        let delay = self.delay;
        let reply = Self::reply_for(&request.prompt);

        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ProducerGuard(Arc::clone(&self.active));

        tokio::spawn(async move {
            let _guard = guard;
            for word in reply.split_inclusive(' ') {
                if tx.send(Ok(word.to_string())).await.is_err() {
                    debug!(conversation_id = %request.conversation_id, "Echo consumer dropped, stopping");
                    return;
                }
                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = tx.closed() => {
                            debug!(conversation_id = %request.conversation_id, "Echo consumer dropped, stopping");
                            return;
                        }
                    }
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}
