//! Error taxonomy for streamed replies.

use parley_core::error::ParleyError;

use crate::frame::FrameError;
use crate::generation::GenerationError;
use crate::session::StreamState;

/// Ways a stream can terminate abnormally.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    /// The fragment source failed mid-stream. Nothing is persisted.
    #[error("generation failed: {0}")]
    Generation(String),
    /// The store rejected the final write. Already delivered fragments stand.
    #[error("persistence failed: {0}")]
    Persistence(String),
    /// The client went away or a write to it failed.
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("invalid stream transition from {from} to {to}")]
    InvalidTransition { from: StreamState, to: StreamState },
}

impl StreamError {
    /// Stable code sent in the `error` frame payload.
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::Generation(_) => "generation_failed",
            StreamError::Persistence(_) => "persistence_failed",
            StreamError::Transport(_) => "transport_failed",
            StreamError::InvalidTransition { .. } => "internal_error",
        }
    }
}

impl From<GenerationError> for StreamError {
    fn from(err: GenerationError) -> Self {
        StreamError::Generation(err.to_string())
    }
}

impl From<ParleyError> for StreamError {
    fn from(err: ParleyError) -> Self {
        StreamError::Persistence(err.to_string())
    }
}

impl From<FrameError> for StreamError {
    fn from(err: FrameError) -> Self {
        StreamError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            StreamError::Generation("x".into()).code(),
            "generation_failed"
        );
        assert_eq!(
            StreamError::Persistence("x".into()).code(),
            "persistence_failed"
        );
        assert_eq!(StreamError::Transport("x".into()).code(), "transport_failed");
    }

    #[test]
    fn test_display() {
        let err = StreamError::Generation("model crashed".to_string());
        assert_eq!(err.to_string(), "generation failed: model crashed");

        let err = StreamError::InvalidTransition {
            from: StreamState::Closed,
            to: StreamState::Streaming,
        };
        assert_eq!(
            err.to_string(),
            "invalid stream transition from Closed to Streaming"
        );
    }

    #[test]
    fn test_from_parley_error_is_persistence() {
        let err: StreamError = ParleyError::Persistence("FOREIGN KEY constraint failed".into()).into();
        assert!(matches!(err, StreamError::Persistence(ref m) if m.contains("FOREIGN KEY")));
    }

    #[test]
    fn test_from_generation_error() {
        let err: StreamError = GenerationError::Source("upstream reset".into()).into();
        assert_eq!(err.code(), "generation_failed");
        assert!(err.to_string().contains("upstream reset"));
    }
}
