//! Transport seam: where encoded frames go.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StreamError;

/// Destination for encoded frames.
///
/// `send` must hand the frame to the transport immediately; buffering that
/// delays already produced fragments breaks incremental delivery.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Write one encoded frame. Fails with `Transport` when the client is gone.
    async fn send(&mut self, frame: String) -> Result<(), StreamError>;

    /// Resolves once the client has disconnected.
    async fn closed(&self);

    fn is_closed(&self) -> bool;
}

/// Sink backed by a bounded channel whose receiver feeds the response body.
///
/// The body dropping its receiver is the disconnect signal.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// A sink and the receiver that drains it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: String) -> Result<(), StreamError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| StreamError::Transport("client disconnected".to_string()))
    }

    async fn closed(&self) {
        self.tx.closed().await
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_delivers_in_order() {
        let (mut sink, mut rx) = ChannelSink::channel(4);
        sink.send("a".to_string()).await.unwrap();
        sink.send("b".to_string()).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_send_after_disconnect_is_transport_error() {
        let (mut sink, rx) = ChannelSink::channel(4);
        drop(rx);
        assert!(sink.is_closed());
        let err = sink.send("late".to_string()).await.unwrap_err();
        assert_eq!(err.code(), "transport_failed");
    }

    #[tokio::test]
    async fn test_closed_resolves_on_disconnect() {
        let (sink, rx) = ChannelSink::channel(1);
        assert!(!sink.is_closed());
        drop(rx);
        tokio::time::timeout(std::time::Duration::from_secs(1), sink.closed())
            .await
            .expect("closed() should resolve once the receiver is gone");
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        // mpsc::channel panics on zero capacity
        let (sink, _rx) = ChannelSink::channel(0);
        assert!(!sink.is_closed());
    }
}
