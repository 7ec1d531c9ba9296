//! Consumer-facing message stream.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::Stream;

/// Decoded messages for one topic, from the moment of subscription on.
///
/// Ends when the topic's last consumer unsubscribes, on
/// [`unsubscribe_all`](super::RealtimeMultiplexer::unsubscribe_all), or when
/// the multiplexer shuts down. After `unsubscribe_all` no message is yielded,
/// even one that was already buffered.
pub struct MessageStream {
    topic: String,
    rx: mpsc::UnboundedReceiver<Value>,
    epoch: u64,
    cutoff: Arc<AtomicU64>,
}

impl MessageStream {
    pub(crate) const fn new(
        topic: String,
        rx: mpsc::UnboundedReceiver<Value>,
        epoch: u64,
        cutoff: Arc<AtomicU64>,
    ) -> Self {
        Self {
            topic,
            rx,
            epoch,
            cutoff,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Value> {
        if self.is_cut_off() {
            return None;
        }
        let value = self.rx.recv().await?;
        if self.is_cut_off() {
            return None;
        }
        Some(value)
    }

    fn is_cut_off(&mut self) -> bool {
        if self.cutoff.load(Ordering::Acquire) == self.epoch {
            return false;
        }
        self.rx.close();
        true
    }
}

impl Stream for MessageStream {
    type Item = Value;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        let this = self.get_mut();
        if this.is_cut_off() {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(_)) if this.is_cut_off() => Poll::Ready(None),
            other => other,
        }
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("topic", &self.topic)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}
