//! Paced, ordered outbound delivery.
//!
//! Any number of [`Announcer`] clones enqueue without blocking; a single
//! [`DeliveryQueue`] consumer sends one message at a time and then sleeps the
//! pacing interval, so the outbound rate never exceeds one message per
//! interval. The queue is unbounded: announcement volume is low enough that
//! back-pressure is not worth the complexity, but a feed flood grows memory.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::reconnect::ReconnectSupervisor;
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    pub destination: String,
    pub enqueued_at: Instant,
}

/// Producer handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Announcer {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Announcer {
    /// Creates a connected producer/consumer pair.
    pub fn channel() -> (Announcer, DeliveryQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Announcer { tx }, DeliveryQueue { rx })
    }

    /// Queues `text` for `destination`. Returns `false` once the consumer is gone.
    pub fn enqueue(&self, text: impl Into<String>, destination: impl Into<String>) -> bool {
        let msg = OutboundMessage {
            text: text.into(),
            destination: destination.into(),
            enqueued_at: Instant::now(),
        };
        self.tx.send(msg).is_ok()
    }
}

/// The single consumer side of the queue.
#[derive(Debug)]
pub struct DeliveryQueue {
    rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl DeliveryQueue {
    /// Takes the next message without waiting.
    #[cfg(test)]
    pub(crate) fn try_pop(&mut self) -> Option<OutboundMessage> {
        self.rx.try_recv().ok()
    }

    /// Drains the queue until `cancel` fires or every [`Announcer`] is dropped.
    ///
    /// Messages that hit a dead connection are dropped, not retried; the
    /// reconnect supervisor is told about the outage instead.
    pub async fn run(
        mut self,
        transport: Arc<dyn Transport>,
        supervisor: ReconnectSupervisor,
        pacing: Duration,
        cancel: CancellationToken,
    ) {
        loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = self.rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            match transport.send(&msg.text, &msg.destination).await {
                Ok(()) => {
                    tracing::debug!(
                        destination = %msg.destination,
                        queued_ms = msg.enqueued_at.elapsed().as_millis(),
                        "Delivered message"
                    );
                }
                Err(TransportError::NotConnected) => {
                    tracing::warn!(
                        destination = %msg.destination,
                        "Not connected, dropping message"
                    );
                    supervisor.on_disconnect();
                }
                Err(e) => {
                    tracing::warn!(destination = %msg.destination, error = %e, "Send failed");
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pacing) => {}
            }
        }
        tracing::debug!("Delivery queue stopped");
    }
}
