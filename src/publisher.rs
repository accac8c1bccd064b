//! Edge-side publisher: drains the device buffer to the event bus.
//!
//! One publisher task runs per device. Each cycle drains up to a batch
//! from the buffer front and pushes it through the [`EventSink`]. On
//! failure the entire batch goes back to the buffer front, so ordering
//! holds and nothing already buffered is lost; the publisher then backs
//! off with an unbounded, capped-delay retry cycle. Loss happens in
//! exactly one place, buffer overflow, never here.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::buffer::ReadingBuffer;
use crate::bus::EventSink;
use crate::retry::{RetryPolicy, RetryState};

/// What one publish cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Buffer was empty, nothing sent.
    Idle,

    /// A batch was accepted by the bus.
    Published { readings: usize },

    /// The publish failed; the batch was requeued and the publisher
    /// should wait `backoff` before the next cycle.
    Failed { requeued: usize, backoff: Duration },
}

/// Periodic publisher for one device's buffer.
pub struct EdgePublisher<S: EventSink> {
    sink: Arc<S>,
    buffer: Arc<ReadingBuffer>,
    edge_id: String,
    batch_size: usize,
    interval: Duration,
    policy: RetryPolicy,
    state: RetryState,
}

impl<S: EventSink> EdgePublisher<S> {
    pub fn new(
        sink: Arc<S>,
        buffer: Arc<ReadingBuffer>,
        edge_id: String,
        batch_size: usize,
        interval: Duration,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            sink,
            buffer,
            edge_id,
            batch_size,
            interval,
            policy,
            state: RetryState::Idle,
        }
    }

    /// Run one drain-and-publish cycle.
    pub async fn publish_once(&mut self) -> PublishOutcome {
        let batch = self.buffer.drain_up_to(self.batch_size);
        if batch.is_empty() {
            return PublishOutcome::Idle;
        }

        let count = batch.len();
        match self.sink.publish_batch(&batch).await {
            Ok(()) => {
                if self.state != RetryState::Idle {
                    info!(
                        edge_id = %self.edge_id,
                        readings = count,
                        failures = self.state.failures(),
                        "Publish recovered after outage"
                    );
                }
                self.state.succeed();
                debug!(edge_id = %self.edge_id, readings = count, "Published batch");
                PublishOutcome::Published { readings: count }
            }
            Err(e) => {
                // Whole batch back to the front: retried in order next cycle
                self.buffer.requeue_front(batch);
                let backoff = self.state.fail(&self.policy);
                warn!(
                    edge_id = %self.edge_id,
                    error = %e,
                    requeued = count,
                    failures = self.state.failures(),
                    backoff_ms = backoff.as_millis(),
                    "Publish failed, batch requeued"
                );
                PublishOutcome::Failed {
                    requeued: count,
                    backoff,
                }
            }
        }
    }

    /// Publish on the configured interval until `shutdown` fires, then
    /// make a best-effort attempt to drain what remains.
    ///
    /// Failures never terminate the loop; the publisher retries forever
    /// with a capped backoff delay.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            edge_id = %self.edge_id,
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "Publisher started"
        );

        loop {
            let delay = match self.publish_once().await {
                PublishOutcome::Failed { backoff, .. } => backoff,
                _ => self.interval,
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        // Drain remaining readings once; an unreachable bus at shutdown
        // drops at most one buffer's worth.
        while let PublishOutcome::Published { .. } = self.publish_once().await {}
        let left = self.buffer.len();
        if left > 0 {
            warn!(edge_id = %self.edge_id, remaining = left, "Publisher stopped with unsent readings");
        } else {
            info!(edge_id = %self.edge_id, "Publisher stopped");
        }
    }
}
