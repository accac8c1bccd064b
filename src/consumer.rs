//! Consumer pipeline: bus message to stored point.
//!
//! Each message runs validate -> transform -> batch, with counters at
//! every stage. Rejections are terminal and logged, never retried; a
//! poison message can not wedge the pipeline. Offsets are committed only
//! after the batch containing a message is flushed or abandoned, so a
//! crash re-delivers at most one in-flight batch (duplicate writes are
//! harmless, the store is additive).

use std::time::Duration;

use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::Message;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::ValidationLimits;
use crate::stats::StatsTracker;
use crate::transform::transform;
use crate::validate::validate;
use crate::writer::{BatchWriter, FlushOutcome, PointSink};

const STATS_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Message-driven pipeline owning the batch writer for its store sink.
pub struct ConsumerPipeline<S: PointSink> {
    limits: ValidationLimits,
    writer: BatchWriter<S>,
    stats: std::sync::Arc<StatsTracker>,
}

impl<S: PointSink> ConsumerPipeline<S> {
    pub fn new(
        limits: ValidationLimits,
        writer: BatchWriter<S>,
        stats: std::sync::Arc<StatsTracker>,
    ) -> Self {
        Self {
            limits,
            writer,
            stats,
        }
    }

    /// Process one raw message through validation and transformation.
    ///
    /// Returns the flush outcome if adding the point tripped the batch
    /// size threshold, `None` otherwise (including every rejection).
    pub async fn handle_message(&mut self, payload: &[u8]) -> Option<FlushOutcome> {
        self.stats.record_received();

        match validate(payload, &self.limits) {
            Ok(point) => {
                self.stats.record_validated();
                self.writer.add(transform(point)).await
            }
            Err(reason) => {
                self.stats.record_rejected(reason);
                debug!(reason = %reason, bytes = payload.len(), "Message rejected");
                None
            }
        }
    }

    /// Flush whatever the writer has accumulated.
    pub async fn flush(&mut self) -> FlushOutcome {
        self.writer.flush().await
    }

    /// Consume from the bus until the stream ends or `shutdown` fires.
    ///
    /// Runs the flush timer alongside the message stream so a quiet topic
    /// still gets its partial batches written, and reports pipeline
    /// counters periodically.
    pub async fn run(
        mut self,
        consumer: StreamConsumer,
        flush_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut stream = consumer.stream();

        let mut flush_tick = tokio::time::interval(flush_interval);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats_tick = tokio::time::interval(STATS_REPORT_INTERVAL);
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Consumer pipeline started");

        loop {
            tokio::select! {
                message = stream.next() => {
                    match message {
                        Some(Ok(m)) => {
                            let payload = m.payload().unwrap_or_default();
                            if self.handle_message(payload).await.is_some() {
                                commit_position(&consumer, CommitMode::Async);
                            }
                        }
                        Some(Err(e)) => {
                            // Transport errors are transient; the stream
                            // keeps yielding once the broker is back
                            warn!(error = %e, "Bus receive error");
                        }
                        None => {
                            warn!("Bus stream ended");
                            break;
                        }
                    }
                }
                _ = flush_tick.tick() => {
                    self.flush().await;
                    // Commit even on an empty flush: at this point every
                    // consumed message was either written or rejected, and
                    // a rejection-only stretch must still move the group
                    // offset or it gets re-delivered wholesale on restart
                    commit_position(&consumer, CommitMode::Async);
                }
                _ = stats_tick.tick() => {
                    self.report_stats();
                }
                _ = shutdown.changed() => {
                    info!("Consumer pipeline shutting down");
                    break;
                }
            }
        }

        self.flush().await;
        commit_position(&consumer, CommitMode::Sync);
        self.report_stats();
        info!("Consumer pipeline stopped");
    }

    fn report_stats(&self) {
        let s = self.stats.snapshot();
        info!(
            received = s.received,
            validated = s.validated,
            rejected_malformed = s.rejected_malformed,
            rejected_out_of_range = s.rejected_out_of_range,
            rejected_unknown_kind = s.rejected_unknown_kind,
            points_written = s.points_written,
            batches_failed = s.batches_failed,
            "Pipeline stats"
        );
    }
}

/// Advance the committed offsets to the current consumer position.
///
/// Safe whenever the writer holds no pending points: every consumed
/// message was flushed, abandoned, or rejected. Abandoned batches commit
/// too; they were dropped deliberately and must not be re-consumed in a
/// loop.
fn commit_position(consumer: &StreamConsumer, mode: CommitMode) {
    match consumer.commit_consumer_state(mode) {
        // Nothing consumed yet on any assigned partition
        Ok(()) | Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
        Err(e) => error!(error = %e, "Offset commit failed"),
    }
}
