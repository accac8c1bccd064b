//! Running counters for the consumer pipeline.
//!
//! Purely diagnostic: nothing in the pipeline branches on these values.
//! Each pipeline instance owns its own tracker and shares it via `Arc`;
//! counters only ever increase.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::validate::RejectionReason;

/// Atomic counters observed at every pipeline stage transition.
#[derive(Debug, Default)]
pub struct StatsTracker {
    received: AtomicU64,
    validated: AtomicU64,
    rejected_malformed: AtomicU64,
    rejected_out_of_range: AtomicU64,
    rejected_unknown_kind: AtomicU64,
    points_written: AtomicU64,
    batches_failed: AtomicU64,
}

/// Point-in-time copy of the counters, for logging or export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub validated: u64,
    pub rejected_malformed: u64,
    pub rejected_out_of_range: u64,
    pub rejected_unknown_kind: u64,
    pub points_written: u64,
    pub batches_failed: u64,
}

impl StatsSnapshot {
    /// Total rejections across all reasons.
    pub fn rejected_total(&self) -> u64 {
        self.rejected_malformed + self.rejected_out_of_range + self.rejected_unknown_kind
    }
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A message arrived from the bus.
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// A message passed validation.
    pub fn record_validated(&self) {
        self.validated.fetch_add(1, Ordering::Relaxed);
    }

    /// A message was rejected with the given reason.
    pub fn record_rejected(&self, reason: RejectionReason) {
        let counter = match reason {
            RejectionReason::MalformedSchema => &self.rejected_malformed,
            RejectionReason::OutOfRange => &self.rejected_out_of_range,
            RejectionReason::UnknownSensorKind => &self.rejected_unknown_kind,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// `count` points were durably accepted by the store.
    pub fn record_points_written(&self, count: u64) {
        self.points_written.fetch_add(count, Ordering::Relaxed);
    }

    /// A batch was abandoned after its retry budget ran out.
    pub fn record_batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Read-only snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            validated: self.validated.load(Ordering::Relaxed),
            rejected_malformed: self.rejected_malformed.load(Ordering::Relaxed),
            rejected_out_of_range: self.rejected_out_of_range.load(Ordering::Relaxed),
            rejected_unknown_kind: self.rejected_unknown_kind.load(Ordering::Relaxed),
            points_written: self.points_written.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
        }
    }
}
