//! Bounded per-device reading buffer.
//!
//! Decouples reading generation from event-bus availability. The buffer is
//! FIFO and lossy under sustained overload: when full, the oldest entry is
//! evicted to make room for the newest (freshness over completeness). The
//! publisher drains batches from the front and, on a failed publish, puts
//! the whole batch back at the front in original order so nothing already
//! buffered is lost and per-device ordering is preserved.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::warn;

use crate::model::SensorReading;

/// Snapshot of buffer counters.
#[derive(Debug, Clone, Default)]
pub struct BufferStats {
    /// Total readings accepted via `push`.
    pub pushed: u64,

    /// Total readings evicted due to overflow.
    pub dropped: u64,

    /// Total readings handed out via `drain_up_to` (re-queued entries are
    /// subtracted back out).
    pub drained: u64,
}

struct BufferInner {
    queue: VecDeque<SensorReading>,
    stats: BufferStats,
}

/// Bounded FIFO buffer shared between one generation task and one
/// publisher task.
///
/// All operations take a single internal mutex, so `push`, `drain_up_to`
/// and `requeue_front` are mutually exclusive and no caller ever observes
/// a partial view. The critical sections are short; generation is never
/// blocked beyond a drain or re-insert in progress.
pub struct ReadingBuffer {
    inner: Mutex<BufferInner>,
    capacity: usize,
}

impl ReadingBuffer {
    /// Create a buffer holding at most `capacity` readings.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                queue: VecDeque::with_capacity(capacity.min(1024)),
                stats: BufferStats::default(),
            }),
            capacity,
        }
    }

    /// Append a reading, evicting the oldest entry first when at capacity.
    pub fn push(&self, reading: SensorReading) {
        let mut inner = self.lock();
        if inner.queue.len() >= self.capacity {
            inner.queue.pop_front();
            inner.stats.dropped += 1;
            if inner.stats.dropped % 100 == 1 {
                warn!(
                    edge_id = %reading.edge_id,
                    capacity = self.capacity,
                    dropped_total = inner.stats.dropped,
                    "Buffer overflow: dropping oldest reading"
                );
            }
        }
        inner.queue.push_back(reading);
        inner.stats.pushed += 1;
    }

    /// Atomically remove and return up to `n` oldest readings.
    ///
    /// Returns fewer entries if the buffer holds less, or an empty vector
    /// if it is empty.
    pub fn drain_up_to(&self, n: usize) -> Vec<SensorReading> {
        let mut inner = self.lock();
        let take = n.min(inner.queue.len());
        let batch: Vec<SensorReading> = inner.queue.drain(..take).collect();
        inner.stats.drained += batch.len() as u64;
        batch
    }

    /// Re-insert a previously drained batch at the front, preserving its
    /// original relative order (failed-publish path).
    ///
    /// If concurrent pushes meanwhile filled the buffer, the oldest entries
    /// of the combined sequence are evicted so the capacity bound holds.
    pub fn requeue_front(&self, batch: Vec<SensorReading>) {
        if batch.is_empty() {
            return;
        }
        let mut inner = self.lock();
        inner.stats.drained = inner.stats.drained.saturating_sub(batch.len() as u64);
        for reading in batch.into_iter().rev() {
            inner.queue.push_front(reading);
        }
        while inner.queue.len() > self.capacity {
            inner.queue.pop_front();
            inner.stats.dropped += 1;
        }
    }

    /// Current number of buffered readings.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of buffer counters.
    pub fn stats(&self) -> BufferStats {
        self.lock().stats.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferInner> {
        // A poisoned mutex only means a panic mid-operation elsewhere; the
        // queue itself is still structurally valid.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
