//! Batched writes to the time-series store.
//!
//! `BatchWriter` accumulates transformed points and flushes the whole
//! batch through a [`PointSink`] when a size threshold is hit or the
//! caller's flush timer fires. A failed flush is retried with bounded
//! exponential backoff; when the attempt budget runs out the batch is
//! abandoned and counted, and the pipeline moves on. A stuck store must
//! never stall message consumption indefinitely.
//!
//! `StoreClient` is the production sink: the InfluxDB v2 write API over a
//! pooled HTTP client, line-protocol body, nanosecond precision.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::retry::RetryPolicy;
use crate::stats::StatsTracker;
use crate::transform::MetricPoint;

/// Errors that can occur while writing to the store.
#[derive(Debug)]
pub enum WriteError {
    /// HTTP request failed
    Request(reqwest::Error),

    /// Store returned an error status code
    Status { code: StatusCode, message: String },

    /// Request timeout
    Timeout,

    /// Client configuration error
    Config(String),
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteError::Request(e) => write!(f, "HTTP request failed: {}", e),
            WriteError::Status { code, message } => {
                write!(f, "Store error ({}): {}", code, message)
            }
            WriteError::Timeout => write!(f, "Request timed out"),
            WriteError::Config(e) => write!(f, "Client configuration error: {}", e),
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WriteError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for WriteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WriteError::Timeout
        } else {
            WriteError::Request(err)
        }
    }
}

impl WriteError {
    /// Whether this failure is worth retrying.
    ///
    /// Connection errors, timeouts, server errors (5xx) and rate
    /// limiting (429) are transient; other client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            WriteError::Request(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            WriteError::Timeout => true,
            WriteError::Status { code, .. } => {
                code.is_server_error() || *code == StatusCode::TOO_MANY_REQUESTS
            }
            WriteError::Config(_) => false,
        }
    }
}

/// Destination for point batches. Implemented by [`StoreClient`] in
/// production and by in-memory doubles in tests.
pub trait PointSink {
    /// Write all of `points` in one call.
    fn write(&self, points: &[MetricPoint]) -> impl Future<Output = Result<(), WriteError>> + Send;
}

/// HTTP client for the InfluxDB v2 batched write endpoint.
///
/// The underlying client is reused for connection pooling. Each call to
/// `write` is a single attempt; retry policy lives in [`BatchWriter`].
pub struct StoreClient {
    client: Client,
    write_url: String,
    token: String,
}

impl StoreClient {
    /// Create a store client from the pipeline configuration.
    ///
    /// # Errors
    ///
    /// Returns `WriteError::Config` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, WriteError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| WriteError::Config(e.to_string()))?;

        let write_url = format!(
            "{}/api/v2/write?org={}&bucket={}&precision=ns",
            config.influx_url, config.influx_org, config.influx_bucket
        );

        Ok(Self {
            client,
            write_url,
            token: config.influx_token.clone(),
        })
    }

    /// The resolved write endpoint URL.
    pub fn write_url(&self) -> &str {
        &self.write_url
    }

    async fn send_write(&self, body: String) -> Result<(), WriteError> {
        let mut request = self.client.post(&self.write_url).body(body);
        if !self.token.is_empty() {
            request = request.header("Authorization", format!("Token {}", self.token));
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(WriteError::Status {
                code: status,
                message,
            })
        }
    }
}

impl PointSink for StoreClient {
    fn write(&self, points: &[MetricPoint]) -> impl Future<Output = Result<(), WriteError>> + Send {
        let body = points
            .iter()
            .map(MetricPoint::to_line_protocol)
            .collect::<Vec<_>>()
            .join("\n");
        debug!(
            points = points.len(),
            bytes = body.len(),
            "Writing point batch to store"
        );
        self.send_write(body)
    }
}

/// Result of a flush attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing accumulated, nothing written.
    Empty,

    /// The whole batch was durably accepted by the store.
    Flushed { points: usize },

    /// The retry budget ran out (or the error was permanent); the batch
    /// was dropped and counted as failed.
    Abandoned { points: usize, attempts: u32 },
}

/// Accumulates points and writes them through `S` in batches.
///
/// Owned by a single consumer task; each batch's points belong to
/// exactly one flush and are either all accepted or all abandoned.
pub struct BatchWriter<S: PointSink> {
    sink: S,
    pending: Vec<MetricPoint>,
    batch_size: usize,
    policy: RetryPolicy,
    stats: Arc<StatsTracker>,
}

impl<S: PointSink> BatchWriter<S> {
    pub fn new(sink: S, batch_size: usize, policy: RetryPolicy, stats: Arc<StatsTracker>) -> Self {
        Self {
            sink,
            pending: Vec::with_capacity(batch_size),
            batch_size,
            policy,
            stats,
        }
    }

    /// Number of points waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Add a point; flushes automatically when the size threshold is
    /// reached and returns that flush's outcome.
    pub async fn add(&mut self, point: MetricPoint) -> Option<FlushOutcome> {
        self.pending.push(point);
        if self.pending.len() >= self.batch_size {
            debug!(
                batch_size = self.pending.len(),
                "Flushing point batch: size threshold reached"
            );
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Write the accumulated batch, retrying transient failures with
    /// exponential backoff up to the policy's attempt budget.
    ///
    /// Exhausted retries or a permanent error abandon the batch: it is
    /// dropped, `batches_failed` is incremented, and the writer is ready
    /// for the next batch. The caller may then advance consumer offsets
    /// either way, bounding re-delivery to one in-flight batch.
    pub async fn flush(&mut self) -> FlushOutcome {
        if self.pending.is_empty() {
            return FlushOutcome::Empty;
        }

        let batch = std::mem::take(&mut self.pending);
        self.pending = Vec::with_capacity(self.batch_size);
        let count = batch.len();
        let batch_id = Uuid::new_v4();
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.sink.write(&batch).await {
                Ok(()) => {
                    self.stats.record_points_written(count as u64);
                    info!(
                        batch_id = %batch_id,
                        points = count,
                        attempt = attempt,
                        "Point batch written"
                    );
                    return FlushOutcome::Flushed { points: count };
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    if retryable && attempt < max_attempts {
                        let delay = self.policy.delay_for(attempt - 1);
                        warn!(
                            batch_id = %batch_id,
                            error = %e,
                            attempt = attempt,
                            max_attempts = max_attempts,
                            delay_ms = delay.as_millis(),
                            "Store write failed, will retry"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        self.stats.record_batch_failed();
                        error!(
                            batch_id = %batch_id,
                            error = %e,
                            attempts = attempt,
                            retryable = retryable,
                            points = count,
                            "Store write failed permanently, abandoning batch"
                        );
                        return FlushOutcome::Abandoned {
                            points: count,
                            attempts: attempt,
                        };
                    }
                }
            }
        }

        // Loop always returns; max_attempts >= 1
        unreachable!("flush loop exits via return")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SensorPayload, SensorReading};
    use crate::transform::transform;
    use crate::validate::ValidatedPoint;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn point(seq: usize) -> MetricPoint {
        transform(ValidatedPoint {
            reading: SensorReading {
                edge_id: format!("E-{:05}", seq),
                district_id: "district-01".to_string(),
                timestamp: Utc::now(),
                latitude: 42.35,
                longitude: 13.40,
                payload: SensorPayload::Speed {
                    speed_kmh: seq as f64,
                },
            },
        })
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            max_attempts: 3,
        }
    }

    /// Sink that records every accepted batch and fails the first
    /// `failures` write attempts with a retryable error.
    #[derive(Default)]
    struct TestSink {
        failures: AtomicU32,
        attempts: AtomicU32,
        written: Mutex<Vec<Vec<MetricPoint>>>,
    }

    impl TestSink {
        fn failing(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                ..Self::default()
            }
        }

        fn written_batches(&self) -> Vec<Vec<MetricPoint>> {
            self.written.lock().unwrap().clone()
        }
    }

    impl PointSink for &TestSink {
        fn write(
            &self,
            points: &[MetricPoint],
        ) -> impl Future<Output = Result<(), WriteError>> + Send {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let fail = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !fail {
                self.written.lock().unwrap().push(points.to_vec());
            }
            async move {
                if fail {
                    Err(WriteError::Timeout)
                } else {
                    Ok(())
                }
            }
        }
    }

    #[tokio::test]
    async fn test_empty_flush() {
        let sink = TestSink::default();
        let stats = Arc::new(StatsTracker::new());
        let mut writer = BatchWriter::new(&sink, 10, policy(), stats);
        assert_eq!(writer.flush().await, FlushOutcome::Empty);
        assert!(sink.written_batches().is_empty());
    }

    #[tokio::test]
    async fn test_size_threshold_triggers_flush() {
        let sink = TestSink::default();
        let stats = Arc::new(StatsTracker::new());
        let mut writer = BatchWriter::new(&sink, 3, policy(), stats.clone());

        assert_eq!(writer.add(point(0)).await, None);
        assert_eq!(writer.add(point(1)).await, None);
        let outcome = writer.add(point(2)).await;
        assert_eq!(outcome, Some(FlushOutcome::Flushed { points: 3 }));
        assert_eq!(writer.pending_len(), 0);
        assert_eq!(stats.snapshot().points_written, 3);

        let batches = sink.written_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_succeeds() {
        let sink = TestSink::failing(2);
        let stats = Arc::new(StatsTracker::new());
        let mut writer = BatchWriter::new(&sink, 10, policy(), stats.clone());

        writer.add(point(0)).await;
        let outcome = writer.flush().await;

        assert_eq!(outcome, FlushOutcome::Flushed { points: 1 });
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(stats.snapshot().batches_failed, 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_abandon_batch() {
        // Store fails 5 consecutive times against a budget of 3
        let sink = TestSink::failing(5);
        let stats = Arc::new(StatsTracker::new());
        let mut writer = BatchWriter::new(&sink, 10, policy(), stats.clone());

        writer.add(point(0)).await;
        writer.add(point(1)).await;
        let outcome = writer.flush().await;

        assert_eq!(
            outcome,
            FlushOutcome::Abandoned {
                points: 2,
                attempts: 3
            }
        );
        assert_eq!(stats.snapshot().batches_failed, 1);
        assert_eq!(stats.snapshot().points_written, 0);
        assert_eq!(writer.pending_len(), 0);

        // The writer keeps going afterwards
        sink.failures.store(0, Ordering::SeqCst);
        writer.add(point(2)).await;
        assert_eq!(writer.flush().await, FlushOutcome::Flushed { points: 1 });
    }

    #[tokio::test]
    async fn test_reflush_of_written_batch_is_safe() {
        // Additive store: writing the same points again must not error
        let sink = TestSink::default();
        let stats = Arc::new(StatsTracker::new());
        let mut writer = BatchWriter::new(&sink, 10, policy(), stats);

        writer.add(point(0)).await;
        assert_eq!(writer.flush().await, FlushOutcome::Flushed { points: 1 });

        writer.add(point(0)).await;
        assert_eq!(writer.flush().await, FlushOutcome::Flushed { points: 1 });

        assert_eq!(sink.written_batches().len(), 2);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(WriteError::Timeout.is_retryable());
        assert!(WriteError::Status {
            code: StatusCode::INTERNAL_SERVER_ERROR,
            message: "boom".to_string(),
        }
        .is_retryable());
        assert!(WriteError::Status {
            code: StatusCode::TOO_MANY_REQUESTS,
            message: "slow down".to_string(),
        }
        .is_retryable());
        assert!(!WriteError::Status {
            code: StatusCode::BAD_REQUEST,
            message: "bad line".to_string(),
        }
        .is_retryable());
        assert!(!WriteError::Config("no client".to_string()).is_retryable());
    }

    #[test]
    fn test_write_error_display() {
        let err = WriteError::Timeout;
        assert_eq!(format!("{}", err), "Request timed out");

        let err = WriteError::Status {
            code: StatusCode::UNPROCESSABLE_ENTITY,
            message: "invalid field".to_string(),
        };
        assert!(format!("{}", err).contains("422"));
        assert!(format!("{}", err).contains("invalid field"));
    }

    #[test]
    fn test_store_client_url() {
        let config = Config::default();
        let client = StoreClient::new(&config).unwrap();
        assert_eq!(
            client.write_url(),
            "http://localhost:8086/api/v2/write?org=city&bucket=telemetry&precision=ns"
        );
    }
}
