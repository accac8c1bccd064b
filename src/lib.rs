//! Road Telemetry Library
//!
//! This library provides the components of a road-sensor telemetry
//! pipeline, from simulated edge devices to a time-series store:
//!
//! - **model**: Sensor reading types and their wire format
//! - **config**: Environment-based configuration for both pipeline roles
//! - **generator**: Simulated device provisioning and reading generation
//! - **buffer**: Bounded per-device buffering with lossy overflow
//! - **bus**: Kafka producer/consumer plumbing behind the `EventSink` seam
//! - **publisher**: Edge-side drain-and-publish loop with backoff
//! - **validate**: Consumer-side schema and range validation
//! - **transform**: Mapping of validated readings to store points
//! - **writer**: Batched store writes with bounded retries
//! - **consumer**: The message-driven consumer pipeline
//! - **retry**: Backoff policy and retry state shared by both roles
//! - **stats**: Pipeline counters
//!
//! # Example
//!
//! ```no_run
//! use road_telemetry::config::{Config, ValidationLimits};
//! use road_telemetry::transform::transform;
//! use road_telemetry::validate::validate;
//!
//! let limits = ValidationLimits::default();
//! let message = br#"{"edge_id":"E-00001","district_id":"district-01",
//!     "timestamp":"2026-03-14T09:26:53Z","latitude":42.35,"longitude":13.4,
//!     "sensor_type":"speed","speed_kmh":57.3}"#;
//!
//! match validate(message, &limits) {
//!     Ok(point) => {
//!         let line = transform(point).to_line_protocol();
//!         println!("{line}");
//!     }
//!     Err(reason) => eprintln!("rejected: {reason}"),
//! }
//! ```

// Module declarations
pub mod buffer;
pub mod bus;
pub mod config;
pub mod consumer;
pub mod generator;
pub mod model;
pub mod publisher;
pub mod retry;
pub mod stats;
pub mod transform;
pub mod validate;
pub mod writer;

// Re-export commonly used types at crate root for convenience
pub use buffer::{BufferStats, ReadingBuffer};
pub use bus::{create_consumer, BusError, EventSink, KafkaSink};
pub use config::{Config, ConfigError, ValidationLimits};
pub use consumer::ConsumerPipeline;
pub use generator::{DeviceClock, DeviceSpec, ReadingGenerator};
pub use model::{RoadCondition, SensorKind, SensorPayload, SensorReading, WeatherCondition};
pub use publisher::{EdgePublisher, PublishOutcome};
pub use retry::{RetryPolicy, RetryState};
pub use stats::{StatsSnapshot, StatsTracker};
pub use transform::{transform, FieldValue, MetricPoint};
pub use validate::{validate, RejectionReason, ValidatedPoint};
pub use writer::{BatchWriter, FlushOutcome, PointSink, StoreClient, WriteError};
