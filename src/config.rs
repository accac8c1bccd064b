//! Configuration module for the road-telemetry pipeline.
//!
//! All settings come from `ROAD_TELEMETRY_*` environment variables with
//! validated bounds and sensible defaults, covering both the producer
//! (device simulation, buffering, publishing) and the consumer
//! (validation limits, batch writing, retry budget).

use std::env;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Default Kafka bootstrap servers.
const DEFAULT_KAFKA_BROKERS: &str = "localhost:9092";

/// Default topic carrying all three sensor kinds.
const DEFAULT_KAFKA_TOPIC: &str = "road-telemetry";

/// Default consumer group for the validating writer.
const DEFAULT_CONSUMER_GROUP: &str = "road-telemetry-writer";

/// Default InfluxDB base URL.
const DEFAULT_INFLUX_URL: &str = "http://localhost:8086";

/// Default number of simulated edge devices.
const DEFAULT_DEVICE_COUNT: usize = 3;

/// Default number of districts devices are spread across.
const DEFAULT_DISTRICT_COUNT: usize = 4;

/// Default per-device buffer capacity.
const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// Default publish cycle interval in seconds.
const DEFAULT_PUBLISH_INTERVAL_SECS: u64 = 4;

/// Default number of readings drained per publish cycle.
const DEFAULT_PUBLISH_BATCH_SIZE: usize = 100;

/// Default number of points accumulated before a store write.
const DEFAULT_WRITE_BATCH_SIZE: usize = 500;

/// Default consumer-side flush interval in seconds.
const DEFAULT_WRITE_FLUSH_INTERVAL_SECS: u64 = 10;

/// Default generation cadence window in seconds.
const DEFAULT_CADENCE_MIN_SECS: f64 = 3.0;
const DEFAULT_CADENCE_MAX_SECS: f64 = 5.0;

/// Default sanity ceiling for speed readings in km/h.
const DEFAULT_MAX_SPEED_KMH: f64 = 250.0;

/// Maximum allowed batch sizes to prevent memory issues.
const MAX_BATCH_SIZE: usize = 10_000;

/// Bounds on interval settings, in seconds.
const MIN_INTERVAL_SECS: u64 = 1;
const MAX_INTERVAL_SECS: u64 = 300;

/// Validation limits applied to every consumed message.
#[derive(Debug, Clone)]
pub struct ValidationLimits {
    /// Speed readings above this value are rejected as out of range.
    pub max_speed_kmh: f64,

    /// Readings timestamped further than this into the future are rejected.
    pub max_future_drift: Duration,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_speed_kmh: DEFAULT_MAX_SPEED_KMH,
            max_future_drift: Duration::from_secs(300),
        }
    }
}

/// Configuration for the road-telemetry pipeline.
///
/// Recognized environment variables (all optional):
/// - `ROAD_TELEMETRY_KAFKA_BROKERS`: bootstrap servers (default: localhost:9092)
/// - `ROAD_TELEMETRY_KAFKA_TOPIC`: telemetry topic (default: road-telemetry)
/// - `ROAD_TELEMETRY_CONSUMER_GROUP`: consumer group id (default: road-telemetry-writer)
/// - `ROAD_TELEMETRY_INFLUX_URL` / `_INFLUX_ORG` / `_INFLUX_BUCKET` / `_INFLUX_TOKEN`
/// - `ROAD_TELEMETRY_DEVICE_COUNT`: simulated devices (default: 3)
/// - `ROAD_TELEMETRY_DISTRICT_COUNT`: districts (default: 4)
/// - `ROAD_TELEMETRY_BUFFER_CAPACITY`: per-device buffer (default: 1000)
/// - `ROAD_TELEMETRY_PUBLISH_INTERVAL_SECS`: publish cycle (default: 4)
/// - `ROAD_TELEMETRY_PUBLISH_BATCH_SIZE`: readings per publish (default: 100)
/// - `ROAD_TELEMETRY_WRITE_BATCH_SIZE`: points per store write (default: 500)
/// - `ROAD_TELEMETRY_WRITE_FLUSH_INTERVAL_SECS`: consumer flush timer (default: 10)
/// - `ROAD_TELEMETRY_REQUEST_TIMEOUT_SECS`: HTTP timeout (default: 30)
/// - `ROAD_TELEMETRY_RETRY_INITIAL_DELAY_MS` / `_RETRY_MAX_DELAY_MS` / `_RETRY_MAX_ATTEMPTS`
/// - `ROAD_TELEMETRY_CADENCE_MIN_SECS` / `_CADENCE_MAX_SECS`: generation window (default: 3..5)
/// - `ROAD_TELEMETRY_MAX_SPEED_KMH`: validation ceiling (default: 250)
#[derive(Debug, Clone)]
pub struct Config {
    /// Kafka bootstrap servers.
    pub kafka_brokers: String,

    /// Topic carrying all sensor-kind messages.
    pub kafka_topic: String,

    /// Named consumer group so offsets survive restarts.
    pub consumer_group: String,

    /// InfluxDB base URL (no trailing slash).
    pub influx_url: String,

    /// InfluxDB organization.
    pub influx_org: String,

    /// InfluxDB bucket.
    pub influx_bucket: String,

    /// InfluxDB API token.
    pub influx_token: String,

    /// Number of simulated edge devices.
    pub device_count: usize,

    /// Number of districts devices are assigned to.
    pub district_count: usize,

    /// Per-device buffer capacity.
    pub buffer_capacity: usize,

    /// Interval between publish cycles.
    pub publish_interval: Duration,

    /// Maximum readings drained per publish cycle.
    pub publish_batch_size: usize,

    /// Points accumulated before a store write.
    pub write_batch_size: usize,

    /// Consumer-side time threshold for flushing a partial batch.
    pub write_flush_interval: Duration,

    /// HTTP request timeout for store writes.
    pub request_timeout: Duration,

    /// Backoff parameters shared by the publisher and the batch writer.
    pub retry: RetryPolicy,

    /// Generation cadence window, seconds (uniform jitter inside).
    pub cadence_min_secs: f64,
    pub cadence_max_secs: f64,

    /// Per-sensor-kind validation limits.
    pub limits: ValidationLimits,
}

/// Error type for configuration loading failures.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Falls back to defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a numeric variable does not parse or
    /// violates its documented bounds.
    pub fn from_env() -> Result<Self, ConfigError> {
        let kafka_brokers = env::var("ROAD_TELEMETRY_KAFKA_BROKERS")
            .unwrap_or_else(|_| DEFAULT_KAFKA_BROKERS.to_string());
        let kafka_topic = env::var("ROAD_TELEMETRY_KAFKA_TOPIC")
            .unwrap_or_else(|_| DEFAULT_KAFKA_TOPIC.to_string());
        let consumer_group = env::var("ROAD_TELEMETRY_CONSUMER_GROUP")
            .unwrap_or_else(|_| DEFAULT_CONSUMER_GROUP.to_string());

        let influx_url = env::var("ROAD_TELEMETRY_INFLUX_URL")
            .unwrap_or_else(|_| DEFAULT_INFLUX_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let influx_org =
            env::var("ROAD_TELEMETRY_INFLUX_ORG").unwrap_or_else(|_| "city".to_string());
        let influx_bucket =
            env::var("ROAD_TELEMETRY_INFLUX_BUCKET").unwrap_or_else(|_| "telemetry".to_string());
        let influx_token = env::var("ROAD_TELEMETRY_INFLUX_TOKEN").unwrap_or_default();

        let device_count = parse_bounded_usize(
            "ROAD_TELEMETRY_DEVICE_COUNT",
            DEFAULT_DEVICE_COUNT,
            1,
            10_000,
        )?;
        let district_count = parse_bounded_usize(
            "ROAD_TELEMETRY_DISTRICT_COUNT",
            DEFAULT_DISTRICT_COUNT,
            1,
            1_000,
        )?;
        let buffer_capacity = parse_bounded_usize(
            "ROAD_TELEMETRY_BUFFER_CAPACITY",
            DEFAULT_BUFFER_CAPACITY,
            1,
            1_000_000,
        )?;
        let publish_batch_size = parse_bounded_usize(
            "ROAD_TELEMETRY_PUBLISH_BATCH_SIZE",
            DEFAULT_PUBLISH_BATCH_SIZE,
            1,
            MAX_BATCH_SIZE,
        )?;
        let write_batch_size = parse_bounded_usize(
            "ROAD_TELEMETRY_WRITE_BATCH_SIZE",
            DEFAULT_WRITE_BATCH_SIZE,
            1,
            MAX_BATCH_SIZE,
        )?;

        let publish_interval = Duration::from_secs(parse_interval_secs(
            "ROAD_TELEMETRY_PUBLISH_INTERVAL_SECS",
            DEFAULT_PUBLISH_INTERVAL_SECS,
        )?);
        let write_flush_interval = Duration::from_secs(parse_interval_secs(
            "ROAD_TELEMETRY_WRITE_FLUSH_INTERVAL_SECS",
            DEFAULT_WRITE_FLUSH_INTERVAL_SECS,
        )?);

        let request_timeout_secs: u64 = env::var("ROAD_TELEMETRY_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let request_timeout = Duration::from_secs(request_timeout_secs);

        let retry = RetryPolicy {
            initial_delay: Duration::from_millis(
                env::var("ROAD_TELEMETRY_RETRY_INITIAL_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(500),
            ),
            max_delay: Duration::from_millis(
                env::var("ROAD_TELEMETRY_RETRY_MAX_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30_000),
            ),
            max_attempts: env::var("ROAD_TELEMETRY_RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
        };

        let cadence_min_secs: f64 = env::var("ROAD_TELEMETRY_CADENCE_MIN_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CADENCE_MIN_SECS);
        let cadence_max_secs: f64 = env::var("ROAD_TELEMETRY_CADENCE_MAX_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CADENCE_MAX_SECS);
        if cadence_min_secs <= 0.0 || cadence_max_secs < cadence_min_secs {
            return Err(ConfigError {
                message: format!(
                    "cadence window {}..{} is not a positive, ordered range",
                    cadence_min_secs, cadence_max_secs
                ),
                env_var: Some("ROAD_TELEMETRY_CADENCE_MIN_SECS".to_string()),
            });
        }

        let max_speed_kmh: f64 = env::var("ROAD_TELEMETRY_MAX_SPEED_KMH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_SPEED_KMH);
        if max_speed_kmh <= 0.0 {
            return Err(ConfigError {
                message: "speed ceiling must be positive".to_string(),
                env_var: Some("ROAD_TELEMETRY_MAX_SPEED_KMH".to_string()),
            });
        }

        Ok(Self {
            kafka_brokers,
            kafka_topic,
            consumer_group,
            influx_url,
            influx_org,
            influx_bucket,
            influx_token,
            device_count,
            district_count,
            buffer_capacity,
            publish_interval,
            publish_batch_size,
            write_batch_size,
            write_flush_interval,
            request_timeout,
            retry,
            cadence_min_secs,
            cadence_max_secs,
            limits: ValidationLimits {
                max_speed_kmh,
                ..ValidationLimits::default()
            },
        })
    }
}

impl Default for Config {
    /// Default configuration, useful for tests.
    fn default() -> Self {
        Self {
            kafka_brokers: DEFAULT_KAFKA_BROKERS.to_string(),
            kafka_topic: DEFAULT_KAFKA_TOPIC.to_string(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            influx_url: DEFAULT_INFLUX_URL.to_string(),
            influx_org: "city".to_string(),
            influx_bucket: "telemetry".to_string(),
            influx_token: String::new(),
            device_count: DEFAULT_DEVICE_COUNT,
            district_count: DEFAULT_DISTRICT_COUNT,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            publish_interval: Duration::from_secs(DEFAULT_PUBLISH_INTERVAL_SECS),
            publish_batch_size: DEFAULT_PUBLISH_BATCH_SIZE,
            write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
            write_flush_interval: Duration::from_secs(DEFAULT_WRITE_FLUSH_INTERVAL_SECS),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            cadence_min_secs: DEFAULT_CADENCE_MIN_SECS,
            cadence_max_secs: DEFAULT_CADENCE_MAX_SECS,
            limits: ValidationLimits::default(),
        }
    }
}

/// Parse a usize environment variable with inclusive bounds.
fn parse_bounded_usize(
    env_var: &str,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize, ConfigError> {
    match env::var(env_var) {
        Ok(value) => {
            let parsed: usize = value.parse().map_err(|_| ConfigError {
                message: format!("'{}' is not a valid number", value),
                env_var: Some(env_var.to_string()),
            })?;

            if parsed < min {
                return Err(ConfigError {
                    message: format!("{} is below minimum ({})", parsed, min),
                    env_var: Some(env_var.to_string()),
                });
            }
            if parsed > max {
                return Err(ConfigError {
                    message: format!("{} exceeds maximum allowed ({})", parsed, max),
                    env_var: Some(env_var.to_string()),
                });
            }
            Ok(parsed)
        }
        Err(_) => Ok(default),
    }
}

/// Parse an interval-in-seconds environment variable with global bounds.
fn parse_interval_secs(env_var: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(env_var) {
        Ok(value) => {
            let interval: u64 = value.parse().map_err(|_| ConfigError {
                message: format!("'{}' is not a valid number", value),
                env_var: Some(env_var.to_string()),
            })?;

            if interval < MIN_INTERVAL_SECS {
                return Err(ConfigError {
                    message: format!(
                        "interval {} is below minimum ({}s)",
                        interval, MIN_INTERVAL_SECS
                    ),
                    env_var: Some(env_var.to_string()),
                });
            }
            if interval > MAX_INTERVAL_SECS {
                return Err(ConfigError {
                    message: format!(
                        "interval {} exceeds maximum ({}s)",
                        interval, MAX_INTERVAL_SECS
                    ),
                    env_var: Some(env_var.to_string()),
                });
            }
            Ok(interval)
        }
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, MutexGuard};

    // Env vars are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        original: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let original = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                original,
            }
        }

        fn remove(key: &str) -> Self {
            let original = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                original,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.original {
                Some(val) => env::set_var(&self.key, val),
                None => env::remove_var(&self.key),
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.kafka_brokers, "localhost:9092");
        assert_eq!(config.kafka_topic, "road-telemetry");
        assert_eq!(config.consumer_group, "road-telemetry-writer");
        assert_eq!(config.buffer_capacity, 1000);
        assert_eq!(config.publish_interval, Duration::from_secs(4));
        assert_eq!(config.retry.max_attempts, 3);
        assert!((config.limits.max_speed_kmh - 250.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = env_lock();
        let _guard1 = EnvGuard::remove("ROAD_TELEMETRY_KAFKA_BROKERS");
        let _guard2 = EnvGuard::remove("ROAD_TELEMETRY_BUFFER_CAPACITY");
        let _guard3 = EnvGuard::remove("ROAD_TELEMETRY_PUBLISH_INTERVAL_SECS");

        let config = Config::from_env().expect("Should load with defaults");
        assert_eq!(config.kafka_brokers, "localhost:9092");
        assert_eq!(config.buffer_capacity, 1000);
        assert_eq!(config.publish_interval, Duration::from_secs(4));
    }

    #[test]
    fn test_config_from_env_custom_values() {
        let _lock = env_lock();
        let _guard1 = EnvGuard::set("ROAD_TELEMETRY_INFLUX_URL", "http://influx:8086/");
        let _guard2 = EnvGuard::set("ROAD_TELEMETRY_PUBLISH_BATCH_SIZE", "200");
        let _guard3 = EnvGuard::set("ROAD_TELEMETRY_WRITE_FLUSH_INTERVAL_SECS", "15");

        let config = Config::from_env().expect("Should load custom values");
        assert_eq!(config.influx_url, "http://influx:8086"); // Trailing slash removed
        assert_eq!(config.publish_batch_size, 200);
        assert_eq!(config.write_flush_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_invalid_batch_size() {
        let _lock = env_lock();
        let _guard = EnvGuard::set("ROAD_TELEMETRY_PUBLISH_BATCH_SIZE", "not_a_number");

        let result = Config::from_env();
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.message.contains("not a valid number"));
    }

    #[test]
    fn test_zero_batch_size() {
        let _lock = env_lock();
        let _guard = EnvGuard::set("ROAD_TELEMETRY_PUBLISH_BATCH_SIZE", "0");

        let result = Config::from_env();
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.message.contains("below minimum"));
    }

    #[test]
    fn test_batch_size_exceeds_max() {
        let _lock = env_lock();
        let _guard = EnvGuard::set("ROAD_TELEMETRY_WRITE_BATCH_SIZE", "99999");

        let result = Config::from_env();
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.message.contains("exceeds maximum"));
    }

    #[test]
    fn test_flush_interval_exceeds_max() {
        let _lock = env_lock();
        let _guard = EnvGuard::set("ROAD_TELEMETRY_WRITE_FLUSH_INTERVAL_SECS", "999");

        let result = Config::from_env();
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.message.contains("exceeds maximum"));
    }

    #[test]
    fn test_negative_speed_ceiling_rejected() {
        let _lock = env_lock();
        let _guard = EnvGuard::set("ROAD_TELEMETRY_MAX_SPEED_KMH", "-1.0");

        let result = Config::from_env();
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.message.contains("positive"));
    }

    #[test]
    fn test_inverted_cadence_window_rejected() {
        let _lock = env_lock();
        let _guard1 = EnvGuard::set("ROAD_TELEMETRY_CADENCE_MIN_SECS", "5.0");
        let _guard2 = EnvGuard::set("ROAD_TELEMETRY_CADENCE_MAX_SECS", "3.0");

        let result = Config::from_env();
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.message.contains("cadence"));
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError {
            message: "test error".to_string(),
            env_var: Some("TEST_VAR".to_string()),
        };
        assert_eq!(
            format!("{}", error),
            "Configuration error for TEST_VAR: test error"
        );

        let error_no_var = ConfigError {
            message: "general error".to_string(),
            env_var: None,
        };
        assert_eq!(
            format!("{}", error_no_var),
            "Configuration error: general error"
        );
    }
}
