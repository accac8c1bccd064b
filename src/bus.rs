//! Event bus plumbing: Kafka producer and consumer construction.
//!
//! The producer side is behind the [`EventSink`] trait so the publisher
//! loop can be exercised in tests with in-memory doubles; only
//! [`KafkaSink`] talks to the broker. The consumer side is plain
//! construction, the pipeline drives the resulting stream directly.

use std::future::Future;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tracing::debug;

use crate::config::Config;
use crate::model::SensorReading;

/// Errors from the event bus.
#[derive(Debug)]
pub enum BusError {
    /// Client could not be constructed from its configuration
    Config(rdkafka::error::KafkaError),

    /// Broker rejected or failed a publish
    Publish(rdkafka::error::KafkaError),

    /// Reading could not be serialized for the wire
    Serialize(serde_json::Error),

    /// Consumer subscription failed
    Subscribe(rdkafka::error::KafkaError),
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusError::Config(e) => write!(f, "Bus client configuration failed: {}", e),
            BusError::Publish(e) => write!(f, "Publish failed: {}", e),
            BusError::Serialize(e) => write!(f, "Reading serialization failed: {}", e),
            BusError::Subscribe(e) => write!(f, "Topic subscription failed: {}", e),
        }
    }
}

impl std::error::Error for BusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BusError::Config(e) | BusError::Publish(e) | BusError::Subscribe(e) => Some(e),
            BusError::Serialize(e) => Some(e),
        }
    }
}

/// Destination for outbound readings. [`KafkaSink`] in production,
/// in-memory doubles in publisher tests.
pub trait EventSink {
    /// Publish `readings` in order. An error means the batch was not
    /// fully accepted and the caller should retry it from the start.
    fn publish_batch(
        &self,
        readings: &[SensorReading],
    ) -> impl Future<Output = Result<(), BusError>> + Send;
}

/// Kafka producer shared by every device task in the process.
///
/// Messages are keyed by `edge_id` so each device's readings land in one
/// partition and stay ordered end to end.
pub struct KafkaSink {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
}

impl KafkaSink {
    /// Build the shared producer from configuration.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Config` if the producer cannot be created.
    pub fn new(config: &Config) -> Result<Self, BusError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("message.timeout.ms", "30000")
            .set("compression.type", "snappy")
            .create()
            .map_err(BusError::Config)?;

        Ok(Self {
            producer,
            topic: config.kafka_topic.clone(),
            send_timeout: config.request_timeout,
        })
    }
}

impl EventSink for KafkaSink {
    fn publish_batch(
        &self,
        readings: &[SensorReading],
    ) -> impl Future<Output = Result<(), BusError>> + Send {
        async move {
            for reading in readings {
                let payload = serde_json::to_vec(reading).map_err(BusError::Serialize)?;
                let record = FutureRecord::to(&self.topic)
                    .payload(&payload)
                    .key(&reading.edge_id);

                self.producer
                    .send(record, Timeout::After(self.send_timeout))
                    .await
                    .map_err(|(err, _)| BusError::Publish(err))?;
            }
            debug!(
                count = readings.len(),
                topic = %self.topic,
                "Published reading batch"
            );
            Ok(())
        }
    }
}

/// Create the consumer for the telemetry topic.
///
/// Auto-commit is disabled: the pipeline commits offsets itself, only
/// after the batch containing a message has been flushed or abandoned.
///
/// # Errors
///
/// Returns `BusError::Config` if the consumer cannot be created and
/// `BusError::Subscribe` if the subscription fails.
pub fn create_consumer(config: &Config) -> Result<StreamConsumer, BusError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &config.kafka_brokers)
        .set("group.id", &config.consumer_group)
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "false")
        .set("session.timeout.ms", "10000")
        .create()
        .map_err(BusError::Config)?;

    consumer
        .subscribe(&[config.kafka_topic.as_str()])
        .map_err(BusError::Subscribe)?;

    Ok(consumer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_error_display() {
        let err = BusError::Serialize(
            serde_json::from_str::<serde_json::Value>("not json").unwrap_err(),
        );
        assert!(format!("{}", err).contains("serialization"));
    }
}
