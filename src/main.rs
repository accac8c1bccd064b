//! Road Telemetry - road-sensor pipeline from edge devices to time-series store
//!
//! The binary runs one or both pipeline roles:
//!
//! - **producer**: simulated edge devices generating speed, weather and
//!   camera readings, buffering them locally and publishing to Kafka
//! - **consumer**: validates bus messages, transforms them to points and
//!   batch-writes them to InfluxDB
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables (see
//! [`road_telemetry::config::Config`]). In addition:
//!
//! - `ROAD_TELEMETRY_ROLE`: `producer`, `consumer` or `all` (default: all)
//! - `RUST_LOG`: Logging level filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use road_telemetry::buffer::ReadingBuffer;
use road_telemetry::bus::{create_consumer, KafkaSink};
use road_telemetry::config::Config;
use road_telemetry::consumer::ConsumerPipeline;
use road_telemetry::generator::{DeviceClock, DeviceSpec, ReadingGenerator};
use road_telemetry::model::SensorKind;
use road_telemetry::publisher::EdgePublisher;
use road_telemetry::stats::StatsTracker;
use road_telemetry::writer::{BatchWriter, StoreClient};

/// How long to wait for tasks to drain at shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// Which halves of the pipeline this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Producer,
    Consumer,
    All,
}

impl Role {
    fn from_env() -> Result<Self, String> {
        match std::env::var("ROAD_TELEMETRY_ROLE") {
            Err(_) => Ok(Role::All),
            Ok(value) => match value.to_lowercase().as_str() {
                "producer" => Ok(Role::Producer),
                "consumer" => Ok(Role::Consumer),
                "all" | "" => Ok(Role::All),
                other => Err(format!(
                    "invalid ROAD_TELEMETRY_ROLE '{}' (expected producer, consumer or all)",
                    other
                )),
            },
        }
    }

    fn runs_producer(self) -> bool {
        matches!(self, Role::Producer | Role::All)
    }

    fn runs_consumer(self) -> bool {
        matches!(self, Role::Consumer | Role::All)
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting Road Telemetry service...");

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                kafka_brokers = %config.kafka_brokers,
                kafka_topic = %config.kafka_topic,
                influx_url = %config.influx_url,
                device_count = config.device_count,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let role = match Role::from_env() {
        Ok(role) => role,
        Err(e) => {
            error!(error = %e, "Failed to determine role");
            std::process::exit(1);
        }
    };
    info!(role = ?role, "Role selected");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    if role.runs_producer() {
        match spawn_producer(&config, shutdown_rx.clone()) {
            Ok(mut producer_handles) => handles.append(&mut producer_handles),
            Err(e) => {
                error!(error = %e, "Failed to start producer");
                std::process::exit(1);
            }
        }
    }

    if role.runs_consumer() {
        match spawn_consumer(&config, shutdown_rx.clone()) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                error!(error = %e, "Failed to start consumer");
                std::process::exit(1);
            }
        }
    }

    // Wait for shutdown signal
    info!("Road Telemetry running. Press Ctrl+C to stop.");
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, stopping...");
        }
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
    }

    // Graceful shutdown: tasks drain their buffers and flush batches
    if shutdown_tx.send(true).is_err() {
        warn!("All tasks already stopped");
    }

    let drain = async {
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Task panicked during shutdown");
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        warn!("Shutdown timed out after {:?}", SHUTDOWN_TIMEOUT);
    }

    info!("Road Telemetry stopped");
}

/// Provision the simulated devices and spawn their generation and
/// publisher tasks. One Kafka producer is shared by every device.
fn spawn_producer(
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>, road_telemetry::bus::BusError> {
    let sink = Arc::new(KafkaSink::new(config)?);
    let mut handles = Vec::new();

    for index in 0..config.device_count {
        let device = DeviceSpec::provision(index, config.district_count);
        let buffer = Arc::new(ReadingBuffer::new(config.buffer_capacity));
        info!(
            edge_id = %device.edge_id,
            district_id = %device.district_id,
            latitude = device.latitude,
            longitude = device.longitude,
            "Device provisioned"
        );

        // One generation task per device, cycling all its sensor kinds
        // sequentially so readings enter the buffer in timestamp order
        let clock = Arc::new(DeviceClock::new());
        let generators: Vec<ReadingGenerator> = SensorKind::all()
            .iter()
            .map(|&kind| {
                ReadingGenerator::new(
                    device.clone(),
                    kind,
                    clock.clone(),
                    config.cadence_min_secs,
                    config.cadence_max_secs,
                )
            })
            .collect();
        handles.push(tokio::spawn(run_device(
            generators,
            buffer.clone(),
            shutdown.clone(),
        )));

        let publisher = EdgePublisher::new(
            sink.clone(),
            buffer,
            device.edge_id.clone(),
            config.publish_batch_size,
            config.publish_interval,
            config.retry.clone(),
        );
        handles.push(tokio::spawn(publisher.run(shutdown.clone())));
    }

    info!(
        devices = config.device_count,
        tasks = handles.len(),
        "Producer started"
    );
    Ok(handles)
}

/// Build the consumer pipeline and spawn its run loop.
fn spawn_consumer(
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>, Box<dyn std::error::Error>> {
    let store = StoreClient::new(config)?;
    info!(write_url = %store.write_url(), "Store client initialized");

    let stats = Arc::new(StatsTracker::new());
    let writer = BatchWriter::new(
        store,
        config.write_batch_size,
        config.retry.clone(),
        stats.clone(),
    );
    let pipeline = ConsumerPipeline::new(config.limits.clone(), writer, stats);
    let consumer = create_consumer(config)?;

    let flush_interval = config.write_flush_interval;
    Ok(tokio::spawn(pipeline.run(
        consumer,
        flush_interval,
        shutdown,
    )))
}

/// Generate readings for all of one device's sensors until shutdown.
///
/// Each sensor kind keeps its own jittered cadence; whichever is due
/// next generates. A single task per device keeps timestamp issuance
/// and buffer pushes sequential, so one device's readings enter the
/// buffer in non-decreasing timestamp order. Generation never waits on
/// the bus.
async fn run_device(
    mut generators: Vec<ReadingGenerator>,
    buffer: Arc<ReadingBuffer>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut due: Vec<Instant> = generators
        .iter()
        .map(|g| Instant::now() + g.cadence())
        .collect();

    loop {
        let (index, deadline) = match due
            .iter()
            .copied()
            .enumerate()
            .min_by_key(|&(_, deadline)| deadline)
        {
            Some(next) => next,
            None => return,
        };

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                buffer.push(generators[index].next());
                due[index] = Instant::now() + generators[index].cadence();
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}
