//! Synthetic reading generation for simulated edge devices.
//!
//! Each device is provisioned once with a stable `edge_id`, a district and
//! fixed coordinates, then runs one generator per sensor kind. Generation
//! is non-blocking and infallible; cadence carries uniform jitter so
//! devices do not synchronize their publishes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::model::{RoadCondition, SensorKind, SensorPayload, SensorReading, WeatherCondition};

/// Base coordinates the simulated city is centered on.
const CITY_CENTER_LAT: f64 = 42.35;
const CITY_CENTER_LON: f64 = 13.40;

/// Spread of district centers around the city center, in degrees.
const DISTRICT_SPREAD_DEG: f64 = 0.05;

/// Maximum random offset of a device from its district center, in degrees.
const DEVICE_OFFSET_DEG: f64 = 0.02;

/// Number of raw samples in the producer-side speed smoothing window.
const SPEED_WINDOW_LEN: usize = 5;

/// Immutable identity of a simulated device, fixed at provisioning time.
#[derive(Debug, Clone)]
pub struct DeviceSpec {
    /// Stable device identifier, `E-XXXXX` format.
    pub edge_id: String,

    /// District the device is assigned to.
    pub district_id: String,

    pub latitude: f64,

    pub longitude: f64,

    /// Typical traffic speed at this location, km/h.
    pub typical_speed_kmh: f64,
}

impl DeviceSpec {
    /// Provision device `index`, assigning it round-robin to one of
    /// `district_count` districts and placing it near that district's
    /// center with a small random offset.
    pub fn provision(index: usize, district_count: usize) -> Self {
        let mut rng = rand::thread_rng();

        let district_index = index % district_count.max(1);
        let district_id = format!("district-{:02}", district_index + 1);

        // Spread district centers on a ring around the city center
        let angle = district_index as f64 / district_count.max(1) as f64
            * std::f64::consts::TAU;
        let center_lat = CITY_CENTER_LAT + DISTRICT_SPREAD_DEG * angle.sin();
        let center_lon = CITY_CENTER_LON + DISTRICT_SPREAD_DEG * angle.cos();

        Self {
            edge_id: format!("E-{:05}", index),
            district_id,
            latitude: center_lat + rng.gen_range(-DEVICE_OFFSET_DEG..=DEVICE_OFFSET_DEG),
            longitude: center_lon + rng.gen_range(-DEVICE_OFFSET_DEG..=DEVICE_OFFSET_DEG),
            typical_speed_kmh: rng.gen_range(30.0..=90.0),
        }
    }
}

/// Per-device timestamp source, shared by all of the device's generators.
///
/// Issues timestamps that never decrease in issuance order for one
/// `edge_id`, across sensor kinds, even if the wall clock steps back.
#[derive(Debug, Default)]
pub struct DeviceClock {
    last_nanos: AtomicI64,
}

impl DeviceClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time, clamped to the latest timestamp already issued for
    /// this device.
    pub fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let prev = self.last_nanos.fetch_max(wall, Ordering::SeqCst);
        Utc.timestamp_nanos(wall.max(prev))
    }
}

/// Generator for one sensor kind on one device.
///
/// Holds the device-local state that never goes on the wire: the speed
/// moving-average window and the shared device clock (readings are
/// non-decreasing in time per device, across all its sensor kinds).
pub struct ReadingGenerator {
    device: DeviceSpec,
    kind: SensorKind,
    clock: Arc<DeviceClock>,
    cadence_min_secs: f64,
    cadence_max_secs: f64,
    speed_window: VecDeque<f64>,
    road_weights: WeightedIndex<u32>,
    weather_weights: WeightedIndex<u32>,
}

impl ReadingGenerator {
    /// Create a generator for `kind` on `device`.
    ///
    /// `clock` must be the one instance shared by every generator of the
    /// device so timestamps stay ordered across kinds.
    /// `cadence_min_secs..cadence_max_secs` is the jitter window for
    /// [`ReadingGenerator::cadence`].
    pub fn new(
        device: DeviceSpec,
        kind: SensorKind,
        clock: Arc<DeviceClock>,
        cadence_min_secs: f64,
        cadence_max_secs: f64,
    ) -> Self {
        // Mostly clear roads, occasional congestion, rare incidents
        let road_weights =
            WeightedIndex::new([70u32, 15, 5, 5, 5]).expect("static weights are valid");
        // Mostly clear/cloudy weather
        let weather_weights =
            WeightedIndex::new([40u32, 25, 15, 5, 10, 5]).expect("static weights are valid");

        Self {
            device,
            kind,
            clock,
            cadence_min_secs,
            cadence_max_secs,
            speed_window: VecDeque::with_capacity(SPEED_WINDOW_LEN),
            road_weights,
            weather_weights,
        }
    }

    /// The device this generator belongs to.
    pub fn device(&self) -> &DeviceSpec {
        &self.device
    }

    /// Produce one reading. Never blocks, never fails.
    pub fn next(&mut self) -> SensorReading {
        let mut rng = rand::thread_rng();

        let payload = match self.kind {
            SensorKind::Speed => self.next_speed(&mut rng),
            SensorKind::Weather => self.next_weather(&mut rng),
            SensorKind::Camera => self.next_camera(&mut rng),
        };

        SensorReading {
            edge_id: self.device.edge_id.clone(),
            district_id: self.device.district_id.clone(),
            timestamp: self.clock.now(),
            latitude: self.device.latitude,
            longitude: self.device.longitude,
            payload,
        }
    }

    /// Time to wait before the next reading: uniform jitter inside the
    /// configured cadence window.
    pub fn cadence(&self) -> Duration {
        let secs = rand::thread_rng().gen_range(self.cadence_min_secs..=self.cadence_max_secs);
        Duration::from_secs_f64(secs)
    }

    fn next_speed(&mut self, rng: &mut impl Rng) -> SensorPayload {
        let typical = self.device.typical_speed_kmh;
        let raw = rng.gen_range(typical * 0.5..=typical * 1.5);

        if self.speed_window.len() == SPEED_WINDOW_LEN {
            self.speed_window.pop_front();
        }
        self.speed_window.push_back(raw);

        let smoothed =
            self.speed_window.iter().sum::<f64>() / self.speed_window.len() as f64;

        SensorPayload::Speed {
            speed_kmh: smoothed.max(0.0),
        }
    }

    fn next_weather(&self, rng: &mut impl Rng) -> SensorPayload {
        let conditions = WeatherCondition::all()[self.weather_weights.sample(rng)];

        // Temperature and humidity loosely consistent with the condition
        let temperature_c = match conditions {
            WeatherCondition::Snow => rng.gen_range(-8.0..=2.0),
            WeatherCondition::Storm | WeatherCondition::Rain => rng.gen_range(5.0..=18.0),
            _ => rng.gen_range(2.0..=32.0),
        };
        let humidity = match conditions {
            WeatherCondition::Rain | WeatherCondition::Storm | WeatherCondition::Fog => {
                rng.gen_range(70.0..=100.0)
            }
            WeatherCondition::Snow => rng.gen_range(60.0..=95.0),
            _ => rng.gen_range(25.0..=75.0),
        };

        SensorPayload::Weather {
            temperature_c,
            humidity,
            weather_conditions: conditions,
        }
    }

    fn next_camera(&self, rng: &mut impl Rng) -> SensorPayload {
        let road_condition = RoadCondition::all()[self.road_weights.sample(rng)];

        let vehicle_count = if rng.gen_bool(0.8) {
            let base = match road_condition {
                RoadCondition::Congestion => rng.gen_range(20..=60),
                RoadCondition::Accident => rng.gen_range(5..=30),
                _ => rng.gen_range(0..=20),
            };
            Some(base)
        } else {
            None
        };

        SensorPayload::Camera {
            road_condition,
            confidence_score: rng.gen_range(0.5..=1.0),
            vehicle_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(kind: SensorKind) -> ReadingGenerator {
        ReadingGenerator::new(
            DeviceSpec::provision(7, 4),
            kind,
            Arc::new(DeviceClock::new()),
            3.0,
            5.0,
        )
    }

    #[test]
    fn test_provision_edge_id_format() {
        let device = DeviceSpec::provision(42, 4);
        assert_eq!(device.edge_id, "E-00042");
        assert_eq!(device.district_id, "district-03");
    }

    #[test]
    fn test_provision_coordinates_plausible() {
        for i in 0..20 {
            let device = DeviceSpec::provision(i, 4);
            assert!((device.latitude - CITY_CENTER_LAT).abs() < 0.1);
            assert!((device.longitude - CITY_CENTER_LON).abs() < 0.1);
            assert!(device.typical_speed_kmh >= 30.0);
            assert!(device.typical_speed_kmh <= 90.0);
        }
    }

    #[test]
    fn test_identity_stable_across_readings() {
        let mut gen = generator(SensorKind::Speed);
        let a = gen.next();
        let b = gen.next();
        assert_eq!(a.edge_id, b.edge_id);
        assert_eq!(a.district_id, b.district_id);
        assert_eq!(a.latitude, b.latitude);
        assert_eq!(a.longitude, b.longitude);
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let mut gen = generator(SensorKind::Camera);
        let mut last = gen.next().timestamp;
        for _ in 0..50 {
            let ts = gen.next().timestamp;
            assert!(ts >= last);
            last = ts;
        }
    }

    #[test]
    fn test_timestamps_non_decreasing_across_kinds() {
        // All of a device's generators share one clock, so interleaved
        // readings from different kinds stay ordered for that edge_id
        let device = DeviceSpec::provision(1, 4);
        let clock = Arc::new(DeviceClock::new());
        let mut gens: Vec<ReadingGenerator> = SensorKind::all()
            .iter()
            .map(|&kind| {
                ReadingGenerator::new(device.clone(), kind, clock.clone(), 3.0, 5.0)
            })
            .collect();

        let mut last = clock.now();
        let n = gens.len();
        for i in 0..150 {
            let reading = gens[i % n].next();
            assert!(
                reading.timestamp >= last,
                "{:?} went backwards after {:?}",
                reading.timestamp,
                last
            );
            last = reading.timestamp;
        }
    }

    #[test]
    fn test_device_clock_monotonic() {
        let clock = DeviceClock::new();
        let mut last = clock.now();
        for _ in 0..1000 {
            let now = clock.now();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_speed_readings_valid() {
        let mut gen = generator(SensorKind::Speed);
        for _ in 0..100 {
            match gen.next().payload {
                SensorPayload::Speed { speed_kmh } => {
                    assert!(speed_kmh >= 0.0);
                    assert!(speed_kmh < 250.0);
                }
                other => panic!("unexpected payload: {:?}", other),
            }
        }
    }

    #[test]
    fn test_speed_smoothing_bounds() {
        // The moving average of samples drawn from [0.5t, 1.5t] stays
        // inside that same interval.
        let device = DeviceSpec {
            typical_speed_kmh: 60.0,
            ..DeviceSpec::provision(0, 4)
        };
        let mut gen = ReadingGenerator::new(
            device,
            SensorKind::Speed,
            Arc::new(DeviceClock::new()),
            3.0,
            5.0,
        );
        for _ in 0..50 {
            if let SensorPayload::Speed { speed_kmh } = gen.next().payload {
                assert!(speed_kmh >= 30.0);
                assert!(speed_kmh <= 90.0);
            }
        }
    }

    #[test]
    fn test_weather_readings_valid() {
        let mut gen = generator(SensorKind::Weather);
        for _ in 0..100 {
            match gen.next().payload {
                SensorPayload::Weather { humidity, .. } => {
                    assert!((0.0..=100.0).contains(&humidity));
                }
                other => panic!("unexpected payload: {:?}", other),
            }
        }
    }

    #[test]
    fn test_camera_readings_valid() {
        let mut gen = generator(SensorKind::Camera);
        for _ in 0..100 {
            match gen.next().payload {
                SensorPayload::Camera {
                    confidence_score, ..
                } => {
                    assert!((0.0..=1.0).contains(&confidence_score));
                }
                other => panic!("unexpected payload: {:?}", other),
            }
        }
    }

    #[test]
    fn test_cadence_within_window() {
        let gen = generator(SensorKind::Speed);
        for _ in 0..20 {
            let cadence = gen.cadence();
            assert!(cadence >= Duration::from_secs_f64(3.0));
            assert!(cadence <= Duration::from_secs_f64(5.0));
        }
    }
}
