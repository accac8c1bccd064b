//! Wire data model for road-sensor telemetry.
//!
//! Every message on the bus is a flat, self-describing JSON record with a
//! `sensor_type` discriminator. The producer serializes [`SensorReading`]
//! directly; the consumer re-parses the same shape through the validator
//! before anything is trusted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three sensor kinds carried on the telemetry topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Speed,
    Weather,
    Camera,
}

impl SensorKind {
    /// Get all sensor kinds.
    pub fn all() -> &'static [SensorKind] {
        &[SensorKind::Speed, SensorKind::Weather, SensorKind::Camera]
    }

    /// Get the kind name as used on the wire and in store tags.
    pub fn name(&self) -> &'static str {
        match self {
            SensorKind::Speed => "speed",
            SensorKind::Weather => "weather",
            SensorKind::Camera => "camera",
        }
    }

    /// Measurement name in the time-series store for this kind.
    pub fn measurement(&self) -> &'static str {
        match self {
            SensorKind::Speed => "sensor_speed",
            SensorKind::Weather => "sensor_weather",
            SensorKind::Camera => "sensor_camera",
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Fixed enumerated set of weather conditions reported by weather sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    Clear,
    Clouds,
    Rain,
    Snow,
    Fog,
    Storm,
}

impl WeatherCondition {
    /// Get all weather conditions.
    pub fn all() -> &'static [WeatherCondition] {
        &[
            WeatherCondition::Clear,
            WeatherCondition::Clouds,
            WeatherCondition::Rain,
            WeatherCondition::Snow,
            WeatherCondition::Fog,
            WeatherCondition::Storm,
        ]
    }

    /// Get the condition name as used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            WeatherCondition::Clear => "clear",
            WeatherCondition::Clouds => "clouds",
            WeatherCondition::Rain => "rain",
            WeatherCondition::Snow => "snow",
            WeatherCondition::Fog => "fog",
            WeatherCondition::Storm => "storm",
        }
    }

    /// Parse a wire string into a condition, if it names one.
    pub fn parse(s: &str) -> Option<WeatherCondition> {
        Self::all().iter().copied().find(|c| c.name() == s)
    }
}

impl std::fmt::Display for WeatherCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Fixed enumerated set of camera-derived road conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoadCondition {
    Clear,
    Congestion,
    Accident,
    Obstacles,
    Flooding,
}

impl RoadCondition {
    /// Get all road conditions.
    pub fn all() -> &'static [RoadCondition] {
        &[
            RoadCondition::Clear,
            RoadCondition::Congestion,
            RoadCondition::Accident,
            RoadCondition::Obstacles,
            RoadCondition::Flooding,
        ]
    }

    /// Get the condition name as used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            RoadCondition::Clear => "clear",
            RoadCondition::Congestion => "congestion",
            RoadCondition::Accident => "accident",
            RoadCondition::Obstacles => "obstacles",
            RoadCondition::Flooding => "flooding",
        }
    }

    /// Parse a wire string into a condition, if it names one.
    pub fn parse(s: &str) -> Option<RoadCondition> {
        Self::all().iter().copied().find(|c| c.name() == s)
    }
}

impl std::fmt::Display for RoadCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Sensor-kind specific portion of a reading.
///
/// Flattened into [`SensorReading`] so the wire record stays flat with a
/// `sensor_type` discriminator field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sensor_type", rename_all = "snake_case")]
pub enum SensorPayload {
    Speed {
        /// Smoothed vehicle speed in km/h; never negative.
        speed_kmh: f64,
    },
    Weather {
        temperature_c: f64,
        /// Relative humidity in percent, 0..=100.
        humidity: f64,
        weather_conditions: WeatherCondition,
    },
    Camera {
        road_condition: RoadCondition,
        /// Classifier confidence in 0.0..=1.0.
        confidence_score: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        vehicle_count: Option<u32>,
    },
}

impl SensorPayload {
    /// The sensor kind this payload belongs to.
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorPayload::Speed { .. } => SensorKind::Speed,
            SensorPayload::Weather { .. } => SensorKind::Weather,
            SensorPayload::Camera { .. } => SensorKind::Camera,
        }
    }
}

/// A single reading produced by an edge device.
///
/// `edge_id` and `district_id` are fixed when the device is provisioned.
/// `timestamp` is generation time and is non-decreasing per device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Stable identifier of the originating device (e.g. `E-00042`).
    pub edge_id: String,

    /// Geographic zone the device belongs to.
    pub district_id: String,

    /// Generation time at the edge.
    pub timestamp: DateTime<Utc>,

    pub latitude: f64,

    pub longitude: f64,

    #[serde(flatten)]
    pub payload: SensorPayload,
}

impl SensorReading {
    /// The sensor kind of this reading.
    pub fn kind(&self) -> SensorKind {
        self.payload.kind()
    }
}
