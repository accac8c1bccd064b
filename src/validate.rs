//! Per-sensor-kind schema and range validation of consumed messages.
//!
//! Validation is a pure function and deliberately fail-fast: a message
//! that fails any check is counted and dropped, never retried or
//! forwarded. Invalid data indicates a bug or a malfunctioning device,
//! not a transient condition.
//!
//! The raw wire record is re-parsed with every field optional so that the
//! validator, not the deserializer, decides which of the three rejection
//! reasons applies.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::ValidationLimits;
use crate::model::{
    RoadCondition, SensorPayload, SensorReading, WeatherCondition,
};

/// Why a message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// Not valid JSON, wrong value types, or required fields missing.
    MalformedSchema,

    /// A value outside its documented range, including enum strings
    /// naming no known variant.
    OutOfRange,

    /// `sensor_type` names none of the known kinds.
    UnknownSensorKind,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::MalformedSchema => write!(f, "malformed schema"),
            RejectionReason::OutOfRange => write!(f, "out-of-range value"),
            RejectionReason::UnknownSensorKind => write!(f, "unknown sensor kind"),
        }
    }
}

/// A reading that passed all checks and may enter the transform stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPoint {
    pub reading: SensorReading,
}

/// Loosely-typed mirror of the wire record.
///
/// Everything beyond `sensor_type` is optional here; presence is checked
/// per kind. Enum-ish strings stay strings so an unknown value rejects as
/// out-of-range rather than failing deserialization.
#[derive(Debug, Deserialize)]
struct RawMessage {
    sensor_type: String,
    edge_id: Option<String>,
    district_id: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    speed_kmh: Option<f64>,
    temperature_c: Option<f64>,
    humidity: Option<f64>,
    weather_conditions: Option<String>,
    road_condition: Option<String>,
    confidence_score: Option<f64>,
    vehicle_count: Option<i64>,
}

/// Validate one raw message payload against the schema and `limits`.
///
/// Returns the strongly-typed reading on success, or the first applicable
/// [`RejectionReason`] on failure.
pub fn validate(
    payload: &[u8],
    limits: &ValidationLimits,
) -> Result<ValidatedPoint, RejectionReason> {
    let raw: RawMessage =
        serde_json::from_slice(payload).map_err(|_| RejectionReason::MalformedSchema)?;

    // Common required fields
    let edge_id = raw.edge_id.ok_or(RejectionReason::MalformedSchema)?;
    let district_id = raw.district_id.ok_or(RejectionReason::MalformedSchema)?;
    let timestamp = raw.timestamp.ok_or(RejectionReason::MalformedSchema)?;
    let latitude = raw.latitude.ok_or(RejectionReason::MalformedSchema)?;
    let longitude = raw.longitude.ok_or(RejectionReason::MalformedSchema)?;

    // Common range checks. Negated interval checks also catch NaN.
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(RejectionReason::OutOfRange);
    }
    let max_drift = chrono::Duration::from_std(limits.max_future_drift)
        .unwrap_or_else(|_| chrono::Duration::seconds(300));
    if timestamp > Utc::now() + max_drift {
        return Err(RejectionReason::OutOfRange);
    }

    let payload = match raw.sensor_type.as_str() {
        "speed" => {
            let speed_kmh = raw.speed_kmh.ok_or(RejectionReason::MalformedSchema)?;
            if !(0.0..=limits.max_speed_kmh).contains(&speed_kmh) {
                return Err(RejectionReason::OutOfRange);
            }
            SensorPayload::Speed { speed_kmh }
        }
        "weather" => {
            let temperature_c = raw.temperature_c.ok_or(RejectionReason::MalformedSchema)?;
            let humidity = raw.humidity.ok_or(RejectionReason::MalformedSchema)?;
            let conditions_raw = raw
                .weather_conditions
                .ok_or(RejectionReason::MalformedSchema)?;

            if !(0.0..=100.0).contains(&humidity) || !temperature_c.is_finite() {
                return Err(RejectionReason::OutOfRange);
            }
            let weather_conditions =
                WeatherCondition::parse(&conditions_raw).ok_or(RejectionReason::OutOfRange)?;

            SensorPayload::Weather {
                temperature_c,
                humidity,
                weather_conditions,
            }
        }
        "camera" => {
            let condition_raw = raw.road_condition.ok_or(RejectionReason::MalformedSchema)?;
            let confidence_score = raw
                .confidence_score
                .ok_or(RejectionReason::MalformedSchema)?;

            let road_condition =
                RoadCondition::parse(&condition_raw).ok_or(RejectionReason::OutOfRange)?;
            if !(0.0..=1.0).contains(&confidence_score) {
                return Err(RejectionReason::OutOfRange);
            }
            // Negative or wider-than-u32 counts are corrupt, not truncatable
            let vehicle_count = match raw.vehicle_count {
                Some(count) => {
                    Some(u32::try_from(count).map_err(|_| RejectionReason::OutOfRange)?)
                }
                None => None,
            };

            SensorPayload::Camera {
                road_condition,
                confidence_score,
                vehicle_count,
            }
        }
        _ => return Err(RejectionReason::UnknownSensorKind),
    };

    Ok(ValidatedPoint {
        reading: SensorReading {
            edge_id,
            district_id,
            timestamp,
            latitude,
            longitude,
            payload,
        },
    })
}
