//! Transformation of validated readings into time-series points.
//!
//! The target store indexes tags but not fields, so the split matters:
//! low-cardinality dimensions (`district_id`, `edge_id`, `sensor_type`,
//! condition enums) become tags, measured values become fields. The
//! timestamp is carried through unmodified at the source's precision.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::model::SensorPayload;
use crate::validate::ValidatedPoint;

/// A numeric field value in the store's point model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{}", v),
            // Integer fields carry the line-protocol `i` suffix
            FieldValue::Integer(v) => write!(f, "{}i", v),
        }
    }
}

/// One point bound for the time-series store.
///
/// Owned solely by the batch writer until flushed; after a successful
/// flush the store owns the data and the point is discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    /// Measurement name, one of `sensor_speed|sensor_weather|sensor_camera`.
    pub measurement: &'static str,

    /// Indexed dimensions. Ordered map so encodings are deterministic.
    pub tags: BTreeMap<&'static str, String>,

    /// Measured values (not indexed).
    pub fields: BTreeMap<&'static str, FieldValue>,

    pub timestamp: DateTime<Utc>,
}

impl MetricPoint {
    /// Encode this point as one InfluxDB line-protocol line (ns precision).
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_measurement(self.measurement);

        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(key);
            line.push('=');
            line.push_str(&escape_tag_value(value));
        }

        let mut first = true;
        for (key, value) in &self.fields {
            line.push(if first { ' ' } else { ',' });
            first = false;
            line.push_str(key);
            line.push('=');
            line.push_str(&value.to_string());
        }

        let nanos = self.timestamp.timestamp_nanos_opt().unwrap_or_default();
        line.push(' ');
        line.push_str(&nanos.to_string());
        line
    }
}

fn escape_measurement(name: &str) -> String {
    name.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag_value(value: &str) -> String {
    value
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

/// Map a validated reading into the store's point model.
pub fn transform(point: ValidatedPoint) -> MetricPoint {
    let reading = point.reading;
    let kind = reading.kind();

    let mut tags: BTreeMap<&'static str, String> = BTreeMap::new();
    tags.insert("district_id", reading.district_id);
    tags.insert("edge_id", reading.edge_id);
    tags.insert("sensor_type", kind.name().to_string());

    let mut fields: BTreeMap<&'static str, FieldValue> = BTreeMap::new();
    fields.insert("latitude", FieldValue::Float(reading.latitude));
    fields.insert("longitude", FieldValue::Float(reading.longitude));

    match reading.payload {
        SensorPayload::Speed { speed_kmh } => {
            fields.insert("speed_kmh", FieldValue::Float(speed_kmh));
        }
        SensorPayload::Weather {
            temperature_c,
            humidity,
            weather_conditions,
        } => {
            tags.insert("weather_conditions", weather_conditions.name().to_string());
            fields.insert("temperature_c", FieldValue::Float(temperature_c));
            fields.insert("humidity", FieldValue::Float(humidity));
        }
        SensorPayload::Camera {
            road_condition,
            confidence_score,
            vehicle_count,
        } => {
            tags.insert("road_condition", road_condition.name().to_string());
            fields.insert("confidence_score", FieldValue::Float(confidence_score));
            if let Some(count) = vehicle_count {
                fields.insert("vehicle_count", FieldValue::Integer(count as i64));
            }
        }
    }

    MetricPoint {
        measurement: kind.measurement(),
        tags,
        fields,
        timestamp: reading.timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RoadCondition, SensorReading, WeatherCondition};
    use chrono::TimeZone;

    fn validated(payload: SensorPayload) -> ValidatedPoint {
        ValidatedPoint {
            reading: SensorReading {
                edge_id: "E-00005".to_string(),
                district_id: "district-03".to_string(),
                timestamp: Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap(),
                latitude: 42.351,
                longitude: 13.402,
                payload,
            },
        }
    }

    #[test]
    fn test_speed_point() {
        let point = transform(validated(SensorPayload::Speed { speed_kmh: 57.3 }));

        assert_eq!(point.measurement, "sensor_speed");
        assert_eq!(point.tags.get("district_id").unwrap(), "district-03");
        assert_eq!(point.tags.get("edge_id").unwrap(), "E-00005");
        assert_eq!(point.tags.get("sensor_type").unwrap(), "speed");
        assert!(!point.tags.contains_key("road_condition"));
        assert_eq!(
            point.fields.get("speed_kmh"),
            Some(&FieldValue::Float(57.3))
        );
        assert_eq!(
            point.fields.get("latitude"),
            Some(&FieldValue::Float(42.351))
        );
    }

    #[test]
    fn test_weather_point_tags_conditions() {
        let point = transform(validated(SensorPayload::Weather {
            temperature_c: -1.5,
            humidity: 88.0,
            weather_conditions: WeatherCondition::Snow,
        }));

        assert_eq!(point.measurement, "sensor_weather");
        assert_eq!(point.tags.get("weather_conditions").unwrap(), "snow");
        assert_eq!(
            point.fields.get("temperature_c"),
            Some(&FieldValue::Float(-1.5))
        );
        assert_eq!(point.fields.get("humidity"), Some(&FieldValue::Float(88.0)));
        // Conditions are indexed dimensions, not measured values
        assert!(!point.fields.contains_key("weather_conditions"));
    }

    #[test]
    fn test_camera_point() {
        let point = transform(validated(SensorPayload::Camera {
            road_condition: RoadCondition::Flooding,
            confidence_score: 0.72,
            vehicle_count: Some(11),
        }));

        assert_eq!(point.measurement, "sensor_camera");
        assert_eq!(point.tags.get("road_condition").unwrap(), "flooding");
        assert_eq!(
            point.fields.get("vehicle_count"),
            Some(&FieldValue::Integer(11))
        );
    }

    #[test]
    fn test_camera_point_without_vehicle_count() {
        let point = transform(validated(SensorPayload::Camera {
            road_condition: RoadCondition::Clear,
            confidence_score: 0.99,
            vehicle_count: None,
        }));
        assert!(!point.fields.contains_key("vehicle_count"));
    }

    #[test]
    fn test_timestamp_carried_through() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let point = transform(validated(SensorPayload::Speed { speed_kmh: 40.0 }));
        assert_eq!(point.timestamp, ts);
    }

    #[test]
    fn test_line_protocol_shape() {
        let point = transform(validated(SensorPayload::Camera {
            road_condition: RoadCondition::Congestion,
            confidence_score: 0.5,
            vehicle_count: Some(3),
        }));
        let line = point.to_line_protocol();

        // measurement,tags fields timestamp
        assert!(line.starts_with("sensor_camera,"));
        assert!(line.contains("district_id=district-03"));
        assert!(line.contains("edge_id=E-00005"));
        assert!(line.contains("road_condition=congestion"));
        assert!(line.contains("confidence_score=0.5"));
        assert!(line.contains("vehicle_count=3i"));

        let nanos = point.timestamp.timestamp_nanos_opt().unwrap();
        assert!(line.ends_with(&format!(" {}", nanos)));

        // Exactly two unescaped spaces: tags/fields and fields/timestamp
        assert_eq!(line.matches(' ').count(), 2);
    }

    #[test]
    fn test_line_protocol_escapes_tag_values() {
        let mut point = transform(validated(SensorPayload::Speed { speed_kmh: 10.0 }));
        point
            .tags
            .insert("district_id", "old town, west".to_string());
        let line = point.to_line_protocol();
        assert!(line.contains("district_id=old\\ town\\,\\ west"));
    }

    #[test]
    fn test_roundtrip_preserves_values() {
        // Simulated read-back: parse the encoded line and compare
        let original = transform(validated(SensorPayload::Weather {
            temperature_c: 21.25,
            humidity: 40.5,
            weather_conditions: WeatherCondition::Clear,
        }));
        let line = original.to_line_protocol();

        let mut parts = line.splitn(3, ' ');
        let head = parts.next().unwrap();
        let fields_part = parts.next().unwrap();
        let ts_part = parts.next().unwrap();

        let mut head_parts = head.split(',');
        assert_eq!(head_parts.next().unwrap(), "sensor_weather");
        let parsed_tags: BTreeMap<&str, &str> = head_parts
            .map(|kv| {
                let mut it = kv.splitn(2, '=');
                (it.next().unwrap(), it.next().unwrap())
            })
            .collect();
        for (key, value) in &original.tags {
            assert_eq!(parsed_tags.get(key), Some(&value.as_str()));
        }

        let parsed_fields: BTreeMap<&str, f64> = fields_part
            .split(',')
            .map(|kv| {
                let mut it = kv.splitn(2, '=');
                (
                    it.next().unwrap(),
                    it.next().unwrap().trim_end_matches('i').parse().unwrap(),
                )
            })
            .collect();
        for (key, value) in &original.fields {
            let parsed = parsed_fields.get(key).unwrap();
            let expected = match value {
                FieldValue::Float(v) => *v,
                FieldValue::Integer(v) => *v as f64,
            };
            assert!((parsed - expected).abs() < 1e-9);
        }

        let parsed_ts: i64 = ts_part.parse().unwrap();
        assert_eq!(
            parsed_ts,
            original.timestamp.timestamp_nanos_opt().unwrap()
        );
    }
}
