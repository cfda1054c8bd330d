//! Measurement Records Flowing Through the Gateway
//!
//! ## Overview
//!
//! Two record types travel through the pipeline:
//!
//! ```text
//! BLE decoder ──→ RawMeasurement ──→ enrich() ──→ EnrichedRecord ──→ broker
//!                 (immutable)                     (immutable)
//! ```
//!
//! A [`RawMeasurement`] is what the scanner decoded from one advertisement:
//! the tag address, a map of measurement name to number and the time the
//! advertisement was received.
//!
//! An [`EnrichedRecord`] is the same reading after the tag profile has been
//! applied. It carries the calibrated values, the raw value of every
//! calibrated measurement, the resolved tag name and optionally a dew point.
//!
//! ## Payload Format
//!
//! Records are published as a flat JSON object. Measurement fields keep their
//! names, the gateway adds its own fields under the `ruuvi_mqtt_` prefix:
//!
//! ```json
//! {
//!   "humidity": 50.0,
//!   "measurement_sequence_number": 1234,
//!   "temperature": 21.5,
//!   "mac": "aabbccddeeff",
//!   "ruuvi_mqtt_raw_temperature": 20.0,
//!   "ruuvi_mqtt_dewpoint": 9.27,
//!   "ruuvi_mqtt_name": "kitchen",
//!   "ruuvi_mqtt_timestamp": 1700000000000
//! }
//! ```

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::device::DeviceId;
use crate::time::Timestamp;

/// Prefix shared by every field the gateway adds to the payload
pub const RESERVED_PREFIX: &str = "ruuvi_mqtt_";
/// Payload field holding the receipt time in milliseconds since epoch
pub const TIMESTAMP_FIELD: &str = "ruuvi_mqtt_timestamp";
/// Payload field holding the resolved tag name
pub const NAME_FIELD: &str = "ruuvi_mqtt_name";
/// Payload field holding the derived dew point
pub const DEWPOINT_FIELD: &str = "ruuvi_mqtt_dewpoint";
/// Prefix of the payload fields preserving pre-calibration values
pub const RAW_FIELD_PREFIX: &str = "ruuvi_mqtt_raw_";
/// Payload field holding the canonical device identifier
pub const MAC_FIELD: &str = "mac";

/// Temperature in °C
pub const TEMPERATURE: &str = "temperature";
/// Relative humidity in %
pub const HUMIDITY: &str = "humidity";
/// Counter the tag increments for every new measurement
pub const SEQUENCE_NUMBER: &str = "measurement_sequence_number";

/// Whether `name` collides with a payload field the gateway writes itself
pub fn is_reserved_field(name: &str) -> bool {
    name == MAC_FIELD || name.starts_with(RESERVED_PREFIX)
}

/// Name of the payload field preserving the raw value of `measurement`
pub fn raw_field_name(measurement: &str) -> String {
    format!("{}{}", RAW_FIELD_PREFIX, measurement)
}

/// Numeric measurement value
///
/// Integers (sequence numbers, counters, data format) are kept apart from
/// floats so they reach the broker unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
}

impl Value {
    /// Value as a float, for calibration and derived values
    pub fn as_f64(self) -> f64 {
        match self {
            Value::Integer(v) => v as f64,
            Value::Float(v) => v,
        }
    }

    /// Value as an integer if it is one
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(v),
            Value::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(v as i64),
            Value::Float(_) => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

/// One decoded advertisement
#[derive(Debug, Clone, PartialEq)]
pub struct RawMeasurement {
    device: DeviceId,
    values: BTreeMap<String, Value>,
    received_at: Timestamp,
}

impl RawMeasurement {
    /// Create an empty measurement for `device` received at `received_at`
    pub fn new(device: DeviceId, received_at: Timestamp) -> Self {
        Self {
            device,
            values: BTreeMap::new(),
            received_at,
        }
    }

    /// Add a measurement value
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Create from an already collected value map
    pub fn from_values(device: DeviceId, received_at: Timestamp, values: BTreeMap<String, Value>) -> Self {
        Self {
            device,
            values,
            received_at,
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn received_at(&self) -> Timestamp {
        self.received_at
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).copied()
    }
}

/// A measurement after naming, calibration and enrichment
///
/// Built only by [`crate::enrich::enrich`], which guarantees that the raw
/// values are exactly those of the calibrated measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    pub(crate) device: DeviceId,
    pub(crate) name: String,
    pub(crate) timestamp: Timestamp,
    pub(crate) values: BTreeMap<String, Value>,
    pub(crate) raw_values: BTreeMap<String, f64>,
    pub(crate) dew_point: Option<f64>,
}

impl EnrichedRecord {
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Resolved tag name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receipt time of the underlying measurement
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Measurement values, calibrated where an offset function applied
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).copied()
    }

    /// Pre-calibration values, keyed by measurement name
    pub fn raw_values(&self) -> &BTreeMap<String, f64> {
        &self.raw_values
    }

    pub fn raw_value(&self, measurement: &str) -> Option<f64> {
        self.raw_values.get(measurement).copied()
    }

    pub fn dew_point(&self) -> Option<f64> {
        self.dew_point
    }

    /// Serialize to the JSON payload published to the broker
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Serialize for EnrichedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let extra = 3 + self.raw_values.len() + usize::from(self.dew_point.is_some());
        let mut map = serializer.serialize_map(Some(self.values.len() + extra))?;

        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.serialize_entry(MAC_FIELD, &self.device)?;
        for (measurement, raw) in &self.raw_values {
            map.serialize_entry(&raw_field_name(measurement), raw)?;
        }
        if let Some(dew_point) = self.dew_point {
            map.serialize_entry(DEWPOINT_FIELD, &dew_point)?;
        }
        map.serialize_entry(NAME_FIELD, &self.name)?;
        map.serialize_entry(TIMESTAMP_FIELD, &self.timestamp)?;

        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceId {
        "aa:bb:cc:dd:ee:ff".parse().unwrap()
    }

    #[test]
    fn value_deserializes_integers_and_floats() {
        let values: BTreeMap<String, Value> =
            serde_json::from_str(r#"{"seq": 12, "temperature": 21.5}"#).unwrap();

        assert_eq!(values["seq"], Value::Integer(12));
        assert_eq!(values["temperature"], Value::Float(21.5));
        assert_eq!(values["seq"].as_f64(), 12.0);
        assert_eq!(Value::Float(3.0).as_i64(), Some(3));
        assert_eq!(Value::Float(3.5).as_i64(), None);
    }

    #[test]
    fn payload_contains_reserved_fields() {
        let record = EnrichedRecord {
            device: device(),
            name: "kitchen".into(),
            timestamp: 1_700_000_000_000,
            values: [
                ("temperature".to_string(), Value::Float(21.5)),
                (SEQUENCE_NUMBER.to_string(), Value::Integer(7)),
            ]
            .into_iter()
            .collect(),
            raw_values: [("temperature".to_string(), 20.0)].into_iter().collect(),
            dew_point: Some(9.27),
        };

        let payload: serde_json::Value = serde_json::from_slice(&record.to_json().unwrap()).unwrap();

        assert_eq!(payload["mac"], "aabbccddeeff");
        assert_eq!(payload["temperature"], 21.5);
        assert_eq!(payload[SEQUENCE_NUMBER], 7);
        assert_eq!(payload["ruuvi_mqtt_raw_temperature"], 20.0);
        assert_eq!(payload[DEWPOINT_FIELD], 9.27);
        assert_eq!(payload[NAME_FIELD], "kitchen");
        assert_eq!(payload[TIMESTAMP_FIELD], 1_700_000_000_000u64);
    }

    #[test]
    fn dew_point_field_is_optional() {
        let record = EnrichedRecord {
            device: device(),
            name: "aabbccddeeff".into(),
            timestamp: 1,
            values: BTreeMap::new(),
            raw_values: BTreeMap::new(),
            dew_point: None,
        };

        let payload: serde_json::Value = serde_json::from_slice(&record.to_json().unwrap()).unwrap();
        let object = payload.as_object().unwrap();

        assert!(!object.contains_key(DEWPOINT_FIELD));
        assert!(!object.keys().any(|k| k.starts_with(RAW_FIELD_PREFIX)));
        assert_eq!(object.len(), 3);
    }
}
