//! Naming & Enrichment Stage
//!
//! Turns a [`RawMeasurement`] into an [`EnrichedRecord`] using the tag's
//! [`TagProfile`]:
//!
//! 1. Resolve the name: the configured one, or the canonical device
//!    identifier when the tag has none
//! 2. Carry over the receipt timestamp of the measurement
//! 3. Run every measurement with an offset function through its polynomial,
//!    keeping the raw value under `ruuvi_mqtt_raw_<measurement>`
//! 4. Optionally derive the dew point from the calibrated temperature and
//!    humidity
//!
//! Measurements named like a reserved payload field (`mac`, `ruuvi_mqtt_*`)
//! are left out so they cannot shadow the fields written here.
//!
//! The input is never modified. A dew point that cannot be computed is left
//! out of the record and reported back, it never fails the record.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::calibration::dew_point_of;
use crate::errors::DomainError;
use crate::measurement::{is_reserved_field, EnrichedRecord, RawMeasurement, Value, HUMIDITY, TEMPERATURE};
use crate::profile::TagProfile;

/// Enrichment switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichOptions {
    /// Attach `ruuvi_mqtt_dewpoint`
    pub dew_point: bool,
}

/// Result of enriching one measurement
#[derive(Debug, Clone, PartialEq)]
pub struct Enriched {
    pub record: EnrichedRecord,
    /// Why the dew point was skipped, if it was
    pub dew_point_error: Option<DomainError>,
}

/// Tags report two decimals, calibrated values are rounded to match
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Build the enriched record for `raw` under `profile`
pub fn enrich(raw: &RawMeasurement, profile: &TagProfile, options: &EnrichOptions) -> Enriched {
    let device = raw.device();
    let name = profile
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| device.to_string());

    let mut values = raw.values().clone();
    values.retain(|measurement, _| !is_reserved_field(measurement));
    let mut raw_values = BTreeMap::new();

    for (measurement, polynomial) in profile.offsets() {
        if let Some(value) = values.get_mut(measurement) {
            let original = value.as_f64();
            *value = Value::Float(round2(polynomial.evaluate(original)));
            raw_values.insert(measurement.to_string(), original);
        }
    }

    let mut dew_point = None;
    let mut dew_point_error = None;

    if options.dew_point {
        let temperature = values.get(TEMPERATURE).map(|v| v.as_f64());
        let humidity = values.get(HUMIDITY).map(|v| v.as_f64());

        match dew_point_of(temperature, humidity) {
            Ok(td) => dew_point = Some(round2(td)),
            Err(e @ DomainError::MissingMeasurement(_)) => {
                debug!("No dew point for {}: {}", device, e);
                dew_point_error = Some(e);
            }
            Err(e) => {
                warn!("Skipping dew point for {} ({}): {}", name, device, e);
                dew_point_error = Some(e);
            }
        }
    }

    Enriched {
        record: EnrichedRecord {
            device,
            name,
            timestamp: raw.received_at(),
            values,
            raw_values,
            dew_point,
        },
        dew_point_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Polynomial;
    use crate::device::DeviceId;
    use crate::measurement::MAC_FIELD;

    fn device() -> DeviceId {
        "aa:bb:cc:dd:ee:ff".parse().unwrap()
    }

    fn raw() -> RawMeasurement {
        RawMeasurement::new(device(), 1_700_000_000_000)
            .with_value(TEMPERATURE, 20.0)
            .with_value(HUMIDITY, 50.0)
            .with_value("pressure", 1013.25)
            .with_value("measurement_sequence_number", 42i64)
    }

    #[test]
    fn unnamed_tag_falls_back_to_device_id() {
        let enriched = enrich(&raw(), &TagProfile::new(), &EnrichOptions::default());

        assert_eq!(enriched.record.name(), "aabbccddeeff");
        assert_eq!(enriched.record.timestamp(), 1_700_000_000_000);
        assert_eq!(enriched.record.values(), raw().values());
        assert!(enriched.record.raw_values().is_empty());
        assert_eq!(enriched.record.dew_point(), None);
        assert_eq!(enriched.dew_point_error, None);
    }

    #[test]
    fn offsets_preserve_raw_values() {
        let profile = TagProfile::new()
            .with_name("kitchen")
            .unwrap()
            .with_offset(TEMPERATURE, "1,1.5".parse().unwrap())
            .with_offset("acceleration_x", Polynomial::identity());

        let input = raw();
        let enriched = enrich(&input, &profile, &EnrichOptions::default());
        let record = enriched.record;

        assert_eq!(record.name(), "kitchen");
        assert_eq!(record.get(TEMPERATURE), Some(Value::Float(21.5)));
        assert_eq!(record.raw_value(TEMPERATURE), Some(20.0));
        // Untouched measurements pass through unchanged
        assert_eq!(record.get("pressure"), Some(Value::Float(1013.25)));
        assert_eq!(record.get("measurement_sequence_number"), Some(Value::Integer(42)));
        // Offsets for absent measurements leave no raw field behind
        assert_eq!(record.raw_values().len(), 1);
        // Input is left alone
        assert_eq!(input.get(TEMPERATURE), Some(Value::Float(20.0)));
    }

    #[test]
    fn calibrated_values_are_rounded() {
        let profile = TagProfile::new().with_offset(HUMIDITY, "1.00013,0".parse().unwrap());
        let record = enrich(&raw(), &profile, &EnrichOptions::default()).record;

        assert_eq!(record.get(HUMIDITY), Some(Value::Float(50.01)));
        assert_eq!(record.raw_value(HUMIDITY), Some(50.0));
    }

    #[test]
    fn dew_point_uses_calibrated_values() {
        let options = EnrichOptions { dew_point: true };

        let plain = enrich(&raw(), &TagProfile::new(), &options).record;
        assert_eq!(plain.dew_point(), Some(9.27));

        let warmer = TagProfile::new().with_offset(TEMPERATURE, "1,5".parse().unwrap());
        let calibrated = enrich(&raw(), &warmer, &options).record;
        assert!(calibrated.dew_point().unwrap() > 9.27);
    }

    #[test]
    fn failed_dew_point_keeps_record() {
        let options = EnrichOptions { dew_point: true };
        let dry = RawMeasurement::new(device(), 1)
            .with_value(TEMPERATURE, 20.0)
            .with_value(HUMIDITY, 0.0);

        let enriched = enrich(&dry, &TagProfile::new(), &options);

        assert_eq!(enriched.record.dew_point(), None);
        assert!(matches!(
            enriched.dew_point_error,
            Some(DomainError::HumidityOutOfRange { .. })
        ));
        assert_eq!(enriched.record.get(TEMPERATURE), Some(Value::Float(20.0)));
    }

    #[test]
    fn dew_point_follows_calibration() {
        let profile = TagProfile::new()
            .with_name("kitchen")
            .unwrap()
            .with_offset(TEMPERATURE, "1,1.5".parse().unwrap());
        let record = enrich(&raw(), &profile, &EnrichOptions { dew_point: true }).record;

        assert_eq!(record.get(TEMPERATURE), Some(Value::Float(21.5)));
        assert_eq!(record.raw_value(TEMPERATURE), Some(20.0));
        // Computed from 21.5 °C, not the raw 20.0 °C (which gives 9.27)
        assert_eq!(record.dew_point(), Some(10.65));
    }

    #[test]
    fn reserved_fields_in_input_are_dropped() {
        let tainted = raw()
            .with_value("ruuvi_mqtt_raw_temperature", 99.0)
            .with_value("ruuvi_mqtt_timestamp", 5i64)
            .with_value(MAC_FIELD, 1i64);
        let profile = TagProfile::new().with_offset(TEMPERATURE, "1,1.5".parse().unwrap());

        let record = enrich(&tainted, &profile, &EnrichOptions::default()).record;

        assert!(record.values().keys().all(|name| !is_reserved_field(name)));
        assert_eq!(record.raw_value(TEMPERATURE), Some(20.0));
        assert_eq!(record.timestamp(), 1_700_000_000_000);

        let payload = String::from_utf8(record.to_json().unwrap()).unwrap();
        for field in ["\"ruuvi_mqtt_raw_temperature\"", "\"ruuvi_mqtt_timestamp\"", "\"mac\""] {
            assert_eq!(payload.matches(field).count(), 1, "{} in {}", field, payload);
        }
    }

    #[test]
    fn missing_humidity_skips_dew_point() {
        let options = EnrichOptions { dew_point: true };
        let partial = RawMeasurement::new(device(), 1).with_value(TEMPERATURE, 20.0);

        let enriched = enrich(&partial, &TagProfile::new(), &options);

        assert_eq!(enriched.record.dew_point(), None);
        assert_eq!(
            enriched.dew_point_error,
            Some(DomainError::MissingMeasurement(HUMIDITY))
        );
    }
}
