//! Newline-delimited JSON measurement input
//!
//! Each line is one decoded advertisement:
//!
//! ```text
//! {"mac":"aa:bb:cc:dd:ee:ff","temperature":20.5,"humidity":48.25,"measurement_sequence_number":512}
//! ```
//!
//! `mac` is required. An integer `timestamp` (ms since epoch) overrides the
//! receipt time, otherwise the line is stamped when it is read. Every other
//! numeric field becomes a measurement; strings, booleans and nulls are
//! ignored, as are fields the gateway writes itself (`ruuvi_mqtt_*`), so a
//! published payload fed back in does not duplicate them. Lines that do not
//! parse are logged and skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{error, warn};
use serde_json::{Map, Value as Json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use ruuvi_mqtt_core::measurement::{is_reserved_field, MAC_FIELD};
use ruuvi_mqtt_core::{DeviceId, MeasurementSource, RawMeasurement, TimeSource, Timestamp, Value};

/// Optional field overriding the receipt time
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Measurement source reading JSON lines
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    clock: Arc<dyn TimeSource>,
    line_number: u64,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            lines: reader.lines(),
            clock,
            line_number: 0,
        }
    }
}

/// Parse one input line
pub fn parse_line(line: &str, received_at: Timestamp) -> Result<RawMeasurement> {
    let object: Map<String, Json> = serde_json::from_str(line).context("not a JSON object")?;

    let mac = object
        .get(MAC_FIELD)
        .and_then(Json::as_str)
        .ok_or_else(|| anyhow!("missing \"{}\" field", MAC_FIELD))?;
    let device: DeviceId = mac.parse()?;

    let timestamp = match object.get(TIMESTAMP_KEY) {
        Some(value) => value
            .as_u64()
            .ok_or_else(|| anyhow!("\"{}\" must be a non-negative integer", TIMESTAMP_KEY))?,
        None => received_at,
    };

    let values: BTreeMap<String, Value> = object
        .iter()
        .filter_map(|(key, value)| {
            let key = key.to_lowercase();
            if key == TIMESTAMP_KEY || is_reserved_field(&key) {
                return None;
            }
            let value = match value.as_i64() {
                Some(integer) => Value::Integer(integer),
                None => Value::Float(value.as_f64()?),
            };
            Some((key, value))
        })
        .collect();

    Ok(RawMeasurement::from_values(device, timestamp, values))
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> MeasurementSource for JsonLinesSource<R> {
    async fn next_measurement(&mut self) -> Option<RawMeasurement> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    error!("Failed to read measurement input: {}", e);
                    return None;
                }
            };
            self.line_number += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match parse_line(line, self.clock.now()) {
                Ok(measurement) => return Some(measurement),
                Err(e) => warn!("Skipping input line {}: {:#}", self.line_number, e),
            }
        }
    }
}
