//! Shared fixtures for the core integration tests
//!
//! Provides:
//! - A deterministic tag simulator producing RuuviTag-like readings
//! - A registry with a couple of configured tags
//! - Helpers to assemble the ingestion side of the pipeline

#![allow(dead_code)]

use std::sync::Arc;

use ruuvi_mqtt_core::{
    DeviceId, EnrichedRecord, IngestOptions, Ingestor, PipelineStats, ProfileRegistry,
    RawMeasurement, RecordBuffer, TagProfile, Timestamp,
};

pub const KITCHEN: &str = "aa:bb:cc:dd:ee:01";
pub const CELLAR: &str = "aa:bb:cc:dd:ee:02";
pub const STRANGER: &str = "de:ad:be:ef:00:01";

pub fn device(mac: &str) -> DeviceId {
    mac.parse().expect("fixture MAC")
}

/// Two named tags, the cellar one with a temperature offset of +0.5 °C
pub fn registry() -> ProfileRegistry {
    let mut registry = ProfileRegistry::new();
    registry.insert(device(KITCHEN), TagProfile::new().with_name("kitchen").unwrap());
    registry.insert(
        device(CELLAR),
        TagProfile::new()
            .with_name("cellar")
            .unwrap()
            .with_offset("temperature", "1,0.5".parse().unwrap()),
    );
    registry
}

/// Ingestion side of the pipeline wired to a fresh buffer
pub struct Fixture {
    pub ingestor: Ingestor,
    pub buffer: Arc<RecordBuffer<EnrichedRecord>>,
    pub stats: Arc<PipelineStats>,
}

impl Fixture {
    pub fn new(options: IngestOptions, capacity: usize) -> Self {
        let stats = Arc::new(PipelineStats::new());
        let buffer = Arc::new(RecordBuffer::new(capacity, Arc::clone(&stats)).unwrap());
        let ingestor = Ingestor::new(
            Arc::new(registry()),
            options,
            Arc::clone(&buffer),
            Arc::clone(&stats),
        );
        Self { ingestor, buffer, stats }
    }

    /// Everything currently queued, oldest first
    pub fn drain(&self) -> Vec<EnrichedRecord> {
        std::iter::from_fn(|| self.buffer.try_take()).collect()
    }
}

/// Simulated tag broadcasting a reading once per second
pub struct TagSimulator {
    device: DeviceId,
    sequence: i64,
    clock: Timestamp,
    seed: u32,
}

impl TagSimulator {
    pub fn new(mac: &str, start: Timestamp) -> Self {
        Self {
            device: device(mac),
            sequence: 0,
            clock: start,
            seed: 42,
        }
    }

    fn random_float(&mut self) -> f64 {
        self.seed = self.seed.wrapping_mul(1664525).wrapping_add(1013904223);
        self.seed as f64 / u32::MAX as f64
    }

    /// Next reading, with temperature around 20 °C and humidity around 50 %
    pub fn next_reading(&mut self) -> RawMeasurement {
        self.sequence += 1;
        self.clock += 1000;
        let temperature = 20.0 + self.random_float() - 0.5;
        let humidity = 50.0 + 4.0 * (self.random_float() - 0.5);

        RawMeasurement::new(self.device, self.clock)
            .with_value("temperature", (temperature * 100.0).round() / 100.0)
            .with_value("humidity", (humidity * 100.0).round() / 100.0)
            .with_value("pressure", 1013.25)
            .with_value("battery", 2950i64)
            .with_value("measurement_sequence_number", self.sequence)
    }
}
