//! Ingestion Loop
//!
//! Consumes raw measurements from the scanner side and feeds the record
//! buffer. For every measurement, in order:
//!
//! 1. **Filter**: with `filter_named` set, tags without a configured name are
//!    discarded before any further work
//! 2. **Duplicates**: tags repeat each measurement in several advertisements;
//!    a record carrying the same `measurement_sequence_number` as the last
//!    one from that tag is discarded
//! 3. **Plausibility**: some tag firmware occasionally reports humidity about
//!    100 % too high; readings above `max_humidity` are discarded
//! 4. **Enrichment** with the tag profile
//! 5. **Offer** to the buffer; overflow is the buffer's business, this loop
//!    never waits on it
//!
//! The loop only suspends while waiting for the next measurement. It ends at
//! the end of input or when the shutdown signal flips to `true`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info};
use tokio::sync::{mpsc, watch};

use crate::buffer::RecordBuffer;
use crate::device::DeviceId;
use crate::enrich::{enrich, EnrichOptions};
use crate::errors::DomainError;
use crate::measurement::{EnrichedRecord, RawMeasurement, HUMIDITY, SEQUENCE_NUMBER};
use crate::profile::ProfileRegistry;
use crate::stats::PipelineStats;

/// Humidity above which a reading is considered a firmware glitch (%)
///
/// Leaves a small window above 100 % for readings that may be real.
pub const MAX_PLAUSIBLE_HUMIDITY: f64 = 105.0;

/// Source of raw measurements
///
/// Stands in for the BLE scanner: a conceptually infinite sequence that ends
/// only when the scanner goes away.
#[async_trait]
pub trait MeasurementSource: Send {
    /// Next measurement, or `None` at end of input
    async fn next_measurement(&mut self) -> Option<RawMeasurement>;
}

/// Measurement source fed through a tokio channel
pub struct ChannelSource {
    rx: mpsc::Receiver<RawMeasurement>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<RawMeasurement>) -> Self {
        Self { rx }
    }

    /// Create a source together with the sender that feeds it
    pub fn channel(capacity: usize) -> (mpsc::Sender<RawMeasurement>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl MeasurementSource for ChannelSource {
    async fn next_measurement(&mut self) -> Option<RawMeasurement> {
        self.rx.recv().await
    }
}

/// Ingestion settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IngestOptions {
    /// Only pass tags that have a configured name
    pub filter_named: bool,
    pub enrich: EnrichOptions,
    pub max_humidity: f64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            filter_named: false,
            enrich: EnrichOptions::default(),
            max_humidity: MAX_PLAUSIBLE_HUMIDITY,
        }
    }
}

/// What happened to one measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Accepted into the buffer
    Queued,
    /// Discarded by the name filter
    Filtered,
    /// Repeated sequence number
    Duplicate,
    /// Implausible reading
    Rejected,
    /// Buffer full, record dropped
    Overflow,
}

/// Runs measurements through filter, enrichment and into the buffer
pub struct Ingestor {
    registry: Arc<ProfileRegistry>,
    options: IngestOptions,
    buffer: Arc<RecordBuffer<EnrichedRecord>>,
    stats: Arc<PipelineStats>,
    last_sequence: HashMap<DeviceId, i64>,
}

impl Ingestor {
    pub fn new(
        registry: Arc<ProfileRegistry>,
        options: IngestOptions,
        buffer: Arc<RecordBuffer<EnrichedRecord>>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            registry,
            options,
            buffer,
            stats,
            last_sequence: HashMap::new(),
        }
    }

    /// Process a single measurement
    pub fn handle(&mut self, raw: RawMeasurement) -> Disposition {
        self.stats.record_received();
        let device = raw.device();
        let profile = self.registry.get(&device);

        if self.options.filter_named && profile.name().is_none() {
            self.stats.record_filtered();
            return Disposition::Filtered;
        }

        if let Some(sequence) = raw.get(SEQUENCE_NUMBER).and_then(|v| v.as_i64()) {
            if self.last_sequence.insert(device, sequence) == Some(sequence) {
                debug!("Received duplicate measurement {} from {}, ignoring", sequence, device);
                self.stats.record_duplicate();
                return Disposition::Duplicate;
            }
        }

        if let Some(humidity) = raw.get(HUMIDITY).map(|v| v.as_f64()) {
            if humidity > self.options.max_humidity {
                error!("Received invalid humidity value {:.2}% from {}, ignoring", humidity, device);
                self.stats.record_rejected();
                return Disposition::Rejected;
            }
        }

        let enriched = enrich(&raw, profile, &self.options.enrich);
        // Tags that never report humidity are not worth a warning
        if matches!(enriched.dew_point_error, Some(e) if !matches!(e, DomainError::MissingMeasurement(_))) {
            self.stats.record_enrichment_warning();
        }
        debug!("Processed measurement from {}: {:?}", device, enriched.record.values());

        if self.buffer.offer(enriched.record) {
            Disposition::Queued
        } else {
            debug!("Record buffer full, dropping measurement from {}", device);
            Disposition::Overflow
        }
    }

    /// Consume `source` until it ends or `shutdown` turns true
    pub async fn run<S>(&mut self, source: &mut S, mut shutdown: watch::Receiver<bool>)
    where
        S: MeasurementSource + ?Sized,
    {
        info!("Ingestion loop starting");

        loop {
            tokio::select! {
                biased;

                // An error means the shutdown sender is gone, treat it the same
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("Ingestion loop stopping on shutdown");
                    break;
                }
                next = source.next_measurement() => match next {
                    Some(raw) => {
                        self.handle(raw);
                    }
                    None => {
                        info!("Measurement input ended");
                        break;
                    }
                },
            }
        }
    }
}
