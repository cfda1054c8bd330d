//! Core pipeline for ruuvi-mqtt
//!
//! Takes decoded RuuviTag measurements, applies per-tag names and offset
//! functions, optionally derives the dew point and queues the result for
//! publishing.
//!
//! Key constraints:
//! - Ingestion never waits on the broker
//! - Memory is bounded by the record buffer capacity
//! - A record is never failed by a derived value
//!
//! ```no_run
//! use std::sync::Arc;
//! use ruuvi_mqtt_core::{enrich, EnrichOptions, RawMeasurement, TagProfile};
//!
//! let profile = TagProfile::new()
//!     .with_name("kitchen")?
//!     .with_offset("temperature", "0.5,1".parse()?);
//!
//! let raw = RawMeasurement::new("aa:bb:cc:dd:ee:ff".parse()?, 0)
//!     .with_value("temperature", 20.0)
//!     .with_value("humidity", 50.0);
//!
//! let enriched = enrich(&raw, &profile, &EnrichOptions { dew_point: true });
//! let payload = enriched.record.to_json()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]

pub mod buffer;
pub mod calibration;
pub mod device;
pub mod enrich;
pub mod errors;
pub mod ingest;
pub mod measurement;
pub mod profile;
pub mod stats;
pub mod time;
pub mod topic;

// Public API
pub use buffer::{RecordBuffer, DEFAULT_BUFFER_SIZE};
pub use calibration::{dew_point, Polynomial};
pub use device::DeviceId;
pub use enrich::{enrich, EnrichOptions, Enriched};
pub use errors::{ConfigError, ConfigResult, DomainError, DomainResult};
pub use ingest::{ChannelSource, Disposition, IngestOptions, Ingestor, MeasurementSource};
pub use measurement::{EnrichedRecord, RawMeasurement, Value};
pub use profile::{ProfileRegistry, TagProfile};
pub use stats::{PipelineStats, StatsSnapshot};
pub use time::{SystemTime, TimeSource, Timestamp};
pub use topic::TopicTemplate;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
