//! Error Types for Configuration and Per-Record Processing
//!
//! ## Error Categories
//!
//! The pipeline distinguishes two kinds of failure that can originate in this
//! crate. Broker-side failures live with the connectors.
//!
//! ### Configuration Errors
//! - Raised while building tag profiles, polynomials, the topic template and
//!   the record buffer at startup
//! - Always fatal: the gateway refuses to start with a broken configuration
//!
//! ### Domain Errors
//! - Raised per record when a derived value cannot be computed (e.g. a dew
//!   point for a humidity reading of 0 %)
//! - Always recoverable: the derived field is skipped, the record is still
//!   published
//!
//! ## Error Handling Strategy
//!
//! ```rust
//! use ruuvi_mqtt_core::calibration::dew_point;
//! use ruuvi_mqtt_core::DomainError;
//!
//! match dew_point(20.0, 0.0) {
//!     Ok(_) => unreachable!(),
//!     Err(DomainError::HumidityOutOfRange { .. }) => {
//!         // Skip the derived field, keep the record
//!     }
//!     Err(_) => {}
//! }
//! ```

use thiserror::Error;

/// Result type for configuration-time operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for per-record derived value computations
pub type DomainResult<T> = Result<T, DomainError>;

/// Configuration errors - fatal at startup
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Polynomial defined without any coefficient
    #[error("Polynomial needs at least one coefficient")]
    EmptyCoefficients,

    /// Coefficient that does not parse as a finite number
    #[error("Invalid coefficient {value:?}: not a finite number")]
    InvalidCoefficient {
        /// The offending text
        value: String,
    },

    /// Offset function rejected for a specific measurement
    #[error("Invalid offset function for {measurement}: {reason}")]
    InvalidOffset {
        /// Measurement the polynomial applies to
        measurement: String,
        /// Why the coefficients were rejected
        reason: String,
    },

    /// Hardware address that is neither `aa:bb:cc:dd:ee:ff` nor `aabbccddeeff`
    #[error("{value:?} is not a valid MAC address")]
    InvalidDeviceId {
        /// The offending text
        value: String,
    },

    /// Tag name that is empty or contains whitespace
    #[error("Name {name:?} is empty or contains whitespace, '/', '+' or '#'")]
    InvalidName {
        /// The offending name
        name: String,
    },

    /// Topic template with unknown placeholders or unbalanced braces
    #[error("Invalid topic template {template:?}: {reason}")]
    InvalidTopic {
        /// The template as configured
        template: String,
        /// What is wrong with it
        reason: String,
    },

    /// Malformed `mac/name` or `mac/measurement/coefficients` definition
    #[error("Invalid definition {entry:?}: {reason}")]
    InvalidDefinition {
        /// The definition as given on the command line or in the file
        entry: String,
        /// What is wrong with it
        reason: String,
    },

    /// Record buffer must hold at least one record
    #[error("Buffer size must be at least 1, got {0}")]
    InvalidBufferSize(usize),
}

/// Domain errors - recoverable, per record
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum DomainError {
    /// Relative humidity outside the range where the logarithm is meaningful
    #[error("Relative humidity {humidity}% outside (0, 100]")]
    HumidityOutOfRange {
        /// The humidity that was passed in
        humidity: f64,
    },

    /// A measurement needed for a derived value is absent
    #[error("Missing measurement: {0}")]
    MissingMeasurement(&'static str),

    /// Value makes no physical sense (NaN, infinity)
    #[error("Invalid value: not a valid number")]
    InvalidValue,
}
