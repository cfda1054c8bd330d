//! Calibration Engine: Polynomial Offsets and Dew Point
//!
//! ## Overview
//!
//! Cheap environmental tags drift apart: two tags in the same room can
//! disagree by a degree or several percent of humidity. The gateway corrects
//! this per tag and per measurement with an offset polynomial, and can derive
//! the dew point from the corrected temperature and humidity.
//!
//! ## Offset Polynomials
//!
//! An offset function is a polynomial of arbitrary degree:
//!
//! ```text
//! f(x) = aₙ × xⁿ + ... + a₂ × x² + a₁ × x + a₀
//! ```
//!
//! Coefficients are given highest degree first, so `1,1.5` is
//! `f(x) = x + 1.5` (a constant offset) and `0.98,1.01,0` is
//! `f(x) = 0.98x² + 1.01x`. Every coefficient must be given, including zeros;
//! the number of coefficients determines the degree.
//!
//! Evaluation uses Horner's method, which needs one multiplication and one
//! addition per coefficient:
//!
//! ```text
//! f(x) = ((aₙ × x + aₙ₋₁) × x + ...) × x + a₀
//! ```
//!
//! ## Dew Point
//!
//! The dew point is the temperature at which air at the current humidity
//! becomes saturated. It uses the Magnus formula:
//!
//! ```text
//! N   = ln(RH/100) + (b × T)/(c + T)
//! Td  = (c × N)/(b - N)
//!
//! Where:
//! - T  = temperature (°C)
//! - RH = relative humidity (%)
//! - b, c = Magnus coefficients (Buck, 1981)
//!     T ≥ 0 °C: b = 17.368, c = 238.88
//!     T < 0 °C: b = 17.966, c = 247.15
//! ```
//!
//! The logarithm is undefined for RH ≤ 0 and RH above 100 % is outside the
//! physical range the approximation covers, so both are rejected with a
//! [`DomainError`].
//!
//! ## Usage Example
//!
//! ```rust
//! use ruuvi_mqtt_core::calibration::{dew_point, Polynomial};
//!
//! let offset: Polynomial = "1,1.5".parse()?;
//! assert_eq!(offset.evaluate(20.0), 21.5);
//!
//! let td = dew_point(20.0, 50.0).unwrap();
//! assert!((td - 9.3).abs() < 0.1);
//! # Ok::<(), ruuvi_mqtt_core::ConfigError>(())
//! ```

use core::fmt;
use core::str::FromStr;

use crate::errors::{ConfigError, ConfigResult, DomainError, DomainResult};

/// Magnus coefficient b for temperatures at or above freezing
pub const MAGNUS_B_ABOVE_FREEZING: f64 = 17.368;
/// Magnus coefficient c (°C) for temperatures at or above freezing
pub const MAGNUS_C_ABOVE_FREEZING: f64 = 238.88;
/// Magnus coefficient b for temperatures below freezing
pub const MAGNUS_B_BELOW_FREEZING: f64 = 17.966;
/// Magnus coefficient c (°C) for temperatures below freezing
pub const MAGNUS_C_BELOW_FREEZING: f64 = 247.15;

/// Offset polynomial with coefficients stored highest degree first
///
/// Construction validates the coefficients, so a `Polynomial` can always be
/// evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    coefficients: Vec<f64>,
}

impl Polynomial {
    /// Create from coefficients, highest degree first
    ///
    /// Fails if the list is empty or contains a NaN or infinite entry.
    pub fn new(coefficients: Vec<f64>) -> ConfigResult<Self> {
        if coefficients.is_empty() {
            return Err(ConfigError::EmptyCoefficients);
        }
        if let Some(bad) = coefficients.iter().find(|c| !c.is_finite()) {
            return Err(ConfigError::InvalidCoefficient {
                value: bad.to_string(),
            });
        }
        Ok(Self { coefficients })
    }

    /// The identity function `f(x) = x`
    pub fn identity() -> Self {
        Self {
            coefficients: vec![1.0, 0.0],
        }
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Degree of the polynomial (0 for a constant)
    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }

    /// Evaluate at `x` using Horner's method
    pub fn evaluate(&self, x: f64) -> f64 {
        self.coefficients.iter().fold(0.0, |acc, c| acc * x + c)
    }
}

impl FromStr for Polynomial {
    type Err = ConfigError;

    /// Parse a comma separated coefficient list such as `0.98,1.01,0`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ConfigError::EmptyCoefficients);
        }

        let coefficients = s
            .split(',')
            .map(|part| {
                let part = part.trim();
                part.parse::<f64>()
                    .ok()
                    .filter(|c| c.is_finite())
                    .ok_or_else(|| ConfigError::InvalidCoefficient {
                        value: part.to_string(),
                    })
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        Self::new(coefficients)
    }
}

impl fmt::Display for Polynomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.coefficients.iter().map(|c| c.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}

/// Apply an offset function given as a coefficient list
///
/// One-shot form of [`Polynomial::new`] + [`Polynomial::evaluate`]; the
/// pipeline parses polynomials once at startup instead.
pub fn apply_offset(measurement: &str, raw_value: f64, coefficients: &[f64]) -> ConfigResult<f64> {
    Polynomial::new(coefficients.to_vec())
        .map(|poly| poly.evaluate(raw_value))
        .map_err(|e| ConfigError::InvalidOffset {
            measurement: measurement.to_string(),
            reason: e.to_string(),
        })
}

/// Approximate dew point in °C for a temperature (°C) and relative humidity (%)
pub fn dew_point(temperature_c: f64, humidity_pct: f64) -> DomainResult<f64> {
    if !temperature_c.is_finite() || !humidity_pct.is_finite() {
        return Err(DomainError::InvalidValue);
    }
    if humidity_pct <= 0.0 || humidity_pct > 100.0 {
        return Err(DomainError::HumidityOutOfRange {
            humidity: humidity_pct,
        });
    }

    let (b, c) = if temperature_c >= 0.0 {
        (MAGNUS_B_ABOVE_FREEZING, MAGNUS_C_ABOVE_FREEZING)
    } else {
        (MAGNUS_B_BELOW_FREEZING, MAGNUS_C_BELOW_FREEZING)
    };

    let n = (humidity_pct / 100.0).ln() + (b * temperature_c) / (c + temperature_c);
    Ok((c * n) / (b - n))
}

/// Dew point from optional inputs, as found in a measurement record
pub fn dew_point_of(temperature_c: Option<f64>, humidity_pct: Option<f64>) -> DomainResult<f64> {
    let temperature = temperature_c.ok_or(DomainError::MissingMeasurement(crate::measurement::TEMPERATURE))?;
    let humidity = humidity_pct.ok_or(DomainError::MissingMeasurement(crate::measurement::HUMIDITY))?;
    dew_point(temperature, humidity)
}
