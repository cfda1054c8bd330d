//! Per-tag configuration
//!
//! A [`TagProfile`] holds what the operator configured for one tag: an
//! optional name and the offset polynomials for its measurements. Profiles
//! are collected into a [`ProfileRegistry`] at startup and shared read-only
//! with the ingestion loop afterwards.

use std::collections::{BTreeMap, HashMap};

use crate::calibration::Polynomial;
use crate::device::DeviceId;
use crate::errors::{ConfigError, ConfigResult};

/// Check that `name` can stand as a single MQTT topic level
///
/// It must be non-empty and contain no whitespace, `/`, `+` or `#`.
pub fn validate_name(name: &str) -> ConfigResult<()> {
    if name.is_empty() || name.chars().any(|c| c.is_whitespace() || matches!(c, '/' | '+' | '#')) {
        return Err(ConfigError::InvalidName { name: name.to_string() });
    }
    Ok(())
}

/// Configuration for a single tag
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagProfile {
    name: Option<String>,
    offsets: BTreeMap<String, Polynomial>,
}

impl TagProfile {
    /// Empty profile: no name, no offset functions
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`TagProfile::set_name`]
    pub fn with_name(mut self, name: impl Into<String>) -> ConfigResult<Self> {
        self.set_name(name)?;
        Ok(self)
    }

    /// Builder form of [`TagProfile::set_offset`]
    pub fn with_offset(mut self, measurement: &str, polynomial: Polynomial) -> Self {
        self.set_offset(measurement, polynomial);
        self
    }

    /// Assign a name, returning the previous one
    pub fn set_name(&mut self, name: impl Into<String>) -> ConfigResult<Option<String>> {
        let name = name.into();
        validate_name(&name)?;
        Ok(self.name.replace(name))
    }

    /// Assign an offset function to a measurement, returning the previous one
    ///
    /// Measurement names are matched case-insensitively.
    pub fn set_offset(&mut self, measurement: &str, polynomial: Polynomial) -> Option<Polynomial> {
        self.offsets.insert(measurement.to_lowercase(), polynomial)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn offset(&self, measurement: &str) -> Option<&Polynomial> {
        self.offsets.get(measurement)
    }

    pub fn offsets(&self) -> impl Iterator<Item = (&str, &Polynomial)> {
        self.offsets.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.offsets.is_empty()
    }
}

/// All configured tags, keyed by device identifier
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<DeviceId, TagProfile>,
    default: TagProfile,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profile for `device`, or the empty default profile
    pub fn get(&self, device: &DeviceId) -> &TagProfile {
        self.profiles.get(device).unwrap_or(&self.default)
    }

    /// Mutable profile for `device`, created empty if needed
    pub fn entry(&mut self, device: DeviceId) -> &mut TagProfile {
        self.profiles.entry(device).or_default()
    }

    pub fn insert(&mut self, device: DeviceId, profile: TagProfile) -> Option<TagProfile> {
        self.profiles.insert(device, profile)
    }

    /// Whether a name is configured for `device`
    pub fn is_named(&self, device: &DeviceId) -> bool {
        self.get(device).name().is_some()
    }

    /// Devices with a configured name
    pub fn named_devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.profiles
            .iter()
            .filter(|(_, profile)| profile.name().is_some())
            .map(|(device, _)| device)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &TagProfile)> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
