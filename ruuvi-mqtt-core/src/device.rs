//! Tag hardware addresses
//!
//! Tags are identified by their 48-bit BLE address. Configuration files and
//! the command line write it as `aa:bb:cc:dd:ee:ff`, decoders often emit the
//! colon-free `aabbccddeeff`. Both parse to the same [`DeviceId`], which always
//! displays in the canonical lower-case, colon-free form used for lookups, the
//! `mac` payload field and the `{mac}` topic placeholder.

use core::fmt;
use core::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::ConfigError;

/// Canonical device identifier of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId([u8; 6]);

impl DeviceId {
    /// Create from raw address bytes
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Raw address bytes
    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }

    /// Address in `aa:bb:cc:dd:ee:ff` form, for log output
    pub fn colon_form(&self) -> String {
        self.0
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":")
    }
}

impl FromStr for DeviceId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidDeviceId { value: s.to_string() };

        let hex: String = match s.len() {
            // aa:bb:cc:dd:ee:ff
            17 => {
                let parts: Vec<&str> = s.split(':').collect();
                if parts.len() != 6 || parts.iter().any(|p| p.len() != 2) {
                    return Err(invalid());
                }
                parts.concat()
            }
            12 => s.to_string(),
            _ => return Err(invalid()),
        };

        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_forms_parse_to_same_id() {
        let colon: DeviceId = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let plain: DeviceId = "aabbccddeeff".parse().unwrap();

        assert_eq!(colon, plain);
        assert_eq!(colon.to_string(), "aabbccddeeff");
        assert_eq!(colon.colon_form(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn rejects_malformed_addresses() {
        for bad in ["", "aa:bb:cc:dd:ee", "aabbccddeeffaa", "aa-bb-cc-dd-ee-ff", "gg:bb:cc:dd:ee:ff", "a:abb:cc:dd:ee:ff"] {
            assert!(bad.parse::<DeviceId>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn serde_uses_canonical_form() {
        let id: DeviceId = serde_json::from_str("\"AA:BB:CC:DD:EE:01\"").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"aabbccddee01\"");
    }
}
