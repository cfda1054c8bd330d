//! Gateway configuration
//!
//! Settings come from three layers, lowest precedence first: built-in
//! defaults, the TOML config file and the command line. Scalar values from
//! the command line replace file values. Tag names and offset functions from
//! the command line are added on top of the file's, replacing (with a
//! warning) what the file defined for the same tag. The MAC filter and the
//! dew point are enabled if either layer enables them.
//!
//! ```toml
//! [general]
//! mqtt-host = "broker.local"
//! dewpoint = true
//!
//! ["aa:bb:cc:dd:ee:ff"]
//! name = "kitchen"
//! offset-temperature = "1,1.5"
//! offset-humidity = [0.98, 1.01, 0]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, warn};
use serde::Deserialize;

use ruuvi_mqtt_connectors::mqtt::{DEFAULT_CLIENT_ID, DEFAULT_PORT};
use ruuvi_mqtt_connectors::{MqttConfig, RetryPolicy};
use ruuvi_mqtt_core::profile::validate_name;
use ruuvi_mqtt_core::{
    ConfigError, ConfigResult, DeviceId, EnrichOptions, IngestOptions, Polynomial, ProfileRegistry,
    TopicTemplate, DEFAULT_BUFFER_SIZE,
};

use crate::cli::Args;

/// Prefix of offset function keys in device sections
const OFFSET_PREFIX: &str = "offset-";

/// Contents of a config file
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub general: GeneralSection,
    /// Every other table is a device section keyed by MAC
    #[serde(flatten)]
    pub devices: BTreeMap<String, DeviceSection>,
}

/// The `[general]` table
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GeneralSection {
    pub mqtt_host: Option<String>,
    pub mqtt_port: Option<u16>,
    pub mqtt_client_id: Option<String>,
    pub mqtt_topic: Option<String>,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub buffer_size: Option<usize>,
    pub dewpoint: Option<bool>,
    pub filter_mac_name: Option<bool>,
    pub publish_retries: Option<u32>,
    pub retry_initial_ms: Option<u64>,
    pub retry_max_ms: Option<u64>,
}

/// A device table, `name` plus any number of `offset-<measurement>` keys
#[derive(Debug, Default, Deserialize)]
pub struct DeviceSection {
    pub name: Option<String>,
    #[serde(flatten)]
    pub settings: BTreeMap<String, Coefficients>,
}

/// Offset coefficients, either `"1,1.5"` or `[1, 1.5]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Coefficients {
    Text(String),
    List(Vec<f64>),
}

impl Coefficients {
    pub fn to_polynomial(&self) -> ConfigResult<Polynomial> {
        match self {
            Coefficients::Text(text) => text.parse(),
            Coefficients::List(list) => Polynomial::new(list.clone()),
        }
    }
}

impl FileConfig {
    /// Read and parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Fully merged and validated settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub mqtt: MqttConfig,
    pub topic: TopicTemplate,
    pub buffer_size: usize,
    pub retry: RetryPolicy,
    pub ingest: IngestOptions,
    pub registry: ProfileRegistry,
    pub input: Option<PathBuf>,
}

impl GatewayConfig {
    /// Merge the command line over an optional config file
    pub fn build(args: &Args, file: Option<FileConfig>) -> Result<Self> {
        let FileConfig { general, devices } = file.unwrap_or_default();

        let mut registry = ProfileRegistry::new();
        for (section, device) in &devices {
            apply_device_section(&mut registry, section, device)
                .with_context(|| format!("Invalid device section [{}]", section))?;
        }

        for entry in &args.mac_names {
            let (device, name) = parse_mac_name(entry)?;
            if let Some(previous) = registry.entry(device).set_name(name)? {
                warn!(
                    "Duplicate name definition for {}, replacing {:?}",
                    device.colon_form(),
                    previous
                );
            }
        }

        for entry in &args.offset_polys {
            let (device, measurement, polynomial) = parse_offset_poly(entry)?;
            if registry.entry(device).set_offset(&measurement, polynomial).is_some() {
                warn!(
                    "Duplicate offset definition for {}/{}",
                    device.colon_form(),
                    measurement
                );
            }
        }

        let host = args
            .mqtt_host
            .clone()
            .or(general.mqtt_host)
            .filter(|host| !host.trim().is_empty())
            .ok_or_else(|| anyhow!("No MQTT host given, use --mqtt-host or mqtt-host in [general]"))?;
        let port = args.mqtt_port.or(general.mqtt_port).unwrap_or(DEFAULT_PORT);
        let client_id = args
            .mqtt_client_id
            .clone()
            .or(general.mqtt_client_id)
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());

        let mut mqtt = MqttConfig::new(host, port).client_id(client_id);
        let username = args.mqtt_username.clone().or(general.mqtt_username);
        let password = args.mqtt_password.clone().or(general.mqtt_password);
        match (username, password) {
            (Some(username), password) => mqtt = mqtt.credentials(username, password.unwrap_or_default()),
            (None, Some(_)) => bail!("MQTT password given without a username"),
            (None, None) => {}
        }
        mqtt.validate()?;

        let topic = match args.mqtt_topic.as_deref().or(general.mqtt_topic.as_deref()) {
            Some(template) => TopicTemplate::parse(template)?,
            None => TopicTemplate::default(),
        };

        let buffer_size = args.buffer_size.or(general.buffer_size).unwrap_or(DEFAULT_BUFFER_SIZE);
        if buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize(buffer_size).into());
        }

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy::new(
            args.publish_retries
                .or(general.publish_retries)
                .map_or(defaults.max_attempts, |retries| retries.saturating_add(1)),
            general
                .retry_initial_ms
                .map_or(defaults.initial_backoff, Duration::from_millis),
            general.retry_max_ms.map_or(defaults.max_backoff, Duration::from_millis),
        );
        if retry.initial_backoff > retry.max_backoff {
            bail!("retry-initial-ms must not exceed retry-max-ms");
        }

        let ingest = IngestOptions {
            filter_named: args.filter_mac_name || general.filter_mac_name.unwrap_or(false),
            enrich: EnrichOptions {
                dew_point: args.dewpoint || general.dewpoint.unwrap_or(false),
            },
            ..Default::default()
        };
        if ingest.filter_named && registry.named_devices().next().is_none() {
            warn!("MAC filter enabled without any named tags, nothing will be published");
        }

        let config = Self {
            mqtt,
            topic,
            buffer_size,
            retry,
            ingest,
            registry,
            input: args.input.clone(),
        };
        debug!(
            "Completed config: broker {}:{} as {}, topic {}, buffer {}, {:?}, {:?}, {} tags configured",
            config.mqtt.host,
            config.mqtt.port,
            config.mqtt.client_id,
            config.topic,
            config.buffer_size,
            config.retry,
            config.ingest,
            config.registry.len()
        );
        Ok(config)
    }
}

fn apply_device_section(registry: &mut ProfileRegistry, section: &str, device: &DeviceSection) -> Result<()> {
    let id: DeviceId = section.parse()?;
    let profile = registry.entry(id);

    if let Some(name) = &device.name {
        profile.set_name(name.clone())?;
    }

    for (key, coefficients) in &device.settings {
        let measurement = key
            .strip_prefix(OFFSET_PREFIX)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| anyhow!("Unknown key {:?}", key))?;
        let polynomial = coefficients
            .to_polynomial()
            .map_err(|e| ConfigError::InvalidOffset {
                measurement: measurement.to_string(),
                reason: e.to_string(),
            })?;
        profile.set_offset(measurement, polynomial);
    }

    Ok(())
}

fn invalid_definition(entry: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidDefinition {
        entry: entry.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse a `mac/name` definition
pub fn parse_mac_name(entry: &str) -> ConfigResult<(DeviceId, String)> {
    let (mac, name) = entry
        .split_once('/')
        .ok_or_else(|| invalid_definition(entry, "expected mac/name"))?;
    let device = mac.parse()?;
    validate_name(name)?;
    Ok((device, name.to_string()))
}

/// Parse a `mac/measurement/constants` definition
pub fn parse_offset_poly(entry: &str) -> ConfigResult<(DeviceId, String, Polynomial)> {
    let mut parts = entry.splitn(3, '/');
    let (Some(mac), Some(measurement), Some(constants)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid_definition(entry, "expected mac/measurement/constants"));
    };

    let device = mac.parse()?;
    if measurement.is_empty() || measurement.chars().any(char::is_whitespace) {
        return Err(invalid_definition(entry, "measurement is empty or contains whitespace"));
    }
    let polynomial = constants.parse::<Polynomial>().map_err(|e| ConfigError::InvalidOffset {
        measurement: measurement.to_string(),
        reason: e.to_string(),
    })?;

    Ok((device, measurement.to_lowercase(), polynomial))
}
