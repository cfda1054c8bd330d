//! Command line interface

use std::path::PathBuf;

use clap::Parser;

const OFFSET_HELP: &str = "\
Polynomial offset functions

Offset functions calibrate individual measurements of individual tags. The raw
measurement is passed through a polynomial and the result is published instead,
the raw value is kept as ruuvi_mqtt_raw_<measurement>.

A polynomial has the general form

  f(x) = an * x^n + ... + a2 * x^2 + a1 * x + a0

and is given as mac/measurement/constants, constants comma separated from an
down to a0. All constants must be given, even if they are 0.

Examples:

  aa:bb:cc:dd:ee:ff/temperature/1,1.5
      adds 1.5 to every temperature reading of the tag

  aa:bb:cc:dd:ee:ff/humidity/0.98,1.01,0
      applies f(x) = 0.98 * x^2 + 1.01 * x to the humidity readings";

/// Command-line arguments for ruuvi-mqtt
#[derive(Parser, Debug, Default)]
#[command(name = "ruuvi-mqtt")]
#[command(about = "Forward RuuviTag measurements to an MQTT broker")]
#[command(version)]
#[command(after_long_help = OFFSET_HELP)]
pub struct Args {
    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Configuration file to load (TOML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Read decoded measurements (JSON lines) from this file instead of stdin
    #[arg(long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Assign a name to a tag. The name must not contain whitespace
    #[arg(long = "mac-name", value_name = "MAC/NAME")]
    pub mac_names: Vec<String>,

    /// Only publish tags that have a name assigned
    #[arg(long)]
    pub filter_mac_name: bool,

    /// Define a polynomial offset function for a tag and measurement
    #[arg(long = "offset-poly", value_name = "MAC/MEASUREMENT/CONSTANTS")]
    pub offset_polys: Vec<String>,

    /// Add the approximate dew point (Magnus formula, Buck 1981) as ruuvi_mqtt_dewpoint
    #[arg(long)]
    pub dewpoint: bool,

    /// MQTT topic template, may reference {mac} and {name}
    /// [default: ruuvi-mqtt/tele/{mac}/{name}/SENSOR]
    #[arg(long, value_name = "TEMPLATE")]
    pub mqtt_topic: Option<String>,

    /// MQTT broker to connect to
    #[arg(long, value_name = "HOST")]
    pub mqtt_host: Option<String>,

    /// MQTT port to connect to [default: 1883]
    #[arg(long, value_name = "PORT")]
    pub mqtt_port: Option<u16>,

    /// MQTT client id, unique among the clients of the broker [default: ruuvi-mqtt-gateway]
    #[arg(long, value_name = "ID")]
    pub mqtt_client_id: Option<String>,

    /// MQTT username
    #[arg(long, env = "RUUVI_MQTT_USERNAME", value_name = "USER")]
    pub mqtt_username: Option<String>,

    /// MQTT password
    #[arg(long, env = "RUUVI_MQTT_PASSWORD", hide_env_values = true, value_name = "PASSWORD")]
    pub mqtt_password: Option<String>,

    /// Measurements to buffer while the broker is unavailable. Not persistent
    /// across restarts [default: 100000]
    #[arg(long, value_name = "N")]
    pub buffer_size: Option<usize>,

    /// Retries per measurement after a failed publish before it is dropped [default: 4]
    #[arg(long, value_name = "N")]
    pub publish_retries: Option<u32>,
}
