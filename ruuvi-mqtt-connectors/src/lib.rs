//! Broker Connectors and the Publisher Loop
//!
//! ## Overview
//!
//! This crate owns everything between the record buffer and the broker:
//!
//! ```text
//! RecordBuffer ──take()──→ Publisher ──publish()──→ AsyncConnector ──→ broker
//!                            │  ↑
//!                            └──┘ retry with backoff
//! ```
//!
//! The [`Publisher`] only sees the [`AsyncConnector`] capability. The shipped
//! implementation is [`MqttConnector`], built on `rumqttc`; tests substitute
//! scripted connectors.
//!
//! ## Failure Classes
//!
//! Every connector failure is a [`ConnectorError`], classified by
//! [`ConnectorError::is_fatal`]:
//!
//! - **Transient**: not connected, acknowledgement timeout, client or network
//!   errors. The publisher retries the same record with exponential backoff
//!   and drops it once the retry ceiling is reached.
//! - **Fatal**: the broker refused us for good (bad credentials, not
//!   authorized, client id rejected) or the connector is misconfigured. The
//!   publisher stops and the gateway shuts down.
//!
//! ## MQTT Specifics
//!
//! - QoS 1: a publish succeeds once the broker's PUBACK arrives within the
//!   acknowledgement timeout
//! - Automatic reconnect after network failures, with a fixed delay
//! - Username/password authentication when configured
//!
//! ## Example Usage
//!
//! ```no_run
//! use ruuvi_mqtt_connectors::{AsyncConnector, MqttConfig, MqttConnector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MqttConfig::new("broker.local", 1883)
//!     .client_id("ruuvi-mqtt-gateway")
//!     .credentials("ruuvi", "secret");
//!
//! let mut mqtt = MqttConnector::connect(config)?;
//! mqtt.wait_connected().await?;
//! mqtt.publish("ruuvi-mqtt/tele/aabbccddeeff/kitchen/SENSOR", br#"{"temperature":21.5}"#)
//!     .await?;
//! mqtt.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod mqtt;
pub mod publisher;

// Re-export common types
pub use mqtt::{MqttConfig, MqttConnector, QoS};
pub use publisher::{Delivery, Publisher, RetryPolicy};

use std::fmt;

use thiserror::Error;

/// Common connector errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    #[error("Not connected")]
    NotConnected,

    #[error("Timeout")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Broker refused the connection for a reason retrying cannot fix
    #[error("Rejected by broker: {0}")]
    Rejected(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConnectorError {
    /// Whether retrying can never succeed
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectorError::Rejected(_) | ConnectorError::Config(_))
    }
}

/// Publish capability used by the publisher loop
#[async_trait::async_trait]
pub trait AsyncConnector: Send {
    /// Publish `payload` to `topic` and wait for the broker's acknowledgement
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ConnectorError>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Wait until the connector has a live connection
    ///
    /// Returns an error only for fatal conditions. Connectors without a
    /// connection notion are always ready.
    async fn wait_connected(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }

    /// Get connection statistics
    fn stats(&self) -> ConnectionStats;

    /// Close the connection, flushing what is in flight
    async fn disconnect(&mut self) -> Result<(), ConnectorError>;
}

/// Connection statistics common to all connectors
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Total messages acknowledged by the broker
    pub messages_sent: u64,
    /// Total publish attempts that failed
    pub messages_failed: u64,
    /// Total payload bytes acknowledged
    pub bytes_sent: u64,
    /// Number of reconnections after the first connection
    pub reconnections: u32,
    /// Last error message
    pub last_error: Option<String>,
}

impl fmt::Display for ConnectionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent={} failed={} bytes={} reconnections={}",
            self.messages_sent, self.messages_failed, self.bytes_sent, self.reconnections
        )?;
        if let Some(error) = &self.last_error {
            write!(f, " last_error=\"{}\"", error)?;
        }
        Ok(())
    }
}
