//! MQTT connector on top of rumqttc
//!
//! The rumqttc event loop is driven by a background task that owns it for the
//! whole connector lifetime. The task keeps reconnecting after network
//! failures and reports to the connector through two channels:
//!
//! - a `watch` carrying the link state (connecting, connected, failed)
//! - an unbounded queue of packet ids for outgoing publishes and PUBACKs
//!
//! `publish()` pushes the message to the client and then waits, bounded by
//! the acknowledgement timeout, for the PUBACK matching its packet id. Only
//! one publish is awaited at a time.
//!
//! A publish abandoned on timeout may still sit in the client's request
//! queue and go out later. Packet ids are only assigned on transmission, so
//! the connector counts the requests it handed over and claims the packet id
//! of the transmission at its own queue position. Retransmissions after a
//! reconnect reuse their packet id and are not counted again.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub use rumqttc::QoS;

use crate::{AsyncConnector, ConnectionStats, ConnectorError};

/// Default broker port
pub const DEFAULT_PORT: u16 = 1883;

/// Default client id
pub const DEFAULT_CLIENT_ID: &str = "ruuvi-mqtt-gateway";

/// MQTT configuration
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    /// How long a publish waits for its PUBACK
    pub ack_timeout: Duration,
    /// Pause between reconnection attempts
    pub reconnect_delay: Duration,
    pub credentials: Option<(String, String)>,
    /// Capacity of the client request channel
    pub request_capacity: usize,
}

impl MqttConfig {
    /// Create new configuration for a broker
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            keep_alive: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(2),
            credentials: None,
            request_capacity: 16,
        }
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Set username/password authentication
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Check the settings rumqttc would otherwise panic or loop on
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.host.trim().is_empty() {
            return Err(ConnectorError::Config("broker host is empty".into()));
        }
        if self.port == 0 {
            return Err(ConnectorError::Config("broker port must not be 0".into()));
        }
        if self.client_id.is_empty() {
            return Err(ConnectorError::Config("client id is empty".into()));
        }
        if self.keep_alive < Duration::from_secs(1) {
            return Err(ConnectorError::Config("keep alive must be at least one second".into()));
        }
        if self.ack_timeout.is_zero() {
            return Err(ConnectorError::Config("ack timeout must not be zero".into()));
        }
        if self.request_capacity == 0 {
            return Err(ConnectorError::Config("request capacity must not be zero".into()));
        }
        Ok(())
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username.clone(), password.clone());
        }
        options
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LinkState {
    Connecting,
    Connected,
    /// Broker refused the session for good
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckEvent {
    Sent(u16),
    Acked(u16),
}

/// Refusals that no amount of reconnecting will fix
fn is_fatal_refusal(code: &ConnectReturnCode) -> bool {
    matches!(
        code,
        ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::RefusedProtocolVersion
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaited {
    Nothing,
    /// Transmissions still ahead of ours in the request queue, ours included
    Queued(usize),
    Packet(u16),
}

/// Pairs PUBACKs with the publish currently awaited
#[derive(Debug)]
struct AckTracker {
    /// Requests handed to the client and not transmitted yet
    queued: usize,
    /// Packet ids transmitted and not acknowledged yet
    unacked: HashSet<u16>,
    awaited: Awaited,
}

impl Default for AckTracker {
    fn default() -> Self {
        Self {
            queued: 0,
            unacked: HashSet::new(),
            awaited: Awaited::Nothing,
        }
    }
}

impl AckTracker {
    /// A publish request was accepted by the client; it becomes the awaited one
    fn handed_over(&mut self) {
        self.queued += 1;
        self.awaited = Awaited::Queued(self.queued);
    }

    fn abandon(&mut self) {
        self.awaited = Awaited::Nothing;
    }

    /// Feed one driver event, true once the awaited publish is acknowledged
    fn observe(&mut self, event: AckEvent) -> bool {
        match event {
            AckEvent::Sent(pkid) => {
                if !self.unacked.insert(pkid) {
                    // Retransmission of a publish already counted
                    return false;
                }
                self.queued = self.queued.saturating_sub(1);
                self.awaited = match self.awaited {
                    Awaited::Queued(1) => Awaited::Packet(pkid),
                    Awaited::Queued(ahead) => Awaited::Queued(ahead - 1),
                    other => other,
                };
                false
            }
            AckEvent::Acked(pkid) => {
                self.unacked.remove(&pkid);
                if self.awaited == Awaited::Packet(pkid) {
                    self.awaited = Awaited::Nothing;
                    true
                } else {
                    false
                }
            }
        }
    }
}

/// Wait until the tracker reports the awaited publish acknowledged
async fn await_ack(
    acks: &mut mpsc::UnboundedReceiver<AckEvent>,
    tracker: &mut AckTracker,
) -> Result<(), ConnectorError> {
    while let Some(event) = acks.recv().await {
        if tracker.observe(event) {
            return Ok(());
        }
    }
    // Event loop task is gone
    Err(ConnectorError::NotConnected)
}

fn lock_stats(stats: &Mutex<ConnectionStats>) -> MutexGuard<'_, ConnectionStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

/// MQTT connector with automatic reconnect
pub struct MqttConnector {
    config: MqttConfig,
    client: AsyncClient,
    link: watch::Receiver<LinkState>,
    acks: mpsc::UnboundedReceiver<AckEvent>,
    tracker: AckTracker,
    stats: Arc<Mutex<ConnectionStats>>,
    shutdown: watch::Sender<bool>,
    driver: Option<JoinHandle<()>>,
}

impl MqttConnector {
    /// Start connecting to the broker in the background
    ///
    /// Returns immediately; use [`AsyncConnector::wait_connected`] to wait
    /// for the session. Must be called from within a tokio runtime.
    pub fn connect(config: MqttConfig) -> Result<Self, ConnectorError> {
        config.validate()?;

        let (client, eventloop) = AsyncClient::new(config.options(), config.request_capacity);
        let (link_tx, link) = watch::channel(LinkState::Connecting);
        let (ack_tx, acks) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(ConnectionStats::default()));

        info!(
            "Connecting to MQTT broker {}:{} as {}",
            config.host, config.port, config.client_id
        );

        let driver = Driver {
            eventloop,
            link: link_tx,
            acks: ack_tx,
            stats: Arc::clone(&stats),
            reconnect_delay: config.reconnect_delay,
            shutdown: shutdown_rx,
        };
        let driver = tokio::spawn(driver.run());

        Ok(Self {
            config,
            client,
            link,
            acks,
            tracker: AckTracker::default(),
            stats,
            shutdown,
            driver: Some(driver),
        })
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    fn link_state(&self) -> LinkState {
        self.link.borrow().clone()
    }

    fn record_failure(&self, error: &ConnectorError) {
        let mut stats = lock_stats(&self.stats);
        stats.messages_failed += 1;
        stats.last_error = Some(error.to_string());
    }
}

#[async_trait::async_trait]
impl AsyncConnector for MqttConnector {
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ConnectorError> {
        let result = match self.link_state() {
            LinkState::Failed(reason) => Err(ConnectorError::Rejected(reason)),
            LinkState::Connecting => Err(ConnectorError::NotConnected),
            LinkState::Connected => {
                // Catch up on events of publishes we already gave up on
                while let Ok(event) = self.acks.try_recv() {
                    self.tracker.observe(event);
                }

                match self
                    .client
                    .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
                {
                    Ok(()) => {
                        self.tracker.handed_over();
                        let acked = tokio::time::timeout(
                            self.config.ack_timeout,
                            await_ack(&mut self.acks, &mut self.tracker),
                        )
                        .await
                        .unwrap_or(Err(ConnectorError::Timeout));
                        if acked.is_err() {
                            self.tracker.abandon();
                        }
                        acked
                    }
                    Err(e) => Err(ConnectorError::Protocol(e.to_string())),
                }
            }
        };

        match &result {
            Ok(()) => {
                let mut stats = lock_stats(&self.stats);
                stats.messages_sent += 1;
                stats.bytes_sent += payload.len() as u64;
            }
            Err(e) => self.record_failure(e),
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.link_state() == LinkState::Connected
    }

    async fn wait_connected(&mut self) -> Result<(), ConnectorError> {
        let failure = {
            let state = self
                .link
                .wait_for(|state| *state != LinkState::Connecting)
                .await
                .map_err(|_| ConnectorError::NotConnected)?;
            match &*state {
                LinkState::Failed(reason) => Some(reason.clone()),
                _ => None,
            }
        };

        match failure {
            Some(reason) => Err(ConnectorError::Rejected(reason)),
            None => Ok(()),
        }
    }

    fn stats(&self) -> ConnectionStats {
        lock_stats(&self.stats).clone()
    }

    async fn disconnect(&mut self) -> Result<(), ConnectorError> {
        let Some(mut driver) = self.driver.take() else {
            return Ok(());
        };

        if self.is_connected() {
            match self.client.try_disconnect() {
                Ok(()) => {
                    // The driver ends once the DISCONNECT went out
                    if tokio::time::timeout(self.config.ack_timeout, &mut driver).await.is_ok() {
                        info!("Disconnected from MQTT broker");
                        return Ok(());
                    }
                    warn!("Timed out waiting for MQTT disconnect");
                }
                Err(e) => warn!("Failed to request MQTT disconnect: {}", e),
            }
        }

        self.shutdown.send_replace(true);
        if let Err(e) = driver.await {
            debug!("MQTT event loop task ended abnormally: {}", e);
        }
        Ok(())
    }
}

impl Drop for MqttConnector {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

/// Owns the rumqttc event loop
struct Driver {
    eventloop: EventLoop,
    link: watch::Sender<LinkState>,
    acks: mpsc::UnboundedSender<AckEvent>,
    stats: Arc<Mutex<ConnectionStats>>,
    reconnect_delay: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Driver {
    async fn run(mut self) {
        let mut connected_once = false;

        loop {
            let event = tokio::select! {
                _ = self.shutdown.wait_for(|stop| *stop) => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    if connected_once {
                        lock_stats(&self.stats).reconnections += 1;
                        info!("Reconnected to MQTT broker");
                    } else {
                        info!("Connected to MQTT broker");
                    }
                    connected_once = true;
                    self.link.send_replace(LinkState::Connected);
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    let _ = self.acks.send(AckEvent::Acked(ack.pkid));
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    let _ = self.acks.send(AckEvent::Sent(pkid));
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("MQTT broker closed the session");
                    self.link.send_replace(LinkState::Connecting);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    self.link.send_replace(LinkState::Connecting);
                    break;
                }
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(code)) if is_fatal_refusal(&code) => {
                    let reason = format!("connection refused: {:?}", code);
                    error!("MQTT broker {}, giving up", reason);
                    lock_stats(&self.stats).last_error = Some(reason.clone());
                    self.link.send_replace(LinkState::Failed(reason));
                    break;
                }
                Err(e) => {
                    let was_connected = *self.link.borrow() == LinkState::Connected;
                    if was_connected {
                        warn!("Lost connection to MQTT broker: {}", e);
                    } else {
                        debug!("MQTT connection attempt failed: {}", e);
                    }
                    lock_stats(&self.stats).last_error = Some(e.to_string());
                    self.link.send_replace(LinkState::Connecting);

                    tokio::select! {
                        _ = self.shutdown.wait_for(|stop| *stop) => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }

        self.link.send_if_modified(|state| {
            let was_connected = *state == LinkState::Connected;
            if was_connected {
                *state = LinkState::Connecting;
            }
            was_connected
        });
        debug!("MQTT event loop stopped");
    }
}
