//! Shared fixtures for the connector integration tests
//!
//! Provides:
//! - `ScriptedConnector`, an in-memory connector whose publish results are
//!   scripted per call and whose link can be switched on and off
//! - `FakeBroker`, a minimal MQTT 3.1.1 broker on a local socket that
//!   answers CONNECT and QoS 1 PUBLISH packets
//! - Record builders

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ruuvi_mqtt_connectors::{AsyncConnector, ConnectionStats, ConnectorError};
use ruuvi_mqtt_core::{enrich, EnrichOptions, EnrichedRecord, RawMeasurement, TagProfile};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

/// Enriched record for a named tag with a single temperature reading
pub fn record(mac: &str, name: &str, temperature: f64) -> EnrichedRecord {
    let raw = RawMeasurement::new(mac.parse().unwrap(), 1_700_000_000_000).with_value("temperature", temperature);
    let profile = TagProfile::new().with_name(name).unwrap();
    enrich(&raw, &profile, &EnrichOptions::default()).record
}

/// What the scripted connector saw
#[derive(Debug, Default)]
pub struct Journal {
    pub attempts: u32,
    pub published: Vec<(String, Vec<u8>)>,
}

/// Connector with scripted publish results
///
/// Each publish while the link is up pops the next scripted result (success
/// once the script is exhausted). While the link is down publishes fail with
/// `NotConnected` without touching the script.
pub struct ScriptedConnector {
    script: VecDeque<Result<(), ConnectorError>>,
    journal: Arc<Mutex<Journal>>,
    link: watch::Receiver<bool>,
}

impl ScriptedConnector {
    pub fn new(
        script: Vec<Result<(), ConnectorError>>,
        connected: bool,
    ) -> (Self, Arc<Mutex<Journal>>, watch::Sender<bool>) {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let (link_tx, link) = watch::channel(connected);
        let connector = Self {
            script: script.into(),
            journal: Arc::clone(&journal),
            link,
        };
        (connector, journal, link_tx)
    }
}

#[async_trait::async_trait]
impl AsyncConnector for ScriptedConnector {
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ConnectorError> {
        let mut journal = self.journal.lock().unwrap();
        journal.attempts += 1;
        if !*self.link.borrow() {
            return Err(ConnectorError::NotConnected);
        }
        let result = self.script.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            journal.published.push((topic.to_string(), payload.to_vec()));
        }
        result
    }

    fn is_connected(&self) -> bool {
        *self.link.borrow()
    }

    async fn wait_connected(&mut self) -> Result<(), ConnectorError> {
        self.link
            .wait_for(|up| *up)
            .await
            .map(|_| ())
            .map_err(|_| ConnectorError::NotConnected)
    }

    fn stats(&self) -> ConnectionStats {
        let journal = self.journal.lock().unwrap();
        ConnectionStats {
            messages_sent: journal.published.len() as u64,
            messages_failed: (journal.attempts as usize - journal.published.len()) as u64,
            ..Default::default()
        }
    }

    async fn disconnect(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// CONNACK return code sent by the fake broker
#[derive(Debug, Clone, Copy)]
pub enum BrokerMode {
    Accept,
    /// Refuse with the given CONNACK return code
    Refuse(u8),
    /// Accept the session but never acknowledge publishes
    Silent,
}

/// PUBLISH received by the fake broker
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Minimal single-connection MQTT 3.1.1 broker
pub struct FakeBroker {
    pub port: u16,
    pub received: mpsc::UnboundedReceiver<Received>,
}

impl FakeBroker {
    pub async fn start(mode: BrokerMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, received) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, mode, tx).await;
                });
            }
        });

        Self { port, received }
    }
}

async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let header = stream.read_u8().await?;

    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        remaining |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut body = vec![0; remaining];
    stream.read_exact(&mut body).await?;
    Ok((header, body))
}

async fn serve(mut stream: TcpStream, mode: BrokerMode, tx: mpsc::UnboundedSender<Received>) -> std::io::Result<()> {
    loop {
        let (header, body) = read_packet(&mut stream).await?;
        match header >> 4 {
            // CONNECT
            1 => {
                let code = match mode {
                    BrokerMode::Refuse(code) => code,
                    _ => 0,
                };
                stream.write_all(&[0x20, 0x02, 0x00, code]).await?;
                if code != 0 {
                    return Ok(());
                }
            }
            // PUBLISH
            3 => {
                let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                let topic = String::from_utf8_lossy(&body[2..2 + topic_len]).into_owned();
                let qos = (header >> 1) & 0x03;
                let mut offset = 2 + topic_len;
                let pkid = if qos > 0 {
                    offset += 2;
                    Some([body[offset - 2], body[offset - 1]])
                } else {
                    None
                };
                let _ = tx.send(Received {
                    topic,
                    payload: body[offset..].to_vec(),
                });
                if let (Some([hi, lo]), false) = (pkid, matches!(mode, BrokerMode::Silent)) {
                    stream.write_all(&[0x40, 0x02, hi, lo]).await?;
                }
            }
            // PINGREQ
            12 => stream.write_all(&[0xd0, 0x00]).await?,
            // DISCONNECT
            14 => return Ok(()),
            _ => {}
        }
    }
}
