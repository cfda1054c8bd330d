//! Integration tests for the MQTT connector against a local fake broker

mod common;

use std::time::Duration;

use ruuvi_mqtt_connectors::{AsyncConnector, ConnectorError, MqttConfig, MqttConnector};

use common::{BrokerMode, FakeBroker, Received};

fn config(port: u16) -> MqttConfig {
    MqttConfig::new("127.0.0.1", port)
        .client_id("ruuvi-mqtt-test")
        .ack_timeout(Duration::from_millis(500))
        .reconnect_delay(Duration::from_millis(50))
}

#[tokio::test]
async fn test_publish_is_acknowledged() {
    let mut broker = FakeBroker::start(BrokerMode::Accept).await;
    let mut mqtt = MqttConnector::connect(config(broker.port)).unwrap();

    tokio::time::timeout(Duration::from_secs(5), mqtt.wait_connected())
        .await
        .expect("connection should come up")
        .unwrap();
    assert!(mqtt.is_connected());

    mqtt.publish("ruuvi-mqtt/tele/aabbccddeeff/kitchen/SENSOR", b"{\"temperature\":21.5}")
        .await
        .unwrap();

    assert_eq!(
        broker.received.recv().await,
        Some(Received {
            topic: "ruuvi-mqtt/tele/aabbccddeeff/kitchen/SENSOR".into(),
            payload: b"{\"temperature\":21.5}".to_vec(),
        })
    );

    let stats = mqtt.stats();
    assert_eq!(stats.messages_sent, 1);
    assert_eq!(stats.bytes_sent, 20);

    mqtt.disconnect().await.unwrap();
    assert!(!mqtt.is_connected());
}

#[tokio::test]
async fn test_missing_ack_times_out() {
    let _broker = FakeBroker::start(BrokerMode::Silent).await;
    let mut mqtt = MqttConnector::connect(config(_broker.port)).unwrap();
    mqtt.wait_connected().await.unwrap();

    let result = mqtt.publish("ruuvi/test", b"{}").await;

    assert_eq!(result, Err(ConnectorError::Timeout));
    assert!(!result.unwrap_err().is_fatal());
    assert_eq!(mqtt.stats().messages_failed, 1);
    mqtt.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_refused_credentials_are_fatal() {
    // CONNACK return code 5: not authorized
    let broker = FakeBroker::start(BrokerMode::Refuse(5)).await;
    let mut mqtt = MqttConnector::connect(config(broker.port).credentials("ruuvi", "wrong")).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), mqtt.wait_connected())
        .await
        .expect("refusal should be reported");

    assert!(matches!(result, Err(ConnectorError::Rejected(_))));
    let publish = mqtt.publish("ruuvi/test", b"{}").await;
    assert!(publish.unwrap_err().is_fatal());
    mqtt.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_publish_without_broker_is_transient() {
    // Bind and drop to get a port nobody listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut mqtt = MqttConnector::connect(config(port)).unwrap();

    let result = mqtt.publish("ruuvi/test", b"{}").await;
    assert_eq!(result, Err(ConnectorError::NotConnected));

    // Still trying in the background, so waiting does not resolve
    assert!(tokio::time::timeout(Duration::from_millis(200), mqtt.wait_connected())
        .await
        .is_err());

    tokio::time::timeout(Duration::from_secs(1), mqtt.disconnect())
        .await
        .expect("disconnect should not hang")
        .unwrap();
}

#[test]
fn test_invalid_config_is_rejected_before_connecting() {
    let result = MqttConnector::connect(MqttConfig::new("", 1883));
    assert!(matches!(result, Err(ConnectorError::Config(_))));
}
