//! End-to-end tests against a local STOMP broker
//!
//! These run the real `StompConnector` over WebSocket, on the real clock.

#[macro_use]
mod common;

use common::{wait_until, BrokerOptions, MockBroker};
use pushsockets::stomp::Command;
use pushsockets::{
    ConnectionConfig, ConnectionManager, ConnectionState, Envelope, ManagerEvent, PushSocketError,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn config(broker: &MockBroker, token: &str) -> ConnectionConfig {
    ConnectionConfig::new(broker.ws_url(), token)
        .with_heartbeat(Duration::ZERO, Duration::ZERO)
        .with_reconnect(Duration::from_millis(100), 5)
        .with_connect_timeout(Duration::from_secs(2))
}

#[tokio::test]
async fn test_connect_subscribe_and_receive() {
    let broker = MockBroker::start().await;
    let manager = ConnectionManager::new().unwrap();

    let (tx, rx) = mpsc::channel();
    let _rules = manager.subscribe("/topic/rules", move |message| {
        let _ = tx.send(message.clone());
    });

    manager.connect(config(&broker, "good-token"));
    assert!(wait_until(WAIT, || manager.is_connected()).await);
    assert!(wait_until(WAIT, || broker.subscribers("/topic/rules") == 1).await);
    verbose_println!("  subscribed on broker, publishing");

    let body = Envelope::new("RULE_DEPLOYED", json!({"ruleId": "r-42", "status": "OK"}))
        .encode()
        .unwrap();
    broker.publish("/topic/rules", &body);

    let message = tokio::task::spawn_blocking(move || rx.recv_timeout(WAIT))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.destination, "/topic/rules");
    assert_eq!(message.kind(), Some("RULE_DEPLOYED"));
    assert_eq!(
        message.envelope.unwrap().payload["ruleId"],
        json!("r-42")
    );

    manager.disconnect();
    assert!(wait_until(WAIT, || broker.subscribers("/topic/rules") == 0).await);
}

#[tokio::test]
async fn test_two_subscriptions_on_one_destination_each_get_one_copy() {
    let broker = MockBroker::start().await;
    let manager = ConnectionManager::new().unwrap();

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&first);
    let _a = manager.subscribe("/topic/rules", move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    });
    let count = Arc::clone(&second);
    let _b = manager.subscribe("/topic/rules", move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    });

    manager.connect(config(&broker, "good-token"));
    assert!(wait_until(WAIT, || broker.subscribers("/topic/rules") == 2).await);

    broker.publish("/topic/rules", r#"{"type":"RULE_DEPLOYED","payload":{}}"#);
    assert!(
        wait_until(WAIT, || {
            first.load(Ordering::SeqCst) >= 1 && second.load(Ordering::SeqCst) >= 1
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejected_token_fails_without_retry() {
    let broker = MockBroker::start().await;
    let errors = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&errors);
    let manager = ConnectionManager::builder()
        .on_error(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    manager.connect(config(&broker, "stale-token"));
    assert!(wait_until(WAIT, || manager.state() == ConnectionState::Failed).await);

    assert!(matches!(
        manager.connection_error(),
        Some(PushSocketError::Authentication(_))
    ));
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert!(!manager.has_pending_reconnect());
    assert_eq!(broker.sessions(), 0);
}

#[tokio::test]
async fn test_broker_restart_reconnects_and_replays() {
    let broker = MockBroker::start().await;
    let manager = ConnectionManager::new().unwrap();
    let _executions = manager.subscribe("/topic/executions", |_| {});

    manager.connect(config(&broker, "good-token"));
    assert!(wait_until(WAIT, || broker.subscribers("/topic/executions") == 1).await);

    broker.kick_all();
    assert!(wait_until(WAIT, || broker.sessions() == 2).await);
    assert!(wait_until(WAIT, || manager.is_connected()).await);
    assert!(wait_until(WAIT, || broker.subscribers("/topic/executions") == 1).await);
    assert_eq!(manager.reconnect_attempts(), 0);
}

#[tokio::test]
async fn test_send_reaches_broker() {
    let broker = MockBroker::start().await;
    let manager = ConnectionManager::new().unwrap();

    manager.connect(config(&broker, "good-token"));
    assert!(wait_until(WAIT, || manager.is_connected()).await);

    manager
        .send("/app/executions/ack", r#"{"type":"ACK","payload":{"id":7}}"#)
        .unwrap();
    assert!(wait_until(WAIT, || !broker.received().is_empty()).await);

    let frame = &broker.received()[0];
    assert_eq!(frame.command, Command::Send);
    assert_eq!(frame.get_header("destination"), Some("/app/executions/ack"));
    assert_eq!(frame.get_header("content-type"), Some("application/json"));
    assert_eq!(frame.body, r#"{"type":"ACK","payload":{"id":7}}"#);
}

#[tokio::test]
async fn test_silent_broker_is_detected() {
    // Broker promises heart-beats every 100ms and never sends one
    let broker = MockBroker::start_with(BrokerOptions {
        heartbeat: (100, 0),
        ..BrokerOptions::default()
    })
    .await;
    let manager = ConnectionManager::new().unwrap();
    let events = manager.events();

    manager.connect(
        config(&broker, "good-token")
            .with_heartbeat(Duration::from_millis(100), Duration::ZERO)
            .with_reconnect(Duration::from_secs(30), 5),
    );
    assert!(wait_until(WAIT, || manager.is_connected()).await);
    assert!(wait_until(WAIT, || manager.state() == ConnectionState::Reconnecting).await);

    let detail = events
        .try_iter()
        .find_map(|event| match event {
            ManagerEvent::Error(PushSocketError::Transport(detail)) => Some(detail),
            _ => None,
        })
        .unwrap();
    verbose_println!("  watchdog reported: {}", detail);
    assert!(detail.contains("no data received"));
}

#[tokio::test]
async fn test_unreachable_broker_retries() {
    let manager = ConnectionManager::new().unwrap();
    let config = ConnectionConfig::new("ws://127.0.0.1:1/ws", "good-token")
        .with_reconnect(Duration::from_secs(30), 5);

    manager.connect(config);
    assert!(wait_until(WAIT, || manager.state() == ConnectionState::Reconnecting).await);
    assert_eq!(manager.reconnect_attempts(), 1);
    assert!(manager.has_pending_reconnect());
}
