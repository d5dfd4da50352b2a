//! Common test utilities for PushSockets integration tests
//!
//! - [`MockConnector`]: records every transport the manager opens and lets a
//!   test fire transport events by hand
//! - [`MockBroker`]: a small STOMP-over-WebSocket server for end-to-end tests

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use pushsockets::stomp::{Command, Frame, FrameDecoder};
use pushsockets::{
    Connector, EventSink, OpenRequest, Result, SubscriptionId, Transport, TransportEvent,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Notify};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

/// Let the manager's dispatcher drain pending signals
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Poll `condition` until it holds or `limit` elapses
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// =============================================================================
// Mock connector
// =============================================================================

/// Everything one opened transport saw
pub struct MockRecord {
    pub request: OpenRequest,
    sink: EventSink,
    pub subscribed: Mutex<Vec<(SubscriptionId, String)>>,
    pub unsubscribed: Mutex<Vec<SubscriptionId>>,
    pub sent: Mutex<Vec<(String, String)>>,
    closed: AtomicBool,
}

impl MockRecord {
    /// Fire an event as if the transport produced it
    pub fn emit(&self, event: TransportEvent) {
        self.sink.emit(event);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn subscribed_destinations(&self) -> Vec<String> {
        self.subscribed
            .lock()
            .unwrap()
            .iter()
            .map(|(_, d)| d.clone())
            .collect()
    }
}

struct MockTransport {
    record: Arc<MockRecord>,
}

impl Transport for MockTransport {
    fn subscribe(&self, id: SubscriptionId, destination: &str) -> Result<()> {
        self.record
            .subscribed
            .lock()
            .unwrap()
            .push((id, destination.to_string()));
        Ok(())
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.record.unsubscribed.lock().unwrap().push(id);
        Ok(())
    }

    fn send(&self, destination: &str, body: &str) -> Result<()> {
        self.record
            .sent
            .lock()
            .unwrap()
            .push((destination.to_string(), body.to_string()));
        Ok(())
    }

    fn close(&self) {
        self.record.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector whose transports are driven by the test
#[derive(Clone, Default)]
pub struct MockConnector {
    opened: Arc<Mutex<Vec<Arc<MockRecord>>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transports opened so far
    pub fn opened(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    /// Transports opened and not yet closed
    pub fn live(&self) -> usize {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.is_closed())
            .count()
    }

    pub fn transport(&self, index: usize) -> Arc<MockRecord> {
        Arc::clone(&self.opened.lock().unwrap()[index])
    }

    /// Most recently opened transport
    pub fn last(&self) -> Arc<MockRecord> {
        let opened = self.opened.lock().unwrap();
        Arc::clone(opened.last().expect("no transport opened"))
    }
}

impl Connector for MockConnector {
    fn open(&self, request: OpenRequest, events: EventSink) -> Result<Box<dyn Transport>> {
        let record = Arc::new(MockRecord {
            request,
            sink: events,
            subscribed: Mutex::new(Vec::new()),
            unsubscribed: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.opened.lock().unwrap().push(Arc::clone(&record));
        Ok(Box::new(MockTransport { record }))
    }
}

// =============================================================================
// Mock STOMP broker
// =============================================================================

/// Broker behaviour knobs
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    /// Token the broker accepts in the CONNECT `Authorization` header
    pub token: String,
    /// `heart-beat` header sent in CONNECTED
    pub heartbeat: (u64, u64),
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            token: "good-token".to_string(),
            heartbeat: (0, 0),
        }
    }
}

struct BrokerState {
    options: BrokerOptions,
    /// Destinations with a live subscriber, one entry per SUBSCRIBE
    subscriptions: Mutex<Vec<String>>,
    /// SEND frames received from clients
    received: Mutex<Vec<Frame>>,
    sessions: AtomicUsize,
    publish: broadcast::Sender<(String, String)>,
    kick: broadcast::Sender<()>,
}

/// A STOMP 1.2 broker on an ephemeral port
pub struct MockBroker {
    pub addr: SocketAddr,
    state: Arc<BrokerState>,
    shutdown: Arc<Notify>,
}

impl MockBroker {
    pub async fn start() -> Self {
        Self::start_with(BrokerOptions::default()).await
    }

    pub async fn start_with(options: BrokerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let (publish, _) = broadcast::channel(64);
        let (kick, _) = broadcast::channel(4);
        let state = Arc::new(BrokerState {
            options,
            subscriptions: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            sessions: AtomicUsize::new(0),
            publish,
            kick,
        });

        let accept_state = Arc::clone(&state);
        let accept_shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((stream, _)) => {
                            let state = Arc::clone(&accept_state);
                            let shutdown = Arc::clone(&accept_shutdown);
                            tokio::spawn(handle_session(stream, state, shutdown));
                        }
                        Err(e) => {
                            eprintln!("Accept error: {}", e);
                            break;
                        }
                    },
                    _ = accept_shutdown.notified() => break,
                }
            }
        });

        Self {
            addr,
            state,
            shutdown,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Number of sessions that passed authentication
    pub fn sessions(&self) -> usize {
        self.state.sessions.load(Ordering::SeqCst)
    }

    pub fn subscribers(&self, destination: &str) -> usize {
        self.state
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.as_str() == destination)
            .count()
    }

    pub fn received(&self) -> Vec<Frame> {
        self.state.received.lock().unwrap().clone()
    }

    /// Push a MESSAGE to every subscriber of `destination`
    pub fn publish(&self, destination: &str, body: &str) {
        let _ = self
            .state
            .publish
            .send((destination.to_string(), body.to_string()));
    }

    /// Close every open session from the broker side
    pub fn kick_all(&self) {
        let _ = self.state.kick.send(());
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn handle_session(stream: TcpStream, state: Arc<BrokerState>, shutdown: Arc<Notify>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();
    let mut decoder = FrameDecoder::new();
    let mut publish_rx = state.publish.subscribe();
    let mut kick_rx = state.kick.subscribe();
    let mut subscriptions: Vec<(String, String)> = Vec::new();
    let mut message_id = 0u64;

    'session: loop {
        tokio::select! {
            msg = read.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let frames = match decoder.push(&text) {
                    Ok(frames) => frames,
                    Err(_) => break,
                };
                for frame in frames {
                    match frame.command {
                        Command::Connect | Command::Stomp => {
                            let expected = format!("Bearer {}", state.options.token);
                            if frame.get_header("Authorization") != Some(expected.as_str()) {
                                let error = Frame::new(Command::Error)
                                    .header("message", "Authentication failed: invalid token");
                                let _ = write.send(Message::Text(error.encode())).await;
                                let _ = write.close().await;
                                break 'session;
                            }
                            state.sessions.fetch_add(1, Ordering::SeqCst);
                            let (sx, sy) = state.options.heartbeat;
                            let connected = Frame::new(Command::Connected)
                                .header("version", "1.2")
                                .header("heart-beat", format!("{},{}", sx, sy));
                            if write.send(Message::Text(connected.encode())).await.is_err() {
                                break 'session;
                            }
                        }
                        Command::Subscribe => {
                            let id = frame.get_header("id").unwrap_or_default().to_string();
                            let destination =
                                frame.get_header("destination").unwrap_or_default().to_string();
                            state.subscriptions.lock().unwrap().push(destination.clone());
                            subscriptions.push((id, destination));
                        }
                        Command::Unsubscribe => {
                            let id = frame.get_header("id").unwrap_or_default();
                            if let Some(pos) = subscriptions.iter().position(|(i, _)| i == id) {
                                let (_, destination) = subscriptions.remove(pos);
                                remove_one(&state, &destination);
                            }
                        }
                        Command::Send => state.received.lock().unwrap().push(frame),
                        Command::Disconnect => break 'session,
                        _ => {}
                    }
                }
            }
            published = publish_rx.recv() => {
                let Ok((destination, body)) = published else { continue };
                for (id, subscribed) in &subscriptions {
                    if *subscribed != destination {
                        continue;
                    }
                    message_id += 1;
                    let message = Frame::new(Command::Message)
                        .header("destination", destination.clone())
                        .header("subscription", id.clone())
                        .header("message-id", message_id.to_string())
                        .with_body(body.clone());
                    if write.send(Message::Text(message.encode())).await.is_err() {
                        break 'session;
                    }
                }
            }
            _ = kick_rx.recv() => {
                let _ = write.close().await;
                break;
            }
            _ = shutdown.notified() => break,
        }
    }

    for (_, destination) in subscriptions {
        remove_one(&state, &destination);
    }
}

fn remove_one(state: &BrokerState, destination: &str) {
    let mut subscriptions = state.subscriptions.lock().unwrap();
    if let Some(pos) = subscriptions.iter().position(|d| d == destination) {
        subscriptions.remove(pos);
    }
}
