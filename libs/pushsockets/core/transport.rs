//! STOMP transport over a negotiated frame channel
//!
//! Each [`StompTransport`] owns one tokio task that runs the whole life of a
//! single connection attempt:
//!
//! ```text
//! negotiate channel ──> CONNECT ──> wait CONNECTED ──> session loop ──> Ending
//!        │                               │                  │
//!        └── deadline: connect_timeout ──┘                  ├─ inbound frames
//!                                                           ├─ commands from the owner
//!                                                           ├─ outgoing heart-beat
//!                                                           └─ inbound watchdog
//! ```
//!
//! The task reports at most one terminal event. A transport that was closed
//! by its owner reports nothing.

use crate::core::channel::{self, FrameChannel};
use crate::core::heartbeat::{Heartbeat, HeartbeatSchedule};
use crate::core::liveness::LivenessTracker;
use crate::core::stomp::{Command, Frame, FrameDecoder, HEARTBEAT_EOL};
use crate::traits::*;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

/// Work queued for the transport's I/O task
#[derive(Debug)]
enum TransportCommand {
    Subscribe {
        id: SubscriptionId,
        destination: String,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
    Send {
        destination: String,
        body: String,
    },
    Close,
}

/// How a session ended
enum Ending {
    /// The peer closed the channel cleanly
    Closed,
    /// A failure to report to the owner
    Report(TransportEvent),
    /// The owner asked us to stop
    Quiet,
}

/// Connector that opens STOMP sessions over WebSocket or SockJS
#[derive(Debug, Clone, Default)]
pub struct StompConnector {
    handle: Option<Handle>,
}

impl StompConnector {
    /// Spawn transports on whichever runtime calls `open`
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn transports on a specific runtime
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl Connector for StompConnector {
    fn open(&self, request: OpenRequest, events: EventSink) -> Result<Box<dyn Transport>> {
        let handle = match &self.handle {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| {
                PushSocketError::Configuration("no tokio runtime available to run the transport".into())
            })?,
        };

        let (command_tx, command_rx) = unbounded_channel();
        debug!("[Transport] Opening {}", request.url);
        let session = handle.spawn(run_transport(request, events.clone(), command_rx));
        handle.spawn(supervise(session, events));

        Ok(Box::new(StompTransport { command_tx }))
    }
}

/// Handle to a running STOMP session
///
/// Dropping the handle has the same effect as [`Transport::close`].
pub struct StompTransport {
    command_tx: UnboundedSender<TransportCommand>,
}

impl StompTransport {
    fn queue(&self, command: TransportCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| PushSocketError::ChannelSend("transport task has stopped".into()))
    }
}

impl Transport for StompTransport {
    fn subscribe(&self, id: SubscriptionId, destination: &str) -> Result<()> {
        self.queue(TransportCommand::Subscribe {
            id,
            destination: destination.to_string(),
        })
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.queue(TransportCommand::Unsubscribe { id })
    }

    fn send(&self, destination: &str, body: &str) -> Result<()> {
        self.queue(TransportCommand::Send {
            destination: destination.to_string(),
            body: body.to_string(),
        })
    }

    fn close(&self) {
        let _ = self.command_tx.send(TransportCommand::Close);
    }
}

async fn run_transport(
    request: OpenRequest,
    events: EventSink,
    mut commands: UnboundedReceiver<TransportCommand>,
) {
    let deadline = Instant::now() + request.connect_timeout;
    let mut backlog = Vec::new();

    let negotiated = tokio::select! {
        result = timeout_at(deadline, channel::negotiate(&request)) => result,
        _ = wait_for_close(&mut commands, &mut backlog) => {
            debug!("[Transport] Closed while negotiating");
            return;
        }
    };

    let channel = match negotiated {
        Ok(Ok(channel)) => channel,
        Ok(Err(e)) => {
            warn!("[Transport] Could not open channel to {}: {}", request.url, e);
            events.emit(TransportEvent::TransportError(e.to_string()));
            return;
        }
        Err(_) => {
            warn!("[Transport] Timed out opening channel to {}", request.url);
            events.emit(TransportEvent::TransportError(format!(
                "connection timed out after {:?}",
                request.connect_timeout
            )));
            return;
        }
    };

    info!("[Transport] Channel open ({})", channel.kind());

    let mut session = Session {
        channel,
        commands,
        backlog,
        events: events.clone(),
        decoder: FrameDecoder::new(),
        heartbeat: Heartbeat::disabled(),
        liveness: None,
        connected: false,
    };

    match session.run(&request, deadline).await {
        Ending::Closed => {
            info!("[Transport] Broker closed the connection");
            events.emit(TransportEvent::Disconnected);
        }
        Ending::Report(event) => events.emit(event),
        Ending::Quiet => debug!("[Transport] Closed by owner"),
    }
}

/// Report a session task that died without emitting its own ending
async fn supervise(session: JoinHandle<()>, events: EventSink) {
    if let Err(e) = session.await {
        if e.is_panic() {
            error!("[Transport] Session task panicked");
            events.emit(TransportEvent::TransportError("transport task panicked".into()));
        }
    }
}

/// Buffer commands until a close request (or a dropped handle) arrives
async fn wait_for_close(
    commands: &mut UnboundedReceiver<TransportCommand>,
    backlog: &mut Vec<TransportCommand>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            TransportCommand::Close => return,
            other => backlog.push(other),
        }
    }
}

struct Session {
    channel: Box<dyn FrameChannel>,
    commands: UnboundedReceiver<TransportCommand>,
    /// Commands received before the broker accepted the session
    backlog: Vec<TransportCommand>,
    events: EventSink,
    decoder: FrameDecoder,
    heartbeat: Heartbeat,
    liveness: Option<LivenessTracker>,
    connected: bool,
}

impl Session {
    async fn run(&mut self, request: &OpenRequest, deadline: Instant) -> Ending {
        let connect = Frame::connect(
            &host_of(&request.url),
            &request.authorization,
            (
                request.heartbeat_outgoing.as_millis() as u64,
                request.heartbeat_incoming.as_millis() as u64,
            ),
        );
        if let Err(e) = self.channel.send(connect.encode()).await {
            return Ending::Report(TransportEvent::TransportError(e.to_string()));
        }

        let connect_deadline = sleep_until(deadline);
        tokio::pin!(connect_deadline);

        loop {
            tokio::select! {
                inbound = self.channel.recv() => match inbound {
                    Ok(Some(payloads)) => {
                        if let Some(liveness) = &self.liveness {
                            liveness.record_inbound();
                        }
                        for payload in payloads {
                            if let Some(ending) = self.on_payload(&payload, request).await {
                                return ending;
                            }
                        }
                    }
                    Ok(None) => return Ending::Closed,
                    Err(e) => {
                        error!("[Transport] Read failed: {}", e);
                        return Ending::Report(TransportEvent::TransportError(e.to_string()));
                    }
                },

                command = self.commands.recv() => match command {
                    Some(TransportCommand::Close) | None => {
                        self.shutdown().await;
                        return Ending::Quiet;
                    }
                    Some(command) if !self.connected => self.backlog.push(command),
                    Some(command) => {
                        if let Err(e) = self.execute(command).await {
                            return Ending::Report(TransportEvent::TransportError(e.to_string()));
                        }
                    }
                },

                _ = self.heartbeat.outgoing.tick() => {
                    if let Err(e) = self.channel.send(HEARTBEAT_EOL.to_string()).await {
                        return Ending::Report(TransportEvent::TransportError(e.to_string()));
                    }
                },

                _ = self.heartbeat.watchdog.tick() => {
                    if let Some(liveness) = &self.liveness {
                        if !liveness.is_healthy() {
                            warn!(
                                "[Transport] No data from broker for {:?} (limit {:?})",
                                liveness.silence(),
                                liveness.limit()
                            );
                            return Ending::Report(TransportEvent::TransportError(format!(
                                "no data received within {:?}",
                                liveness.limit()
                            )));
                        }
                    }
                },

                _ = &mut connect_deadline, if !self.connected => {
                    warn!("[Transport] Broker did not answer CONNECT in time");
                    return Ending::Report(TransportEvent::TransportError(format!(
                        "broker did not accept the session within {:?}",
                        request.connect_timeout
                    )));
                },
            }
        }
    }

    async fn on_payload(&mut self, payload: &str, request: &OpenRequest) -> Option<Ending> {
        let frames = match self.decoder.push(payload) {
            Ok(frames) => frames,
            Err(e) => {
                error!("[Transport] Undecodable data from broker: {}", e);
                return Some(Ending::Report(TransportEvent::TransportError(e.to_string())));
            }
        };

        for frame in frames {
            match frame.command {
                Command::Connected => {
                    let schedule = HeartbeatSchedule::negotiate(
                        request.heartbeat_outgoing,
                        request.heartbeat_incoming,
                        frame.heartbeat(),
                    );
                    self.liveness = schedule.silence_limit().map(LivenessTracker::new);
                    self.heartbeat = Heartbeat::start(schedule);
                    self.connected = true;
                    info!(
                        "[Transport] Session established (version {})",
                        frame.get_header("version").unwrap_or("1.0")
                    );
                    self.events.emit(TransportEvent::Connected);

                    for command in std::mem::take(&mut self.backlog) {
                        if let Err(e) = self.execute(command).await {
                            return Some(Ending::Report(TransportEvent::TransportError(
                                e.to_string(),
                            )));
                        }
                    }
                }
                Command::Message => match frame.get_header("destination") {
                    Some(destination) => self.events.emit(TransportEvent::Message {
                        destination: destination.to_string(),
                        subscription: frame.get_header("subscription").and_then(SubscriptionId::parse),
                        body: frame.body,
                    }),
                    None => warn!("[Transport] MESSAGE without destination dropped"),
                },
                Command::Error => {
                    let detail = frame.error_detail();
                    warn!("[Transport] Broker error: {}", detail);
                    return Some(Ending::Report(TransportEvent::ProtocolError(detail)));
                }
                Command::Receipt => {
                    debug!("[Transport] Receipt {:?}", frame.get_header("receipt-id"));
                }
                other => debug!("[Transport] Ignoring unexpected {} frame", other),
            }
        }

        None
    }

    async fn execute(&mut self, command: TransportCommand) -> Result<()> {
        let frame = match command {
            TransportCommand::Subscribe { id, destination } => {
                debug!("[Transport] SUBSCRIBE {} -> {}", id, destination);
                Frame::subscribe(id, &destination)
            }
            TransportCommand::Unsubscribe { id } => {
                debug!("[Transport] UNSUBSCRIBE {}", id);
                Frame::unsubscribe(id)
            }
            TransportCommand::Send { destination, body } => Frame::send(&destination, &body),
            TransportCommand::Close => return Ok(()),
        };
        self.channel.send(frame.encode()).await
    }

    async fn shutdown(&mut self) {
        if self.connected {
            let _ = self.channel.send(Frame::disconnect().encode()).await;
        }
        self.channel.close().await;
    }
}

/// Virtual host announced in CONNECT
fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string())
}
