use crate::core::config::ConnectionConfig;
use crate::core::connection_state::{AtomicConnectionState, ConnectionState};
use crate::core::envelope::InboundMessage;
use crate::core::transport::StompConnector;
use crate::manager::registry::{MessageHandler, SubscriptionRegistry};
use crate::traits::*;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the observer event queue; older events are kept, newer dropped
const EVENT_QUEUE_CAPACITY: usize = 1024;

pub type ConnectCallback = Arc<dyn Fn() + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&PushSocketError) + Send + Sync>;

/// Notifications for observers of a [`ConnectionManager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// The connection state changed
    StateChanged(ConnectionState),
    /// A failure was classified; fatal ones also reach `on_error`
    Error(PushSocketError),
    /// A retry was scheduled
    ReconnectScheduled { attempt: u32, delay: Duration },
}

/// Input to the manager's dispatcher task
#[derive(Debug)]
enum Signal {
    Transport { generation: u64, event: TransportEvent },
    ReconnectDue { timer_id: u64 },
}

struct PendingTimer {
    id: u64,
    handle: JoinHandle<()>,
}

/// Everything guarded by the state-machine lock
struct Inner {
    state: ConnectionState,
    config: Option<ConnectionConfig>,
    transport: Option<Box<dyn Transport>>,
    /// Bumped every time a transport is discarded; events carry the value
    /// they were created under
    generation: u64,
    reconnect_attempts: u32,
    timer: Option<PendingTimer>,
    next_timer_id: u64,
    last_error: Option<PushSocketError>,
}

/// Work collected under the lock and performed after releasing it
#[derive(Default)]
struct Effects {
    close: Vec<Box<dyn Transport>>,
    events: Vec<ManagerEvent>,
    connected: bool,
    fatal: Option<PushSocketError>,
    messages: Vec<InboundMessage>,
}

struct Shared {
    inner: Mutex<Inner>,
    state: AtomicConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    registry: SubscriptionRegistry,
    connector: Arc<dyn Connector>,
    strategy: Option<Arc<dyn ReconnectionStrategy>>,
    on_connect: Option<ConnectCallback>,
    on_error: Option<ErrorCallback>,
    signal_tx: UnboundedSender<Signal>,
    event_tx: Sender<ManagerEvent>,
    event_rx: Receiver<ManagerEvent>,
    runtime: Handle,
}

/// Reconnecting, subscription-aware broker connection
///
/// Owns at most one live [`Transport`] at a time and drives the connection
/// state machine from the transport's events:
///
/// ```text
///                 connect()
/// Disconnected ─────────────> Connecting ──(connected)──> Connected
///      ^                       │     ^                        │
///      │ disconnect()          │     │ timer                  │ recoverable failure
///      │ (any state)           │     │                        v
///      │                       │   Reconnecting <─────────────┘
///      │                       │     │
///      │          auth failure │     │ attempts exhausted
///      │                       v     v
///      └────────────────────── Failed
/// ```
///
/// Every public method returns without waiting on network I/O. Transport
/// events and timer expiries are funnelled through one channel into a
/// dispatcher task, and all transitions happen under a single mutex.
/// Callbacks and subscription handlers always run with the lock released.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn builder() -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::default()
    }

    /// Manager with the STOMP connector and no callbacks
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Start a session
    ///
    /// No-op while already connecting or connected. A disabled config or one
    /// with an empty url or token is ignored with a log line. Otherwise any
    /// previous transport is torn down, the retry counter and last error are
    /// cleared, and a fresh transport is opened.
    pub fn connect(&self, config: ConnectionConfig) {
        let mut effects = Effects::default();
        {
            let mut inner = self.shared.inner.lock();
            if inner.state.is_active() {
                debug!("[Manager] connect ignored, already {}", inner.state);
                return;
            }
            if !config.is_usable() {
                warn!(
                    "[Manager] connect ignored: enabled={}, url set={}, token set={}",
                    config.enabled,
                    !config.url.is_empty(),
                    !config.token.is_empty()
                );
                return;
            }

            inner.reconnect_attempts = 0;
            inner.last_error = None;

            if let Err(e) = config.validate() {
                error!("[Manager] Invalid connection config: {}", e);
                inner.config = None;
                self.shared.fail(&mut inner, e, &mut effects);
            } else {
                info!("[Manager] Connecting to {}", config.url);
                self.shared.begin_attempt(&mut inner, config, &mut effects);
            }
        }
        self.shared.apply(effects);
    }

    /// End the session from any state
    ///
    /// Cancels a pending reconnect, closes the transport, clears the retry
    /// counter and moves to `Disconnected`. The last error stays readable
    /// until the next `connect`.
    pub fn disconnect(&self) {
        let mut effects = Effects::default();
        {
            let mut inner = self.shared.inner.lock();
            info!("[Manager] Disconnecting (was {})", inner.state);
            self.shared.cancel_timer(&mut inner);
            self.shared.discard_transport(&mut inner, &mut effects);
            inner.reconnect_attempts = 0;
            inner.config = None;
            self.shared
                .set_state(&mut inner, ConnectionState::Disconnected, &mut effects);
        }
        self.shared.apply(effects);
    }

    /// Register a handler for a destination
    ///
    /// Active immediately when connected; otherwise it is activated on the
    /// next successful connect. Every later reconnect replays it.
    pub fn subscribe<F>(&self, destination: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        let destination = destination.into();
        let handler: MessageHandler = Arc::new(handler);

        let inner = self.shared.inner.lock();
        let id = self.shared.registry.add(destination.clone(), handler);
        if inner.state.is_connected() {
            if let Some(transport) = &inner.transport {
                match transport.subscribe(id, &destination) {
                    Ok(()) => self.shared.registry.set_active(id, true),
                    Err(e) => warn!("[Manager] Could not activate {}: {}", id, e),
                }
            }
        } else {
            debug!("[Manager] {} for {} recorded until connected", id, destination);
        }
        drop(inner);

        Subscription {
            id,
            destination,
            shared: Arc::downgrade(&self.shared),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Send a body to a destination over the live transport
    pub fn send(&self, destination: &str, body: &str) -> Result<()> {
        let inner = self.shared.inner.lock();
        match (&inner.transport, inner.state) {
            (Some(transport), ConnectionState::Connected) => transport.send(destination, body),
            _ => Err(PushSocketError::NotConnected),
        }
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.shared.state.is_connected()
    }

    /// Last fatal error, cleared by `connect`
    pub fn connection_error(&self) -> Option<PushSocketError> {
        self.shared.inner.lock().last_error.clone()
    }

    /// Consecutive failures since the last successful connect
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.inner.lock().reconnect_attempts
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.shared.inner.lock().timer.is_some()
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Receiver of [`ManagerEvent`]s; all clones share one queue
    pub fn events(&self) -> Receiver<ManagerEvent> {
        self.shared.event_rx.clone()
    }

    /// Watch channel that always holds the current state
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let transport = {
            let mut inner = self.shared.inner.lock();
            self.shared.cancel_timer(&mut inner);
            inner.generation += 1;
            inner.transport.take()
        };
        if let Some(transport) = transport {
            debug!("[Manager] Closing transport on drop");
            transport.close();
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

/// Handle returned by [`ConnectionManager::subscribe`]
///
/// Dropping the handle keeps the subscription registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: SubscriptionId,
    destination: String,
    shared: Weak<Shared>,
    cancelled: AtomicBool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Remove the subscription; later calls do nothing
    pub fn unsubscribe(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.unsubscribe(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .finish()
    }
}

impl Shared {
    /// Open a fresh transport for `config`; the caller holds the lock
    fn begin_attempt(&self, inner: &mut Inner, config: ConnectionConfig, effects: &mut Effects) {
        self.cancel_timer(inner);
        self.discard_transport(inner, effects);

        let generation = inner.generation;
        let signals = self.signal_tx.clone();
        let sink = EventSink::new(move |event| {
            let _ = signals.send(Signal::Transport { generation, event });
        });
        let request = config.open_request();
        inner.config = Some(config);
        self.set_state(inner, ConnectionState::Connecting, effects);

        match self.connector.open(request, sink) {
            Ok(transport) => inner.transport = Some(transport),
            Err(e) => {
                error!("[Manager] Connector refused to open: {}", e);
                self.fail(inner, e, effects);
            }
        }
    }

    /// Classify a failure and either schedule a retry or fail the session
    fn fail(&self, inner: &mut Inner, failure: PushSocketError, effects: &mut Effects) {
        self.discard_transport(inner, effects);

        if failure.is_fatal() {
            warn!("[Manager] Fatal failure: {}", failure);
            self.give_up(inner, failure, effects);
            return;
        }

        let failures = inner.reconnect_attempts.saturating_add(1);
        let decision = match (&self.strategy, &inner.config) {
            (Some(strategy), _) => strategy.decide(FailureClass::Recoverable, failures),
            (None, Some(config)) => config
                .reconnect_strategy()
                .decide(FailureClass::Recoverable, failures),
            (None, None) => ReconnectDecision::GiveUp,
        };
        effects.events.push(ManagerEvent::Error(failure.clone()));

        match decision {
            ReconnectDecision::RetryAfter(delay) => {
                inner.reconnect_attempts = failures;
                warn!(
                    "[Manager] {} - reconnecting in {:?} (attempt {})",
                    failure, delay, failures
                );
                self.set_state(inner, ConnectionState::Reconnecting, effects);
                self.schedule_reconnect(inner, delay);
                effects.events.push(ManagerEvent::ReconnectScheduled {
                    attempt: failures,
                    delay,
                });
            }
            ReconnectDecision::GiveUp => {
                inner.reconnect_attempts = failures;
                error!("[Manager] {} - giving up after {} failures", failure, failures);
                self.give_up(
                    inner,
                    PushSocketError::RetriesExhausted { attempts: failures },
                    effects,
                );
            }
        }
    }

    fn give_up(&self, inner: &mut Inner, error: PushSocketError, effects: &mut Effects) {
        self.cancel_timer(inner);
        inner.last_error = Some(error.clone());
        self.set_state(inner, ConnectionState::Failed, effects);
        effects.events.push(ManagerEvent::Error(error.clone()));
        effects.fatal = Some(error);
    }

    fn on_signal(&self, signal: Signal) {
        let mut effects = Effects::default();
        {
            let mut inner = self.inner.lock();
            match signal {
                Signal::Transport { generation, event } => {
                    if generation != inner.generation {
                        debug!("[Manager] Dropping event from stale transport: {:?}", event);
                        return;
                    }
                    self.on_transport_event(&mut inner, event, &mut effects);
                }
                Signal::ReconnectDue { timer_id } => {
                    self.on_reconnect_due(&mut inner, timer_id, &mut effects);
                }
            }
        }
        self.apply(effects);
    }

    fn on_transport_event(&self, inner: &mut Inner, event: TransportEvent, effects: &mut Effects) {
        match event {
            TransportEvent::Connected => {
                if inner.state != ConnectionState::Connecting {
                    debug!("[Manager] Ignoring connected event in {}", inner.state);
                    return;
                }
                inner.reconnect_attempts = 0;
                self.set_state(inner, ConnectionState::Connected, effects);
                self.replay_subscriptions(inner);
                effects.connected = true;
                info!("[Manager] Connected");
            }
            TransportEvent::Message {
                destination,
                subscription,
                body,
            } => {
                if inner.state.is_connected() {
                    let mut message = InboundMessage::new(destination, body);
                    message.subscription = subscription;
                    effects.messages.push(message);
                }
            }
            TransportEvent::ProtocolError(detail) => {
                self.fail(inner, PushSocketError::classify_protocol(detail), effects);
            }
            TransportEvent::TransportError(detail) => {
                self.fail(inner, PushSocketError::Transport(detail), effects);
            }
            TransportEvent::Disconnected => {
                self.fail(
                    inner,
                    PushSocketError::Transport("connection closed by broker".into()),
                    effects,
                );
            }
        }
    }

    fn on_reconnect_due(&self, inner: &mut Inner, timer_id: u64, effects: &mut Effects) {
        if inner.timer.as_ref().map(|t| t.id) != Some(timer_id) {
            debug!("[Manager] Ignoring cancelled reconnect timer {}", timer_id);
            return;
        }
        inner.timer = None;

        if inner.state != ConnectionState::Reconnecting {
            return;
        }
        match inner.config.clone() {
            Some(config) if config.is_usable() => {
                info!("[Manager] Reconnect attempt {}", inner.reconnect_attempts);
                self.begin_attempt(inner, config, effects);
            }
            _ => {
                info!("[Manager] Session no longer usable, not reconnecting");
                self.set_state(inner, ConnectionState::Disconnected, effects);
            }
        }
    }

    fn replay_subscriptions(&self, inner: &mut Inner) {
        let Some(transport) = &inner.transport else {
            return;
        };
        for (id, destination) in self.registry.snapshot() {
            match transport.subscribe(id, &destination) {
                Ok(()) => self.registry.set_active(id, true),
                Err(e) => warn!("[Manager] Could not replay {}: {}", id, e),
            }
        }
        debug!("[Manager] Replayed {} subscriptions", self.registry.active_count());
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let inner = self.inner.lock();
        let Some(was_active) = self.registry.remove(id) else {
            return;
        };
        debug!("[Manager] Removed {}", id);
        if was_active && inner.state.is_connected() {
            if let Some(transport) = &inner.transport {
                if let Err(e) = transport.unsubscribe(id) {
                    warn!("[Manager] Could not deactivate {}: {}", id, e);
                }
            }
        }
    }

    fn discard_transport(&self, inner: &mut Inner, effects: &mut Effects) {
        if let Some(transport) = inner.transport.take() {
            effects.close.push(transport);
        }
        inner.generation += 1;
        self.registry.deactivate_all();
    }

    fn schedule_reconnect(&self, inner: &mut Inner, delay: Duration) {
        self.cancel_timer(inner);
        inner.next_timer_id += 1;
        let timer_id = inner.next_timer_id;
        let signals = self.signal_tx.clone();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = signals.send(Signal::ReconnectDue { timer_id });
        });
        inner.timer = Some(PendingTimer {
            id: timer_id,
            handle,
        });
    }

    fn cancel_timer(&self, inner: &mut Inner) {
        if let Some(timer) = inner.timer.take() {
            debug!("[Manager] Cancelling reconnect timer {}", timer.id);
            timer.handle.abort();
        }
    }

    fn set_state(&self, inner: &mut Inner, state: ConnectionState, effects: &mut Effects) {
        if inner.state == state {
            return;
        }
        debug!("[Manager] {} -> {}", inner.state, state);
        inner.state = state;
        self.state.set(state);
        self.state_tx.send_replace(state);
        effects.events.push(ManagerEvent::StateChanged(state));
    }

    /// Run the side effects of a transition; the lock must not be held
    fn apply(&self, effects: Effects) {
        for transport in effects.close {
            transport.close();
        }
        for event in effects.events {
            if let Err(TrySendError::Full(event)) = self.event_tx.try_send(event) {
                debug!("[Manager] Event queue full, dropping {:?}", event);
            }
        }
        if effects.connected {
            if let Some(callback) = &self.on_connect {
                callback();
            }
        }
        if let Some(error) = &effects.fatal {
            if let Some(callback) = &self.on_error {
                callback(error);
            }
        }
        for message in &effects.messages {
            if self.registry.dispatch(message) == 0 {
                debug!("[Manager] No handler for {}", message.destination);
            }
        }
    }
}

/// Consume signals until the manager is gone
async fn run_dispatcher(shared: Weak<Shared>, mut signals: UnboundedReceiver<Signal>) {
    while let Some(signal) = signals.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.on_signal(signal);
    }
    debug!("[Manager] Dispatcher exiting");
}

/// Builder for [`ConnectionManager`]
#[derive(Default)]
pub struct ConnectionManagerBuilder {
    connector: Option<Arc<dyn Connector>>,
    strategy: Option<Arc<dyn ReconnectionStrategy>>,
    on_connect: Option<ConnectCallback>,
    on_error: Option<ErrorCallback>,
    runtime: Option<Handle>,
}

impl ConnectionManagerBuilder {
    /// Transport factory (defaults to [`StompConnector`])
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Override the fixed-delay policy derived from each `ConnectionConfig`
    pub fn reconnect_strategy(mut self, strategy: impl ReconnectionStrategy + 'static) -> Self {
        self.strategy = Some(Arc::new(strategy));
        self
    }

    /// Called after every successful connect
    pub fn on_connect(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    /// Called with every fatal error
    pub fn on_error(
        mut self,
        callback: impl Fn(&PushSocketError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Runtime for the dispatcher and timers (defaults to the current one)
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<ConnectionManager> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| {
                PushSocketError::Configuration("ConnectionManager needs a tokio runtime".into())
            })?,
        };
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(StompConnector::with_handle(runtime.clone())));

        let (signal_tx, signal_rx) = unbounded_channel();
        let (event_tx, event_rx) = bounded(EVENT_QUEUE_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                config: None,
                transport: None,
                generation: 0,
                reconnect_attempts: 0,
                timer: None,
                next_timer_id: 0,
                last_error: None,
            }),
            state: AtomicConnectionState::new(ConnectionState::Disconnected),
            state_tx,
            registry: SubscriptionRegistry::new(),
            connector,
            strategy: self.strategy,
            on_connect: self.on_connect,
            on_error: self.on_error,
            signal_tx,
            event_tx,
            event_rx,
            runtime: runtime.clone(),
        });

        runtime.spawn(run_dispatcher(Arc::downgrade(&shared), signal_rx));
        Ok(ConnectionManager { shared })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RefusingConnector;

    impl Connector for RefusingConnector {
        fn open(&self, _: OpenRequest, _: EventSink) -> Result<Box<dyn Transport>> {
            Err(PushSocketError::Configuration("refused".into()))
        }
    }

    #[test]
    fn test_build_without_runtime_fails() {
        assert!(matches!(
            ConnectionManager::builder().build(),
            Err(PushSocketError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_scheme_fails_without_retry() {
        let manager = ConnectionManager::builder()
            .connector(RefusingConnector)
            .build()
            .unwrap();
        manager.connect(ConnectionConfig::new("ftp://broker", "t"));
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert!(!manager.has_pending_reconnect());
        assert!(matches!(
            manager.connection_error(),
            Some(PushSocketError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_connector_configuration_error_is_fatal() {
        let manager = ConnectionManager::builder()
            .connector(RefusingConnector)
            .build()
            .unwrap();
        manager.connect(ConnectionConfig::new("wss://broker/ws", "t"));
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(manager.reconnect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let manager = ConnectionManager::builder()
            .connector(RefusingConnector)
            .build()
            .unwrap();
        assert_eq!(
            manager.send("/app/x", "{}"),
            Err(PushSocketError::NotConnected)
        );
    }
}
