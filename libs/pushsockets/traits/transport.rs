use super::error::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Identifier of a registered subscription
///
/// Allocated by the subscription registry and reused as the broker-side
/// subscription id (`sub-<n>`) every time the subscription is activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

impl SubscriptionId {
    /// Parse the broker-side form (`sub-<n>`); foreign ids yield `None`
    pub fn parse(value: &str) -> Option<Self> {
        value.strip_prefix("sub-")?.parse().ok().map(Self)
    }
}

/// Events a transport reports back to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker accepted the session
    Connected,
    /// The channel closed without an error
    Disconnected,
    /// A frame arrived for a destination
    ///
    /// `subscription` is the id from the frame's `subscription` header, when
    /// the broker sent one we issued.
    Message {
        destination: String,
        subscription: Option<SubscriptionId>,
        body: String,
    },
    /// The broker sent a failure frame
    ProtocolError(String),
    /// The socket failed (I/O error, handshake failure, heartbeat silence)
    TransportError(String),
}

/// Everything a connector needs to open one transport
#[derive(Clone)]
pub struct OpenRequest {
    /// Broker endpoint (`ws://`, `wss://`, `http://` or `https://`)
    pub url: String,
    /// Full `Authorization` header value (`Bearer <token>`)
    pub authorization: String,
    /// Interval we expect to hear from the broker (zero disables)
    pub heartbeat_incoming: Duration,
    /// Interval we promise to send keep-alives (zero disables)
    pub heartbeat_outgoing: Duration,
    /// Upper bound on channel negotiation
    pub connect_timeout: Duration,
}

impl fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenRequest")
            .field("url", &self.url)
            .field("authorization", &"<redacted>")
            .field("heartbeat_incoming", &self.heartbeat_incoming)
            .field("heartbeat_outgoing", &self.heartbeat_outgoing)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Callback sink a transport reports its events into
///
/// The sink is bound to one transport instance when it is created, so events
/// from a transport that has since been replaced can be recognised and dropped
/// by the receiver.
#[derive(Clone)]
pub struct EventSink {
    emit: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl EventSink {
    pub fn new(emit: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self {
            emit: Arc::new(emit),
        }
    }

    /// Report an event; never blocks
    #[inline]
    pub fn emit(&self, event: TransportEvent) {
        (self.emit)(event)
    }
}

/// A live, opened transport
///
/// All operations are fire-and-forget: they queue work for the transport's
/// I/O task and return immediately.
pub trait Transport: Send + Sync {
    /// Activate a subscription on the broker
    fn subscribe(&self, id: SubscriptionId, destination: &str) -> Result<()>;

    /// Deactivate a subscription on the broker
    fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    /// Send a message body to a destination
    fn send(&self, destination: &str, body: &str) -> Result<()>;

    /// Tear the transport down; errors are swallowed
    fn close(&self);
}

/// Factory for transports
///
/// `open` must not block on network I/O. It returns a handle immediately and
/// reports the outcome of the connection attempt through `events`.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, request: OpenRequest, events: EventSink) -> Result<Box<dyn Transport>>;
}
