//! # PushSockets Core
//!
//! Wire protocols and the STOMP transport:
//!
//! - **stomp**: STOMP 1.2 frame codec
//! - **sockjs**: SockJS framing and per-session endpoint URLs
//! - **channel**: WebSocket / SockJS channel negotiation with xhr-streaming fallback
//! - **heartbeat** and **liveness**: heart-beat negotiation and half-open detection
//! - **transport**: [`StompConnector`], the production [`Connector`](crate::traits::Connector)
//!
//! ## Example
//!
//! ```rust,ignore
//! use pushsockets::{ConnectionConfig, ConnectionManager, StompConnector};
//!
//! let manager = ConnectionManager::builder()
//!     .connector(StompConnector::new())
//!     .build();
//! manager.connect(ConnectionConfig::new("https://rules.example.com/ws", token));
//! ```

pub mod channel;
pub mod config;
pub mod connection_state;
pub mod envelope;
pub mod heartbeat;
pub mod liveness;
pub mod sockjs;
pub mod stomp;
pub mod transport;

// Re-export main types
pub use channel::{ChannelKind, FrameChannel};
pub use config::ConnectionConfig;
pub use connection_state::{AtomicConnectionState, ConnectionState};
pub use envelope::{Envelope, InboundMessage};
pub use heartbeat::{HeartbeatSchedule, HEARTBEAT_GRACE_FACTOR};
pub use liveness::LivenessTracker;
pub use transport::{StompConnector, StompTransport};
