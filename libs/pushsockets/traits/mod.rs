//! # PushSockets Traits
//!
//! Core traits and types shared by the transport layer and the connection
//! manager:
//!
//! - **Connector / Transport**: open a broker connection and drive it
//! - **TokenProvider**: supply the bearer token the manager consumes
//! - **ReconnectionStrategy**: decide whether and when to retry
//! - **PushSocketError**: the error taxonomy, including auth classification
//!
//! ## Example
//!
//! ```rust,ignore
//! use pushsockets::traits::*;
//!
//! struct LoopbackConnector;
//!
//! impl Connector for LoopbackConnector {
//!     fn open(&self, request: OpenRequest, events: EventSink) -> Result<Box<dyn Transport>> {
//!         events.emit(TransportEvent::Connected);
//!         Ok(Box::new(LoopbackTransport::new(events)))
//!     }
//! }
//! ```

pub mod auth;
pub mod error;
pub mod reconnect;
pub mod transport;

// Re-export commonly used types
pub use auth::{bearer, EnvToken, StaticToken, TokenProvider, AUTHORIZATION_HEADER};
pub use error::{is_auth_failure, PushSocketError, Result};
pub use reconnect::{FailureClass, FixedDelay, ReconnectDecision, ReconnectionStrategy};
pub use transport::{
    Connector, EventSink, OpenRequest, SubscriptionId, Transport, TransportEvent,
};
