//! # PushSockets
//!
//! A reconnecting STOMP client for push notifications from a message broker.
//!
//! ## Features
//!
//! - **Connection manager**: one live transport, bounded fixed-delay retries,
//!   authentication failures classified as fatal
//! - **Durable subscriptions**: registered once, replayed after every reconnect
//! - **Fallback transports**: raw WebSocket, SockJS over WebSocket, SockJS xhr-streaming
//! - **Heart-beating**: STOMP heart-beat negotiation with half-open detection
//! - **Pluggable seams**: `Connector`, `TokenProvider` and `ReconnectionStrategy` traits
//!
//! ## Example
//!
//! ```rust,ignore
//! use pushsockets::{ConnectionConfig, ConnectionManager, EnvToken};
//!
//! #[tokio::main]
//! async fn main() -> pushsockets::Result<()> {
//!     let manager = ConnectionManager::builder()
//!         .on_error(|e| eprintln!("session failed: {e}"))
//!         .build()?;
//!
//!     let rules = manager.subscribe("/topic/rules", |message| {
//!         println!("{:?}: {}", message.kind(), message.body);
//!     });
//!
//!     let config = ConnectionConfig::from_provider(
//!         "https://rules.example.com/ws",
//!         &EnvToken::new("BROKER_TOKEN"),
//!     )
//!     .await;
//!     manager.connect(config);
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     rules.unsubscribe();
//!     manager.disconnect();
//!     Ok(())
//! }
//! ```

pub mod traits;
pub mod core;
pub mod manager;

// Re-export all traits
pub use traits::*;

// Re-export core functionality
pub use crate::core::{
    channel, config, connection_state, envelope, heartbeat, liveness, sockjs, stomp, transport,
    config::ConnectionConfig,
    connection_state::{AtomicConnectionState, ConnectionState},
    envelope::{Envelope, InboundMessage},
    transport::{StompConnector, StompTransport},
};

// Re-export manager
pub use crate::manager::{
    ConnectionManager, ConnectionManagerBuilder, ManagerEvent, Subscription, SubscriptionRegistry,
};
