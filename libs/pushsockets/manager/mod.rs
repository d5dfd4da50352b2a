//! # PushSockets Manager
//!
//! The reconnecting connection manager and the subscription registry that
//! outlives individual transports.

pub mod manager;
pub mod registry;

pub use manager::{
    ConnectCallback, ConnectionManager, ConnectionManagerBuilder, ErrorCallback, ManagerEvent,
    Subscription,
};
pub use registry::{MessageHandler, SubscriptionRegistry};
