//! Rule Notify - Main Library
//!
//! Push-notification listener for rule deployment results and execution
//! updates delivered over a STOMP broker.
//!
//! ## Architecture
//!
//! - **bin_common**: Common utilities for binary executables (CLI, config, logging, runners)
//! - **pushsockets**: Reconnecting STOMP client (re-exported from workspace)
//!
//! ## Usage in Binaries
//!
//! ```rust,ignore
//! use rule_notify::bin_common::{load_config_from_env, ConfigType, ListenerConfig};
//! use rule_notify::pushsockets::ConnectionManager;
//! ```

// Re-export workspace libraries for convenience
pub use pushsockets;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables
    //!
    //! Configuration loading, tracing setup and the run/shutdown scaffolding
    //! shared by every binary.

    pub mod cli;
    pub mod config;
    pub mod logging;
    pub mod runner;

    pub use cli::{config_type_from_args, load_config_from_env, parse_args, ConfigType};
    pub use config::{ConfigError, ListenerConfig};
    pub use logging::init_tracing;
    pub use runner::{BinaryRunner, RunConfig, ShutdownSignal};
}
