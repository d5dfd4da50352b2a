//! CLI utilities for binaries
//!
//! Resolves which configuration file a binary should load.

use std::path::PathBuf;

/// Type of configuration to load
#[derive(Debug, Clone)]
pub enum ConfigType {
    /// Event listener configuration (config/listener.yaml)
    Listener,
    /// Explicit path, e.g. from the command line
    Custom(String),
}

impl ConfigType {
    /// Get the default path for this config type
    pub fn default_path(&self) -> &str {
        match self {
            ConfigType::Listener => "config/listener.yaml",
            ConfigType::Custom(path) => path,
        }
    }

    /// Get the environment variable that overrides the default path
    pub fn env_var_name(&self) -> Option<&str> {
        match self {
            ConfigType::Listener => Some("LISTENER_CONFIG_PATH"),
            ConfigType::Custom(_) => None,
        }
    }
}

/// Load configuration path from environment or use default
///
/// A `Custom` path is returned as given; other types consult their
/// environment variable first.
///
/// # Examples
/// ```
/// use rule_notify::bin_common::{load_config_from_env, ConfigType};
///
/// let path = load_config_from_env(ConfigType::Custom("listener.yaml".into()));
/// assert_eq!(path.to_str(), Some("listener.yaml"));
/// ```
pub fn load_config_from_env(config_type: ConfigType) -> PathBuf {
    config_type
        .env_var_name()
        .and_then(|var| std::env::var(var).ok())
        .unwrap_or_else(|| config_type.default_path().to_string())
        .into()
}

/// Parse command line arguments for a binary
///
/// Returns a vector of arguments (excluding the program name)
pub fn parse_args() -> Vec<String> {
    std::env::args().skip(1).collect()
}

/// Config type selected by the first CLI argument, if any
pub fn config_type_from_args(args: &[String]) -> ConfigType {
    match args.first() {
        Some(path) if !path.starts_with('-') => ConfigType::Custom(path.clone()),
        _ => ConfigType::Listener,
    }
}
