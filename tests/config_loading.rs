//! Integration test: Configuration utilities
//!
//! Tests config path resolution and YAML loading for the listener.

use rule_notify::bin_common::{load_config_from_env, ConfigError, ConfigType, ListenerConfig};
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_listener_config_default() {
    env::remove_var("LISTENER_CONFIG_PATH");

    let config_path = load_config_from_env(ConfigType::Listener);
    assert_eq!(config_path.to_str().unwrap(), "config/listener.yaml");
}

#[test]
fn test_custom_config() {
    let custom = ConfigType::Custom("custom/path.yaml".to_string());
    let config_path = load_config_from_env(custom);

    assert_eq!(config_path.to_str().unwrap(), "custom/path.yaml");
}

#[test]
fn test_bundled_config_is_valid() {
    let config = ListenerConfig::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config/listener.yaml"))
        .unwrap();

    assert_eq!(config.destinations, vec!["/topic/rules", "/topic/executions"]);
    assert_eq!(config.token_env, "BROKER_TOKEN");
    assert!(config.broker.token.is_empty());
}

#[test]
fn test_broker_url_override() {
    let file = write_config(
        r#"
broker:
  url: "wss://from-file.example.com/ws"
  max_reconnect_attempts: 3
destinations: ["/topic/rules"]
"#,
    );

    env::remove_var("BROKER_URL");
    let config = ListenerConfig::load(file.path()).unwrap();
    assert_eq!(config.broker.url, "wss://from-file.example.com/ws");
    assert_eq!(config.broker.max_reconnect_attempts, 3);

    env::set_var("BROKER_URL", "https://from-env.example.com/ws");
    let config = ListenerConfig::load(file.path());
    env::remove_var("BROKER_URL");
    assert_eq!(config.unwrap().broker.url, "https://from-env.example.com/ws");
}

#[test]
fn test_missing_file() {
    let result = ListenerConfig::load("does/not/exist.yaml");
    assert!(matches!(result, Err(ConfigError::FileError(_))));
}

#[test]
fn test_malformed_yaml() {
    let file = write_config("broker: [not, a, map]\ndestinations: []\n");
    assert!(matches!(
        ListenerConfig::load(file.path()),
        Err(ConfigError::YamlError(_))
    ));
}

#[test]
fn test_empty_destinations_rejected() {
    let file = write_config(
        r#"
broker:
  url: "wss://broker.example.com/ws"
destinations: []
"#,
    );
    assert!(matches!(
        ListenerConfig::load(file.path()),
        Err(ConfigError::ValidationError(_))
    ));
}

#[tokio::test]
async fn test_connection_config_reads_token() {
    let file = write_config(
        r#"
broker:
  url: "wss://broker.example.com/ws"
destinations: ["/topic/rules"]
token_env: "RULE_NOTIFY_CONFIG_TEST_TOKEN"
"#,
    );
    let config = ListenerConfig::load(file.path()).unwrap();

    env::set_var("RULE_NOTIFY_CONFIG_TEST_TOKEN", "  abc123 ");
    let connection = config.connection_config().await.unwrap();
    env::remove_var("RULE_NOTIFY_CONFIG_TEST_TOKEN");

    assert_eq!(connection.token, "abc123");
    assert!(connection.is_usable());
}
