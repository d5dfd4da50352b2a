//! Event Listener
//!
//! Connects to the notification broker, subscribes to the configured
//! destinations and logs every rule deployment / execution update it
//! receives. Reconnects on its own; exits when the session fails for good
//! (rejected token or retries exhausted) or on Ctrl+C.
//!
//! Usage:
//!   BROKER_TOKEN=... cargo run --bin event-listener [config.yaml]

use anyhow::{anyhow, Context, Result};
use rule_notify::bin_common::{
    config_type_from_args, init_tracing, load_config_from_env, parse_args, BinaryRunner,
    ListenerConfig, RunConfig, ShutdownSignal,
};
use rule_notify::pushsockets::{
    ConnectionManager, ConnectionState, InboundMessage, ManagerEvent, Subscription,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

struct EventListener {
    run_config: RunConfig,
    config: ListenerConfig,
    shutdown: ShutdownSignal,
    received: Arc<AtomicU64>,
}

impl EventListener {
    fn new(config: ListenerConfig, shutdown: ShutdownSignal) -> Self {
        let run_config =
            RunConfig::new("Event Listener").with_status_interval(config.status_interval_secs);
        Self {
            run_config,
            config,
            shutdown,
            received: Arc::new(AtomicU64::new(0)),
        }
    }

    fn subscribe_all(&self, manager: &ConnectionManager) -> Vec<Subscription> {
        self.config
            .destinations
            .iter()
            .map(|destination| {
                let received = Arc::clone(&self.received);
                manager.subscribe(destination.clone(), move |message| {
                    received.fetch_add(1, Ordering::Relaxed);
                    log_message(message);
                })
            })
            .collect()
    }
}

fn log_message(message: &InboundMessage) {
    match &message.envelope {
        Some(envelope) => info!(
            "[Listener] {} {} {}",
            message.destination, envelope.kind, envelope.payload
        ),
        None => warn!(
            "[Listener] Unrecognised body on {}: {}",
            message.destination, message.body
        ),
    }
}

fn log_event(event: &ManagerEvent) {
    match event {
        ManagerEvent::StateChanged(state) => debug!("[Listener] State -> {}", state),
        ManagerEvent::Error(e) => warn!("[Listener] {}", e),
        ManagerEvent::ReconnectScheduled { attempt, delay } => {
            info!("[Listener] Reconnect attempt {} in {:?}", attempt, delay)
        }
    }
}

impl BinaryRunner for EventListener {
    async fn run(&mut self) -> Result<()> {
        let manager = ConnectionManager::builder()
            .on_connect(|| info!("[Listener] Connected to broker"))
            .on_error(|e| error!("[Listener] Session failed: {}", e))
            .build()?;

        let subscriptions = self.subscribe_all(&manager);
        info!("[Listener] Registered {} subscriptions", subscriptions.len());

        let connection = self.config.connection_config().await?;
        let events = manager.events();
        let mut state_rx = manager.watch_state();
        let mut status = tokio::time::interval(self.run_config.status_interval());

        manager.connect(connection);

        let outcome = loop {
            if !self.shutdown.is_running() {
                break Ok(());
            }
            tokio::select! {
                _ = self.shutdown.wait() => break Ok(()),
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                    events.try_iter().for_each(|event| log_event(&event));
                    if *state_rx.borrow_and_update() == ConnectionState::Failed {
                        match manager.connection_error() {
                            Some(e) => break Err::<(), _>(e).context("broker session failed"),
                            None => break Err(anyhow!("broker session failed")),
                        }
                    }
                }
                _ = status.tick() => {
                    events.try_iter().for_each(|event| log_event(&event));
                    info!(
                        "[Listener] Status: {} | subscriptions: {} | received: {} | retries: {}",
                        manager.state(),
                        manager.subscription_count(),
                        self.received.load(Ordering::Relaxed),
                        manager.reconnect_attempts()
                    );
                }
            }
        };

        for subscription in &subscriptions {
            subscription.unsubscribe();
        }
        manager.disconnect();
        outcome
    }

    fn config(&self) -> &RunConfig {
        &self.run_config
    }

    fn stats(&self) -> Option<String> {
        Some(format!(
            "Messages received: {}",
            self.received.load(Ordering::Relaxed)
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = parse_args();
    let config_path = load_config_from_env(config_type_from_args(&args));
    let config = ListenerConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    init_tracing(&config.log_level);
    config.log();

    let shutdown = ShutdownSignal::new();
    shutdown.spawn_ctrl_c_handler();

    let mut listener = EventListener::new(config, shutdown);
    listener.execute().await
}
