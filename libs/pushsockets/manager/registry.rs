use crate::core::envelope::InboundMessage;
use crate::traits::SubscriptionId;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Callback invoked for every message delivered to a subscription
pub type MessageHandler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

struct Entry {
    destination: String,
    handler: MessageHandler,
    /// Whether the broker currently knows about this subscription
    active: bool,
}

/// Caller-authored subscriptions that outlive individual transports
///
/// Entries keep their id for their whole life; the id is reused as the
/// broker-side subscription id every time the entry is (re)activated.
/// Handlers are cloned out and run without the lock held.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<BTreeMap<SubscriptionId, Entry>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription; it starts inactive
    pub fn add(&self, destination: impl Into<String>, handler: MessageHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let destination = destination.into();
        debug!("[Registry] Added {} for {}", id, destination);
        self.entries.write().insert(
            id,
            Entry {
                destination,
                handler,
                active: false,
            },
        );
        id
    }

    /// Remove a subscription, returning whether it was active
    pub fn remove(&self, id: SubscriptionId) -> Option<bool> {
        self.entries.write().remove(&id).map(|entry| entry.active)
    }

    /// Every registered subscription as `(id, destination)`, in registration order
    pub fn snapshot(&self) -> Vec<(SubscriptionId, String)> {
        self.entries
            .read()
            .iter()
            .map(|(id, entry)| (*id, entry.destination.clone()))
            .collect()
    }

    pub fn set_active(&self, id: SubscriptionId, active: bool) {
        if let Some(entry) = self.entries.write().get_mut(&id) {
            entry.active = active;
        }
    }

    pub fn is_active(&self, id: SubscriptionId) -> bool {
        self.entries.read().get(&id).is_some_and(|e| e.active)
    }

    /// Mark every entry inactive; called when a transport goes away
    pub fn deactivate_all(&self) {
        for entry in self.entries.write().values_mut() {
            entry.active = false;
        }
    }

    /// Deliver a message to the subscriptions it is addressed to
    ///
    /// A message naming one of our subscription ids goes to that entry only;
    /// the broker sends one copy per subscription. Without an id it goes to
    /// every active entry on its destination. Returns the number of handlers
    /// invoked.
    pub fn dispatch(&self, message: &InboundMessage) -> usize {
        let handlers: Vec<MessageHandler> = {
            let entries = self.entries.read();
            match message.subscription {
                Some(id) => entries
                    .get(&id)
                    .filter(|e| e.active)
                    .map(|e| Arc::clone(&e.handler))
                    .into_iter()
                    .collect(),
                None => entries
                    .values()
                    .filter(|e| e.active && e.destination == message.destination)
                    .map(|e| Arc::clone(&e.handler))
                    .collect(),
            }
        };

        for handler in &handlers {
            handler(message);
        }
        handlers.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn active_count(&self) -> usize {
        self.entries.read().values().filter(|e| e.active).count()
    }
}
