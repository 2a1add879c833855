//! Retained-message store seam.
//!
//! Retained messages live in a per-vhost service shared by every
//! connection on that vhost. `retain` and `clear` are casts; `fetch` is a
//! call made while replaying retained state to a new subscriber.

use mqtt3_protocol::PublishPacket;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// One vhost's retained-message store.
pub trait RetainedStore: Send + Sync {
    /// Replace the retained message for `topic`.
    fn retain(&self, topic: &str, message: &PublishPacket);

    /// Drop any retained message for `topic`.
    fn clear(&self, topic: &str);

    /// Retained messages matching `topic` (exact-name match; wildcard
    /// filters return nothing).
    fn fetch<'a>(
        &'a self,
        topic: &'a str,
    ) -> Pin<Box<dyn Future<Output = Vec<PublishPacket>> + Send + 'a>>;
}

/// Lookup of the per-vhost stores.
pub trait RetainedStores: Send + Sync {
    fn for_vhost(&self, vhost: &str) -> Arc<dyn RetainedStore>;
}

/// Retained store backed by process memory.
#[derive(Default)]
pub struct InMemoryRetainedStore {
    messages: Mutex<HashMap<String, PublishPacket>>,
}

impl InMemoryRetainedStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

impl RetainedStore for InMemoryRetainedStore {
    fn retain(&self, topic: &str, message: &PublishPacket) {
        self.messages
            .lock()
            .insert(topic.to_string(), message.clone());
    }

    fn clear(&self, topic: &str) {
        self.messages.lock().remove(topic);
    }

    fn fetch<'a>(
        &'a self,
        topic: &'a str,
    ) -> Pin<Box<dyn Future<Output = Vec<PublishPacket>> + Send + 'a>> {
        let found = self.messages.lock().get(topic).cloned();
        Box::pin(async move { found.into_iter().collect() })
    }
}

/// Per-vhost store registry backed by process memory; stores are created
/// on first use.
#[derive(Default)]
pub struct InMemoryRetainedStores {
    stores: Mutex<HashMap<String, Arc<InMemoryRetainedStore>>>,
}

impl InMemoryRetainedStores {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The concrete store for a vhost, for seeding retained state in tests.
    #[must_use]
    pub fn store(&self, vhost: &str) -> Arc<InMemoryRetainedStore> {
        Arc::clone(
            self.stores
                .lock()
                .entry(vhost.to_string())
                .or_default(),
        )
    }
}

impl RetainedStores for InMemoryRetainedStores {
    fn for_vhost(&self, vhost: &str) -> Arc<dyn RetainedStore> {
        self.store(vhost)
    }
}
