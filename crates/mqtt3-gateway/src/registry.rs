//! Cluster-wide client-id registry seam.

use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

/// Registration of connected client ids, shared process-wide.
pub trait ClientRegistry: Send + Sync {
    fn register<'a>(
        &'a self,
        client_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn unregister<'a>(
        &'a self,
        client_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Registry backed by process memory.
#[derive(Default)]
pub struct InMemoryRegistry {
    clients: Mutex<HashSet<String>>,
}

impl InMemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.lock().contains(client_id)
    }
}

impl ClientRegistry for InMemoryRegistry {
    fn register<'a>(
        &'a self,
        client_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        self.clients.lock().insert(client_id.to_string());
        Box::pin(async { Ok(()) })
    }

    fn unregister<'a>(
        &'a self,
        client_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        self.clients.lock().remove(client_id);
        Box::pin(async { Ok(()) })
    }
}
