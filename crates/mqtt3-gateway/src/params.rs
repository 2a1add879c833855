//! Runtime-parameter lookup.
//!
//! The two vhost mapping tables can be changed while the broker is running,
//! so the gateway reads them through a seam instead of carrying them in
//! [`crate::config::GatewayConfig`].

use parking_lot::Mutex;
use std::collections::HashMap;

/// Snapshot of the vhost mapping tables, fetched once per CONNECT.
#[derive(Debug, Clone, Default)]
pub struct VhostMappings {
    /// `mqtt_default_vhosts`: TLS certificate common name to vhost.
    pub default_vhosts: HashMap<String, String>,
    /// `mqtt_port_to_vhost_mapping`: listener port (as a string) to vhost.
    pub port_to_vhost: HashMap<String, String>,
}

pub trait ParameterStore: Send + Sync {
    fn vhost_mappings(&self) -> VhostMappings;
}

/// Parameter store backed by process memory.
#[derive(Default)]
pub struct InMemoryParameters {
    mappings: Mutex<VhostMappings>,
}

impl InMemoryParameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default_vhost(&self, common_name: impl Into<String>, vhost: impl Into<String>) {
        self.mappings
            .lock()
            .default_vhosts
            .insert(common_name.into(), vhost.into());
    }

    pub fn set_port_to_vhost(&self, port: u16, vhost: impl Into<String>) {
        self.mappings
            .lock()
            .port_to_vhost
            .insert(port.to_string(), vhost.into());
    }
}

impl ParameterStore for InMemoryParameters {
    fn vhost_mappings(&self) -> VhostMappings {
        self.mappings.lock().clone()
    }
}
