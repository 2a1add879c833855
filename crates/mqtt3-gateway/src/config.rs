//! Gateway configuration.

use serde::{Deserialize, Serialize};

fn default_exchange() -> String {
    "amq.topic".to_string()
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_user() -> Option<String> {
    Some("guest".to_string())
}

fn default_prefetch() -> u16 {
    10
}

fn default_allow_anonymous() -> bool {
    true
}

/// Static configuration for the MQTT front end.
///
/// The two vhost mapping tables (`mqtt_default_vhosts`,
/// `mqtt_port_to_vhost_mapping`) are runtime parameters and live behind
/// [`crate::params::ParameterStore`] instead.
#[derive(Clone, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct GatewayConfig {
    /// AMQP exchange used for every binding and publish.
    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// Default virtual host when no other vhost source matches.
    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// Fallback login for anonymous connections.
    #[serde(default = "default_user")]
    pub default_user: Option<String>,
    #[serde(default = "default_user")]
    pub default_pass: Option<String>,

    /// Whether a CONNECT without credentials may fall back to the default
    /// login.
    #[serde(default = "default_allow_anonymous")]
    pub allow_anonymous: bool,

    /// Accept the TLS certificate common name as the username when no
    /// credentials are supplied.
    #[serde(default)]
    pub ssl_cert_login: bool,

    /// Disable the `vhost:username` split on colons in the username.
    #[serde(default)]
    pub ignore_colons_in_username: bool,

    /// Consumer prefetch applied to the subscription channel.
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,

    /// Expiry (`x-expires`, milliseconds) for the durable QoS-1 queue of
    /// persistent sessions. `None` keeps the queue forever.
    #[serde(default)]
    pub subscription_ttl_ms: Option<u64>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            exchange: default_exchange(),
            vhost: default_vhost(),
            default_user: default_user(),
            default_pass: default_user(),
            allow_anonymous: default_allow_anonymous(),
            ssl_cert_login: false,
            ignore_colons_in_username: false,
            prefetch: default_prefetch(),
            subscription_ttl_ms: None,
        }
    }
}

impl GatewayConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    #[must_use]
    pub fn with_vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = vhost.into();
        self
    }

    #[must_use]
    pub fn with_default_login(
        mut self,
        user: impl Into<String>,
        pass: impl Into<String>,
    ) -> Self {
        self.default_user = Some(user.into());
        self.default_pass = Some(pass.into());
        self
    }

    #[must_use]
    pub fn with_allow_anonymous(mut self, allow: bool) -> Self {
        self.allow_anonymous = allow;
        self
    }

    #[must_use]
    pub fn with_ssl_cert_login(mut self, enabled: bool) -> Self {
        self.ssl_cert_login = enabled;
        self
    }

    #[must_use]
    pub fn with_ignore_colons_in_username(mut self, ignore: bool) -> Self {
        self.ignore_colons_in_username = ignore;
        self
    }

    #[must_use]
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    #[must_use]
    pub fn with_subscription_ttl_ms(mut self, ttl_ms: Option<u64>) -> Self {
        self.subscription_ttl_ms = ttl_ms;
        self
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("exchange", &self.exchange)
            .field("vhost", &self.vhost)
            .field("default_user", &self.default_user)
            .field("default_pass", &self.default_pass.as_ref().map(|_| "..."))
            .field("allow_anonymous", &self.allow_anonymous)
            .field("ssl_cert_login", &self.ssl_cert_login)
            .field(
                "ignore_colons_in_username",
                &self.ignore_colons_in_username,
            )
            .field("prefetch", &self.prefetch)
            .field("subscription_ttl_ms", &self.subscription_ttl_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.exchange, "amq.topic");
        assert_eq!(config.vhost, "/");
        assert_eq!(config.default_user.as_deref(), Some("guest"));
        assert!(config.allow_anonymous);
        assert!(!config.ssl_cert_login);
        assert_eq!(config.prefetch, 10);
        assert_eq!(config.subscription_ttl_ms, None);
    }

    #[test]
    fn test_builders() {
        let config = GatewayConfig::new()
            .with_exchange("mqtt.topic")
            .with_vhost("iot")
            .with_prefetch(50)
            .with_subscription_ttl_ms(Some(86_400_000));
        assert_eq!(config.exchange, "mqtt.topic");
        assert_eq!(config.vhost, "iot");
        assert_eq!(config.prefetch, 50);
        assert_eq!(config.subscription_ttl_ms, Some(86_400_000));
    }

    #[test]
    fn test_debug_hides_default_pass() {
        let config = GatewayConfig::new().with_default_login("svc", "hunter2");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
