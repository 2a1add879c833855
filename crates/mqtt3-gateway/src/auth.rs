//! Credential and vhost resolution, plus the access-control seam.
//!
//! [`resolve_login`] is a pure function: everything it needs (config and
//! the runtime vhost mappings) comes in as arguments, so identical inputs
//! always yield identical results.

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::params::VhostMappings;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

/// Authenticated broker user backing an accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub username: String,
}

impl AuthUser {
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

/// Authentication outcome carried by the processor after CONNECT.
#[derive(Debug, Clone)]
pub struct AuthState {
    pub user: AuthUser,
    pub username: String,
    pub vhost: String,
}

/// Why credential selection failed. The two cases map to the same CONNACK
/// code but are logged distinctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsError {
    /// No username/password and no fallback source produced a login.
    Missing,
    /// Exactly one of username/password was supplied.
    Invalid,
}

/// Which rule picked the vhost; surfaces in connection logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VhostStrategy {
    VhostInUsernameOrDefault,
    PortToVhostMapping,
    CertToVhostMapping,
    DefaultVhost,
}

impl VhostStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            VhostStrategy::VhostInUsernameOrDefault => "vhost_in_username_or_default",
            VhostStrategy::PortToVhostMapping => "port_to_vhost_mapping",
            VhostStrategy::CertToVhostMapping => "cert_to_vhost_mapping",
            VhostStrategy::DefaultVhost => "default_vhost",
        }
    }
}

/// A resolved broker login. `password: None` marks a TLS certificate login
/// with no password to present.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedLogin {
    pub vhost: String,
    pub username: String,
    pub password: Option<Vec<u8>>,
    pub strategy: VhostStrategy,
}

impl std::fmt::Debug for ResolvedLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedLogin")
            .field("vhost", &self.vhost)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("strategy", &self.strategy.as_str())
            .finish()
    }
}

/// Map a CONNECT's credentials, the TLS certificate name and the listener
/// port to a broker login.
///
/// # Errors
///
/// Returns [`CredentialsError`] when no usable credential source exists;
/// CONNECT turns both cases into a `bad-username-or-password` CONNACK.
pub fn resolve_login(
    username: Option<&str>,
    password: Option<&[u8]>,
    cert_login_name: Option<&str>,
    listener_port: u16,
    config: &GatewayConfig,
    mappings: &VhostMappings,
) -> std::result::Result<ResolvedLogin, CredentialsError> {
    let (username, password) = select_credentials(username, password, cert_login_name, config)?;
    let (vhost, username, strategy) =
        select_vhost(&username, cert_login_name, listener_port, config, mappings);
    Ok(ResolvedLogin {
        vhost,
        username,
        password,
        strategy,
    })
}

/// Credential selection, first match wins: explicit username+password, then
/// certificate login, then the anonymous default login.
fn select_credentials(
    username: Option<&str>,
    password: Option<&[u8]>,
    cert_login_name: Option<&str>,
    config: &GatewayConfig,
) -> std::result::Result<(String, Option<Vec<u8>>), CredentialsError> {
    match (username, password) {
        (Some(user), Some(pass)) => Ok((user.to_string(), Some(pass.to_vec()))),
        (Some(_), None) | (None, Some(_)) => Err(CredentialsError::Invalid),
        (None, None) => {
            if config.ssl_cert_login {
                if let Some(name) = cert_login_name {
                    return Ok((name.to_string(), None));
                }
            }
            if config.allow_anonymous {
                if let (Some(user), Some(pass)) = (&config.default_user, &config.default_pass) {
                    return Ok((user.clone(), Some(pass.clone().into_bytes())));
                }
            }
            Err(CredentialsError::Missing)
        }
    }
}

fn select_vhost(
    username: &str,
    cert_login_name: Option<&str>,
    listener_port: u16,
    config: &GatewayConfig,
    mappings: &VhostMappings,
) -> (String, String, VhostStrategy) {
    match cert_login_name {
        None => select_vhost_no_cert(username, listener_port, config, mappings),
        Some(name) => {
            if let Some(vhost) = mappings.default_vhosts.get(name) {
                return (
                    vhost.clone(),
                    username.to_string(),
                    VhostStrategy::CertToVhostMapping,
                );
            }
            if let Some(vhost) = port_mapping(listener_port, mappings) {
                return (vhost, username.to_string(), VhostStrategy::PortToVhostMapping);
            }
            // Fall back to the username-split-or-default rule; with a
            // certificate present the fallback keeps that single tag.
            let (vhost, username) = split_vhost_username(username, config);
            (vhost, username, VhostStrategy::VhostInUsernameOrDefault)
        }
    }
}

fn select_vhost_no_cert(
    username: &str,
    listener_port: u16,
    config: &GatewayConfig,
    mappings: &VhostMappings,
) -> (String, String, VhostStrategy) {
    if vhost_in_username(username, config) {
        let (vhost, username) = split_vhost_username(username, config);
        return (vhost, username, VhostStrategy::VhostInUsernameOrDefault);
    }
    if let Some(vhost) = port_mapping(listener_port, mappings) {
        return (vhost, username.to_string(), VhostStrategy::PortToVhostMapping);
    }
    (
        config.vhost.clone(),
        username.to_string(),
        VhostStrategy::DefaultVhost,
    )
}

fn vhost_in_username(username: &str, config: &GatewayConfig) -> bool {
    !config.ignore_colons_in_username && username.contains(':')
}

/// Split `vhost:username` at the last colon; usernames themselves may
/// contain colons.
fn split_vhost_username(username: &str, config: &GatewayConfig) -> (String, String) {
    if vhost_in_username(username, config) {
        if let Some(idx) = username.rfind(':') {
            return (username[..idx].to_string(), username[idx + 1..].to_string());
        }
    }
    (config.vhost.clone(), username.to_string())
}

fn port_mapping(listener_port: u16, mappings: &VhostMappings) -> Option<String> {
    mappings
        .port_to_vhost
        .get(&listener_port.to_string())
        .cloned()
}

/// Access level requested in a topic permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicAccess {
    Read,
    Write,
}

/// Connection facts handed to the access checker alongside the topic.
#[derive(Debug, Clone)]
pub struct TopicPermissionContext {
    pub client_id: String,
    pub routing_key: String,
    pub vhost: String,
}

/// Seam to the broker's access-control subsystem.
pub trait AccessControl: Send + Sync {
    /// `true` when the user may connect from the given peer address.
    fn check_user_loopback<'a>(
        &'a self,
        username: &'a str,
        peer_addr: IpAddr,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    /// Topic permission check. Errors (including unexpected ones) are
    /// treated as refusals by the caller.
    fn check_topic_access<'a>(
        &'a self,
        user: &'a AuthUser,
        access: TopicAccess,
        topic: &'a str,
        context: &'a TopicPermissionContext,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Access control that permits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllAccessControl;

impl AccessControl for AllowAllAccessControl {
    fn check_user_loopback<'a>(
        &'a self,
        _username: &'a str,
        _peer_addr: IpAddr,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async { true })
    }

    fn check_topic_access<'a>(
        &'a self,
        _user: &'a AuthUser,
        _access: TopicAccess,
        _topic: &'a str,
        _context: &'a TopicPermissionContext,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mappings() -> VhostMappings {
        VhostMappings::default()
    }

    #[test]
    fn test_vhost_in_username() {
        let config = GatewayConfig::default();
        let login = resolve_login(
            Some("v1:u1"),
            Some(b"pw"),
            None,
            1883,
            &config,
            &mappings(),
        )
        .unwrap();
        assert_eq!(login.vhost, "v1");
        assert_eq!(login.username, "u1");
        assert_eq!(login.strategy, VhostStrategy::VhostInUsernameOrDefault);
    }

    #[test]
    fn test_vhost_split_uses_last_colon() {
        let config = GatewayConfig::default();
        let login = resolve_login(
            Some("host:8080:user"),
            Some(b"pw"),
            None,
            1883,
            &config,
            &mappings(),
        )
        .unwrap();
        assert_eq!(login.vhost, "host:8080");
        assert_eq!(login.username, "user");
    }

    #[test]
    fn test_ignore_colons_disables_split() {
        let config = GatewayConfig::default().with_ignore_colons_in_username(true);
        let login = resolve_login(
            Some("v1:u1"),
            Some(b"pw"),
            None,
            1883,
            &config,
            &mappings(),
        )
        .unwrap();
        assert_eq!(login.vhost, "/");
        assert_eq!(login.username, "v1:u1");
        assert_eq!(login.strategy, VhostStrategy::DefaultVhost);
    }

    #[test]
    fn test_port_to_vhost_mapping() {
        let config = GatewayConfig::default();
        let mut mappings = mappings();
        mappings
            .port_to_vhost
            .insert("1884".to_string(), "vX".to_string());
        let login =
            resolve_login(Some("u"), Some(b"pw"), None, 1884, &config, &mappings).unwrap();
        assert_eq!(login.vhost, "vX");
        assert_eq!(login.username, "u");
        assert_eq!(login.strategy, VhostStrategy::PortToVhostMapping);
    }

    #[test]
    fn test_username_split_beats_port_mapping() {
        let config = GatewayConfig::default();
        let mut mappings = mappings();
        mappings
            .port_to_vhost
            .insert("1884".to_string(), "vX".to_string());
        let login =
            resolve_login(Some("v1:u1"), Some(b"pw"), None, 1884, &config, &mappings).unwrap();
        assert_eq!(login.vhost, "v1");
        assert_eq!(login.strategy, VhostStrategy::VhostInUsernameOrDefault);
    }

    #[test]
    fn test_cert_mapping_wins_over_port_mapping() {
        let config = GatewayConfig::default().with_ssl_cert_login(true);
        let mut mappings = mappings();
        mappings
            .default_vhosts
            .insert("device.example".to_string(), "certs".to_string());
        mappings
            .port_to_vhost
            .insert("8883".to_string(), "vX".to_string());
        let login = resolve_login(
            None,
            None,
            Some("device.example"),
            8883,
            &config,
            &mappings,
        )
        .unwrap();
        assert_eq!(login.vhost, "certs");
        assert_eq!(login.username, "device.example");
        assert_eq!(login.password, None);
        assert_eq!(login.strategy, VhostStrategy::CertToVhostMapping);
    }

    #[test]
    fn test_cert_fallback_tags_username_or_default() {
        let config = GatewayConfig::default().with_ssl_cert_login(true);
        let login = resolve_login(
            None,
            None,
            Some("device.example"),
            8883,
            &config,
            &mappings(),
        )
        .unwrap();
        assert_eq!(login.vhost, "/");
        assert_eq!(login.strategy, VhostStrategy::VhostInUsernameOrDefault);
    }

    #[test]
    fn test_anonymous_fallback() {
        let config = GatewayConfig::default();
        let login = resolve_login(None, None, None, 1883, &config, &mappings()).unwrap();
        assert_eq!(login.username, "guest");
        assert_eq!(login.password, Some(b"guest".to_vec()));
    }

    #[test]
    fn test_anonymous_disabled() {
        let config = GatewayConfig::default().with_allow_anonymous(false);
        assert_eq!(
            resolve_login(None, None, None, 1883, &config, &mappings()),
            Err(CredentialsError::Missing)
        );
    }

    #[test]
    fn test_half_credentials_invalid() {
        let config = GatewayConfig::default();
        assert_eq!(
            resolve_login(Some("u"), None, None, 1883, &config, &mappings()),
            Err(CredentialsError::Invalid)
        );
        assert_eq!(
            resolve_login(None, Some(b"pw"), None, 1883, &config, &mappings()),
            Err(CredentialsError::Invalid)
        );
    }

    #[test]
    fn test_explicit_credentials_beat_cert_login() {
        let config = GatewayConfig::default().with_ssl_cert_login(true);
        let login = resolve_login(
            Some("alice"),
            Some(b"pw"),
            Some("device.example"),
            8883,
            &config,
            &mappings(),
        )
        .unwrap();
        assert_eq!(login.username, "alice");
        assert_eq!(login.password, Some(b"pw".to_vec()));
    }

    #[test]
    fn test_resolver_is_deterministic() {
        let config = GatewayConfig::default();
        let maps = mappings();
        let a = resolve_login(Some("v:u"), Some(b"p"), None, 1883, &config, &maps);
        let b = resolve_login(Some("v:u"), Some(b"p"), None, 1883, &config, &maps);
        assert_eq!(a, b);
    }
}
