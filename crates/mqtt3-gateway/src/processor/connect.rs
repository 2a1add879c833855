//! CONNECT handshake and session establishment.

use super::{Processor, supported_qos};
use crate::amqp::{ConnectError, OpenParams, QueueDeclare};
use crate::auth::{resolve_login, AuthState};
use crate::error::{GatewayError, Result};
use mqtt3_protocol::{
    version_name, ConnAckPacket, ConnectPacket, ConnectReturnCode, Packet, ProtocolVersion,
    WillMessage,
};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, warn};

impl Processor {
    pub(super) async fn handle_connect(&mut self, mut connect: ConnectPacket) -> Result<()> {
        debug!(
            client_id = %connect.client_id,
            protocol_version = connect.protocol_version,
            clean_session = connect.clean_session,
            keep_alive = connect.keep_alive,
            "Processing CONNECT"
        );

        let had_empty_client_id = connect.client_id.is_empty();
        if had_empty_client_id {
            static COUNTER: AtomicU32 = AtomicU32::new(0);
            let generated = format!("auto-{}", COUNTER.fetch_add(1, Ordering::SeqCst));
            debug!(client_id = %generated, "Generated client id for empty client id");
            connect.client_id = generated;
        }
        self.info
            .client_properties
            .push(("client_id".to_string(), connect.client_id.clone()));
        self.info.protocol_version = version_name(connect.protocol_version);

        if ProtocolVersion::try_from(connect.protocol_version).is_err() {
            info!(
                protocol_version = connect.protocol_version,
                "Rejecting connection: unsupported protocol version"
            );
            self.send_connack(ConnectReturnCode::UnacceptableProtocolVersion, false)?;
            return Err(GatewayError::UnsupportedProtocolVersion);
        }

        // An empty client id only works for a session with nothing to
        // resume.
        if had_empty_client_id && !connect.clean_session {
            info!("Rejecting connection: empty client id with clean_session=false");
            self.send_connack(ConnectReturnCode::IdentifierRejected, false)?;
            return Err(GatewayError::IdentifierRejected);
        }

        let mappings = self.parameters.vhost_mappings();
        let login = match resolve_login(
            connect.username.as_deref(),
            connect.password.as_deref(),
            self.ssl_login_name.as_deref(),
            self.info.port,
            &self.config,
            &mappings,
        ) {
            Ok(login) => login,
            Err(error) => {
                warn!(client_id = %connect.client_id, ?error, "MQTT login failed");
                self.send_connack(ConnectReturnCode::BadCredentials, false)?;
                return Err(GatewayError::BadCredentials);
            }
        };
        debug!(
            vhost = %login.vhost,
            username = %login.username,
            strategy = login.strategy.as_str(),
            "Resolved MQTT login"
        );

        if !self.connector.vhost_exists(&login.vhost).await {
            warn!(vhost = %login.vhost, "Virtual host does not exist");
            self.send_connack(ConnectReturnCode::BadCredentials, false)?;
            return Err(GatewayError::BadCredentials);
        }

        let params = OpenParams {
            username: login.username.clone(),
            password: login.password.clone(),
            vhost: login.vhost.clone(),
            info: self.info.clone(),
        };
        let connection = match self.connector.open(params).await {
            Ok(connection) => connection,
            Err(ConnectError::AuthFailure) => {
                warn!(username = %login.username, "Broker authentication failed");
                self.send_connack(ConnectReturnCode::BadCredentials, false)?;
                return Err(GatewayError::BadCredentials);
            }
            Err(error @ (ConnectError::AccessRefused | ConnectError::NotAllowed)) => {
                warn!(username = %login.username, %error, "Broker refused connection");
                self.send_connack(ConnectReturnCode::NotAuthorized, false)?;
                return Err(GatewayError::NotAuthorized);
            }
        };

        if !self
            .access
            .check_user_loopback(&login.username, self.info.peer_host)
            .await
        {
            warn!(
                username = %login.username,
                peer_host = %self.info.peer_host,
                "User may only connect over loopback"
            );
            let _ = connection.close().await;
            self.send_connack(ConnectReturnCode::NotAuthorized, false)?;
            return Err(GatewayError::NotAuthorized);
        }

        let user = connection.user();
        let channel = connection.open_channel().await?;
        channel.enable_delivery_flow_control();
        self.registry.register(&connect.client_id).await?;
        channel.basic_qos(self.config.prefetch).await?;
        self.keepalive.start(connect.keep_alive);

        self.will_msg = connect.will.take().map(build_will);
        self.connection = Some(connection);
        self.channels[0] = Some(channel);
        self.client_id = Some(connect.client_id.clone());
        self.clean_session = connect.clean_session;
        self.retainer = Some(self.retainers.for_vhost(&login.vhost));
        self.auth_state = Some(AuthState {
            user,
            username: login.username,
            vhost: login.vhost,
        });

        let session_present = self.establish_session().await?;
        info!(
            client_id = %connect.client_id,
            session_present,
            "MQTT connection accepted"
        );
        self.send_connack(ConnectReturnCode::Accepted, session_present)
    }

    pub(super) fn send_connack(
        &self,
        return_code: ConnectReturnCode,
        session_present: bool,
    ) -> Result<()> {
        self.send_frame(Packet::ConnAck(ConnAckPacket::new(
            session_present,
            return_code,
        )))
    }

    /// Clean-session policy. For persistent sessions the probe runs before
    /// the queue is ensured, so `session_present` reflects whether the
    /// durable QoS-1 queue survived from an earlier connection.
    async fn establish_session(&mut self) -> Result<bool> {
        let queue = super::qos1_queue_name(self.client_id_str()?);
        if self.clean_session {
            self.delete_stale_queue(&queue).await;
            Ok(false)
        } else {
            let session_present = self.queue_exists(&queue).await?;
            self.ensure_queue(mqtt3_protocol::QoS::AtLeastOnce).await?;
            Ok(session_present)
        }
    }

    /// Best-effort delete of a previous session's durable queue; a failure
    /// here must never block the CONNACK.
    async fn delete_stale_queue(&self, queue: &str) {
        let connection = match self.amqp_connection() {
            Ok(connection) => connection,
            Err(_) => return,
        };
        match connection.open_channel().await {
            Ok(channel) => {
                if let Err(error) = channel.queue_delete(queue).await {
                    debug!(queue = %queue, %error, "Stale session queue delete failed");
                }
                let _ = channel.close().await;
            }
            Err(error) => {
                debug!(queue = %queue, %error, "Could not open channel for session cleanup");
            }
        }
    }

    /// Passive-declare probe on a throwaway channel. A failed passive
    /// declare takes its channel down, which is why the probe does not run
    /// on the consumer channel.
    async fn queue_exists(&self, queue: &str) -> Result<bool> {
        let connection = self.amqp_connection()?;
        let channel = connection.open_channel().await?;
        let declare = QueueDeclare {
            queue: queue.to_string(),
            passive: true,
            durable: true,
            ..QueueDeclare::default()
        };
        let found = channel.queue_declare(declare).await.is_ok();
        let _ = channel.close().await;
        Ok(found)
    }
}

/// Lift the CONNECT will into the message shape the publish path accepts;
/// QoS 2 wills are capped at QoS 1 like everything else.
fn build_will(will: WillMessage) -> WillMessage {
    let qos = supported_qos(will.qos);
    WillMessage { qos, ..will }
}
