//! Per-connection MQTT protocol processor.
//!
//! One processor instance is owned by one connection's event loop. The
//! loop feeds it decoded MQTT frames ([`Processor::handle_packet`]), AMQP
//! deliveries ([`Processor::handle_delivery`]) and publisher confirms
//! ([`Processor::handle_confirm`]); outgoing MQTT frames leave through the
//! flume channel handed to [`Processor::new`]. There is no locking: all
//! mutation happens on the owning task.

mod connect;
mod lifecycle;
mod publish;
mod subscribe;

pub use subscribe::{qos0_queue_name, qos1_queue_name};

use crate::amqp::{AmqpChannel, AmqpConnection, AmqpConnector};
use crate::auth::{AccessControl, AuthState, TopicAccess, TopicPermissionContext};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::keepalive::KeepaliveTimer;
use crate::params::ParameterStore;
use crate::registry::ClientRegistry;
use crate::retain::{RetainedStore, RetainedStores};
use crate::topic;
use mqtt3_protocol::{Packet, QoS, WillMessage};
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of processing one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep feeding events.
    Continue,
    /// The client sent DISCONNECT; tear down without publishing the will.
    Stop,
}

/// Transport-level facts about the client connection, surfaced through the
/// introspection getters and passed along when opening the AMQP
/// connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub host: IpAddr,
    pub port: u16,
    pub peer_host: IpAddr,
    pub peer_port: u16,
    pub protocol_name: &'static str,
    /// Filled in from the CONNECT frame ("3.1.0", "3.1.1" or "N/A").
    pub protocol_version: &'static str,
    pub ssl: bool,
    /// The gateway never opens more than one channel towards the client.
    pub channel_max: u16,
    /// Frame-size negotiation is not part of MQTT; reported as unlimited.
    pub frame_max: u32,
    pub client_properties: Vec<(String, String)>,
}

impl ConnectionInfo {
    #[must_use]
    pub fn new(host: IpAddr, port: u16, peer_host: IpAddr, peer_port: u16, ssl: bool) -> Self {
        Self {
            host,
            port,
            peer_host,
            peer_port,
            protocol_name: "MQTT",
            protocol_version: "N/A",
            ssl,
            channel_max: 1,
            frame_max: 0,
            client_properties: Vec::new(),
        }
    }
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            1883,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            0,
            false,
        )
    }
}

/// The per-connection state machine.
pub struct Processor {
    config: Arc<GatewayConfig>,
    connector: Arc<dyn AmqpConnector>,
    access: Arc<dyn AccessControl>,
    registry: Arc<dyn ClientRegistry>,
    retainers: Arc<dyn RetainedStores>,
    parameters: Arc<dyn ParameterStore>,
    keepalive: Arc<dyn KeepaliveTimer>,
    frame_tx: flume::Sender<Packet>,
    info: ConnectionInfo,
    ssl_login_name: Option<String>,

    connection: Option<Arc<dyn AmqpConnection>>,
    /// `[0]` consumes subscriptions and publishes QoS 0; `[1]` publishes
    /// QoS 1 with confirms and is opened lazily.
    channels: [Option<Arc<dyn AmqpChannel>>; 2],
    /// Consumer tags indexed by subscription QoS.
    consumer_tags: [Option<String>; 2],
    /// Publish sequence number to client packet id, insertion-ordered for
    /// cumulative confirms.
    unacked_pubs: BTreeMap<u64, u16>,
    /// Outbound packet id to AMQP delivery tag, settled by client PUBACK.
    awaiting_ack: BTreeMap<u16, u64>,
    /// Next confirm sequence number; present once the confirm channel is
    /// open.
    awaiting_seqno: Option<u64>,
    /// Next outbound packet id, always in `[1, 0xFFFF]`.
    message_id: u16,
    /// Granted QoS values per filter, newest first, duplicates preserved.
    subscriptions: HashMap<String, Vec<QoS>>,
    exchange: String,
    client_id: Option<String>,
    clean_session: bool,
    will_msg: Option<WillMessage>,
    retainer: Option<Arc<dyn RetainedStore>>,
    auth_state: Option<AuthState>,
}

impl Processor {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: Arc<GatewayConfig>,
        connector: Arc<dyn AmqpConnector>,
        access: Arc<dyn AccessControl>,
        registry: Arc<dyn ClientRegistry>,
        retainers: Arc<dyn RetainedStores>,
        parameters: Arc<dyn ParameterStore>,
        keepalive: Arc<dyn KeepaliveTimer>,
        frame_tx: flume::Sender<Packet>,
        info: ConnectionInfo,
        ssl_login_name: Option<String>,
    ) -> Self {
        let exchange = config.exchange.clone();
        Self {
            config,
            connector,
            access,
            registry,
            retainers,
            parameters,
            keepalive,
            frame_tx,
            info,
            ssl_login_name,
            connection: None,
            channels: [None, None],
            consumer_tags: [None, None],
            unacked_pubs: BTreeMap::new(),
            awaiting_ack: BTreeMap::new(),
            awaiting_seqno: None,
            message_id: 1,
            subscriptions: HashMap::new(),
            exchange,
            client_id: None,
            clean_session: true,
            will_msg: None,
            retainer: None,
            auth_state: None,
        }
    }

    /// Process one decoded inbound frame.
    ///
    /// # Errors
    ///
    /// CONNACK-refusal paths emit the CONNACK first and then return the
    /// matching error; authorization failures and protocol violations are
    /// fatal. In every error case the caller owns closing the socket.
    pub async fn handle_packet(&mut self, packet: Packet) -> Result<Disposition> {
        if self.connection.is_none() {
            return match packet {
                Packet::Connect(connect) => {
                    self.handle_connect(*connect).await?;
                    Ok(Disposition::Continue)
                }
                other => {
                    warn!(packet = other.name(), "Frame received before CONNECT");
                    Err(GatewayError::ConnectExpected)
                }
            };
        }
        match packet {
            Packet::Connect(_) => Err(GatewayError::ProtocolError(
                "duplicate CONNECT".to_string(),
            )),
            Packet::Publish(publish) => {
                self.handle_publish(publish).await?;
                Ok(Disposition::Continue)
            }
            Packet::PubAck(puback) => {
                self.handle_puback(&puback)?;
                Ok(Disposition::Continue)
            }
            Packet::Subscribe(subscribe) => {
                self.handle_subscribe(subscribe).await?;
                Ok(Disposition::Continue)
            }
            Packet::Unsubscribe(unsubscribe) => {
                self.handle_unsubscribe(unsubscribe).await?;
                Ok(Disposition::Continue)
            }
            Packet::PingReq => {
                self.handle_pingreq()?;
                Ok(Disposition::Continue)
            }
            Packet::Disconnect => {
                self.handle_disconnect();
                Ok(Disposition::Stop)
            }
            other => Err(GatewayError::ProtocolError(format!(
                "unexpected {} frame from client",
                other.name()
            ))),
        }
    }

    pub(crate) fn send_frame(&self, packet: Packet) -> Result<()> {
        self.frame_tx
            .send(packet)
            .map_err(|_| GatewayError::ConnectionClosed)
    }

    /// Allocate the next outbound packet id, wrapping from 0xFFFF to 1.
    pub(crate) fn next_message_id(&mut self) -> u16 {
        let id = self.message_id;
        self.message_id = if id == u16::MAX { 1 } else { id + 1 };
        id
    }

    pub(crate) fn amqp_connection(&self) -> Result<Arc<dyn AmqpConnection>> {
        self.connection
            .clone()
            .ok_or_else(|| GatewayError::InvalidState("no AMQP connection".to_string()))
    }

    /// Channel 0: consumer traffic and QoS-0 publishes.
    pub(crate) fn consume_channel(&self) -> Result<Arc<dyn AmqpChannel>> {
        self.channels[0]
            .clone()
            .ok_or_else(|| GatewayError::InvalidState("consumer channel not open".to_string()))
    }

    pub(crate) fn client_id_str(&self) -> Result<&str> {
        self.client_id
            .as_deref()
            .ok_or_else(|| GatewayError::InvalidState("no client id".to_string()))
    }

    pub(crate) fn auth(&self) -> Result<&AuthState> {
        self.auth_state
            .as_ref()
            .ok_or_else(|| GatewayError::InvalidState("not authenticated".to_string()))
    }

    /// Topic permission check; any failure, expected or not, is coerced to
    /// an access refusal.
    pub(crate) async fn check_topic_access(
        &self,
        topic: &str,
        access: TopicAccess,
    ) -> Result<()> {
        let auth = self.auth()?;
        let context = TopicPermissionContext {
            client_id: self.client_id.clone().unwrap_or_default(),
            routing_key: topic::mqtt_to_amqp(topic),
            vhost: auth.vhost.clone(),
        };
        match self
            .access
            .check_topic_access(&auth.user, access, topic, &context)
            .await
        {
            Ok(()) => Ok(()),
            Err(error) => {
                warn!(
                    username = %auth.username,
                    topic = %topic,
                    access = ?access,
                    %error,
                    "Topic access refused"
                );
                Err(GatewayError::TopicAccessRefused(topic.to_string()))
            }
        }
    }

    fn handle_disconnect(&mut self) {
        debug!(client_id = ?self.client_id, "Client sent DISCONNECT");
        // A graceful disconnect revokes the will.
        self.will_msg = None;
    }

    // --- introspection -------------------------------------------------

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    #[must_use]
    pub fn clean_session(&self) -> bool {
        self.clean_session
    }

    #[must_use]
    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    #[must_use]
    pub fn vhost(&self) -> Option<&str> {
        self.auth_state.as_ref().map(|auth| auth.vhost.as_str())
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.auth_state.as_ref().map(|auth| auth.username.as_str())
    }

    #[must_use]
    pub fn subscriptions(&self) -> &HashMap<String, Vec<QoS>> {
        &self.subscriptions
    }

    #[must_use]
    pub fn consumer_tags(&self) -> &[Option<String>; 2] {
        &self.consumer_tags
    }

    #[must_use]
    pub fn unacked_pubs(&self) -> &BTreeMap<u64, u16> {
        &self.unacked_pubs
    }

    #[must_use]
    pub fn awaiting_ack(&self) -> &BTreeMap<u16, u64> {
        &self.awaiting_ack
    }

    #[must_use]
    pub fn will_message(&self) -> Option<&WillMessage> {
        self.will_msg.as_ref()
    }

    #[must_use]
    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.info
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.iter().flatten().count()
    }
}

pub(crate) fn qos_index(qos: QoS) -> usize {
    usize::from(qos != QoS::AtMostOnce)
}

/// Subscriptions above QoS 1 are granted at QoS 1.
pub(crate) fn supported_qos(qos: QoS) -> QoS {
    qos.min(QoS::AtLeastOnce)
}
