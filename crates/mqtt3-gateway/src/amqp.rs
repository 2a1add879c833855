//! Seam to the AMQP 0-9-1 client library.
//!
//! The processor drives the broker through these traits. Methods come in
//! two shapes, mirroring the client library's call/cast split:
//!
//! - synchronous RPCs that await the broker's reply (`queue.declare`,
//!   `queue.bind`, `basic.consume`, ...) are boxed-future methods;
//! - fire-and-forget casts (`basic.publish` under flow control,
//!   `basic.ack`, flow-control credit) are plain methods that never block.
//!
//! Deliveries (`basic.deliver`) and publisher confirms (`basic.ack` from
//! the broker) travel the other way: the client library surfaces them as
//! events which the connection owner feeds into
//! [`crate::processor::Processor::handle_delivery`] and
//! [`crate::processor::Processor::handle_confirm`].

use crate::auth::AuthUser;
use crate::error::Result;
use crate::processor::ConnectionInfo;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Header carrying the publisher's original MQTT QoS across the broker.
pub const PUBLISH_QOS_HEADER: &str = "x-mqtt-publish-qos";

/// Header carrying the MQTT dup flag across the broker.
pub const DUP_HEADER: &str = "x-mqtt-dup";

/// Queue argument bounding the lifetime of an idle durable session queue.
pub const QUEUE_TTL_ARGUMENT: &str = "x-expires";

/// AMQP field-table value. Only the types the gateway writes or reads.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Byte(u8),
    Long(i64),
    LongString(String),
}

/// An AMQP field table (headers, queue arguments).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldTable(Vec<(String, FieldValue)>);

impl FieldTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        self.0.push((key.into(), value));
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, FieldValue)> {
        self.0.iter()
    }
}

/// Message properties attached to a `basic.publish`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageProperties {
    pub headers: FieldTable,
    /// 1 = transient, 2 = persistent.
    pub delivery_mode: u8,
}

/// `queue.declare` options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDeclare {
    pub queue: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub passive: bool,
    pub arguments: FieldTable,
}

/// A `basic.deliver` event from one of the subscription consumers.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub routing_key: String,
    pub headers: FieldTable,
    pub payload: Bytes,
}

/// A publisher confirm from the QoS-1 publish channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmAck {
    /// Sequence number assigned by the channel in publish order.
    pub delivery_tag: u64,
    /// Confirms every outstanding publish up to and including
    /// `delivery_tag`.
    pub multiple: bool,
}

/// Login material for opening the in-process AMQP connection.
#[derive(Clone)]
pub struct OpenParams {
    pub username: String,
    /// `None` marks a TLS certificate login with no password to present.
    pub password: Option<Vec<u8>>,
    pub vhost: String,
    pub info: ConnectionInfo,
}

impl std::fmt::Debug for OpenParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenParams")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("vhost", &self.vhost)
            .finish()
    }
}

/// Why the broker refused to open a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Credentials were wrong.
    AuthFailure,
    /// Authenticated but refused access to the vhost.
    AccessRefused,
    /// Authenticated but the user may not connect this way.
    NotAllowed,
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::AuthFailure => write!(f, "authentication failure"),
            ConnectError::AccessRefused => write!(f, "access refused"),
            ConnectError::NotAllowed => write!(f, "not allowed"),
        }
    }
}

/// Entry point into the AMQP client library.
pub trait AmqpConnector: Send + Sync {
    /// Check the virtual host exists before attempting a connection.
    fn vhost_exists<'a>(
        &'a self,
        vhost: &'a str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    /// Open a direct (in-process) connection for the resolved login.
    fn open<'a>(
        &'a self,
        params: OpenParams,
    ) -> Pin<
        Box<
            dyn Future<Output = std::result::Result<Arc<dyn AmqpConnection>, ConnectError>>
                + Send
                + 'a,
        >,
    >;
}

/// An open AMQP connection.
pub trait AmqpConnection: Send + Sync {
    fn open_channel<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn AmqpChannel>>> + Send + 'a>>;

    /// The authenticated broker user backing this connection.
    fn user(&self) -> AuthUser;

    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// An open AMQP channel.
pub trait AmqpChannel: Send + Sync {
    /// Declare a queue; resolves to the queue's name.
    ///
    /// # Errors
    ///
    /// A passive declaration of a queue that does not exist fails (and, per
    /// AMQP, takes the channel with it).
    fn queue_declare<'a>(
        &'a self,
        declare: QueueDeclare,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    fn queue_delete<'a>(
        &'a self,
        queue: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn queue_bind<'a>(
        &'a self,
        queue: &'a str,
        exchange: &'a str,
        routing_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn queue_unbind<'a>(
        &'a self,
        queue: &'a str,
        exchange: &'a str,
        routing_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Start a consumer; resolves to the broker-assigned consumer tag.
    fn basic_consume<'a>(
        &'a self,
        queue: &'a str,
        no_ack: bool,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    fn basic_qos<'a>(
        &'a self,
        prefetch_count: u16,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Put the channel into publisher-confirm mode. Subsequent publishes
    /// are assigned sequence numbers starting at 1, and the broker's
    /// confirms arrive as [`ConfirmAck`] events in sequence order.
    fn confirm_select<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Ask the client library to meter deliveries on this channel; each
    /// delivery must be credited back with [`AmqpChannel::notify_received`].
    fn enable_delivery_flow_control(&self);

    /// Credit the flow-control window for a received delivery.
    fn notify_received(&self, delivery_tag: u64);

    /// Flow-controlled publish cast.
    ///
    /// # Errors
    ///
    /// Fails only when the channel is unusable; the broker's verdict for a
    /// confirmed publish arrives separately as a [`ConfirmAck`].
    fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: MessageProperties,
        payload: Bytes,
    ) -> Result<()>;

    /// Acknowledge a delivery. Cast, never blocks.
    fn basic_ack(&self, delivery_tag: u64) -> Result<()>;

    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_table_lookup() {
        let mut table = FieldTable::new();
        table.insert(PUBLISH_QOS_HEADER, FieldValue::Byte(1));
        table.insert(DUP_HEADER, FieldValue::Bool(false));
        assert_eq!(table.get(PUBLISH_QOS_HEADER), Some(&FieldValue::Byte(1)));
        assert_eq!(table.get("x-absent"), None);
        assert!(!table.is_empty());
    }

    #[test]
    fn test_open_params_debug_redacts_password() {
        let params = OpenParams {
            username: "alice".to_string(),
            password: Some(b"secret".to_vec()),
            vhost: "/".to_string(),
            info: ConnectionInfo::default(),
        };
        let rendered = format!("{params:?}");
        assert!(!rendered.contains("secret"));
    }
}
