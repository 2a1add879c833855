//! Test support: scripted stand-ins for the AMQP client library and the
//! access-control subsystem.
//!
//! [`MockBroker`] records every operation the processor performs as a
//! [`BrokerOp`], simulates pre-existing queues for the passive-declare
//! probe, and can be told to fail authentication or refuse access for
//! specific usernames. Deliveries and confirms are injected into the
//! processor directly by tests; the mock does not route messages.

use crate::amqp::{
    AmqpChannel, AmqpConnection, AmqpConnector, ConnectError, MessageProperties, OpenParams,
    QueueDeclare,
};
use crate::auth::{AccessControl, AuthUser, TopicAccess, TopicPermissionContext};
use crate::error::{GatewayError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// One operation the processor performed against the mock broker.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerOp {
    ConnectionOpened {
        username: String,
        vhost: String,
    },
    ConnectionClosed,
    ChannelOpened {
        channel: u32,
    },
    ChannelClosed {
        channel: u32,
    },
    QueueDeclared {
        channel: u32,
        declare: QueueDeclare,
    },
    QueueDeleted {
        channel: u32,
        queue: String,
    },
    QueueBound {
        channel: u32,
        queue: String,
        exchange: String,
        routing_key: String,
    },
    QueueUnbound {
        channel: u32,
        queue: String,
        exchange: String,
        routing_key: String,
    },
    ConsumerStarted {
        channel: u32,
        queue: String,
        consumer_tag: String,
        no_ack: bool,
    },
    QosSet {
        channel: u32,
        prefetch: u16,
    },
    ConfirmModeEnabled {
        channel: u32,
    },
    FlowControlEnabled {
        channel: u32,
    },
    Published {
        channel: u32,
        exchange: String,
        routing_key: String,
        properties: MessageProperties,
        payload: Bytes,
    },
    Acked {
        channel: u32,
        delivery_tag: u64,
    },
    Received {
        channel: u32,
        delivery_tag: u64,
    },
}

#[derive(Default)]
struct BrokerState {
    vhosts: HashSet<String>,
    queues: HashSet<String>,
    auth_failures: HashSet<String>,
    access_refusals: HashSet<String>,
    ops: Vec<BrokerOp>,
}

/// Scripted AMQP broker. Clone-cheap via internal sharing.
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
    channel_counter: Arc<AtomicU32>,
    consumer_counter: Arc<AtomicU32>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    #[must_use]
    pub fn new() -> Self {
        let mut state = BrokerState::default();
        state.vhosts.insert("/".to_string());
        Self {
            state: Arc::new(Mutex::new(state)),
            channel_counter: Arc::new(AtomicU32::new(0)),
            consumer_counter: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn add_vhost(&self, vhost: impl Into<String>) {
        self.state.lock().vhosts.insert(vhost.into());
    }

    /// Seed a queue as already existing, so the session-present probe
    /// succeeds.
    pub fn add_queue(&self, queue: impl Into<String>) {
        self.state.lock().queues.insert(queue.into());
    }

    /// Make `open` fail with [`ConnectError::AuthFailure`] for a username.
    pub fn fail_auth(&self, username: impl Into<String>) {
        self.state.lock().auth_failures.insert(username.into());
    }

    /// Make `open` fail with [`ConnectError::AccessRefused`] for a
    /// username.
    pub fn refuse_access(&self, username: impl Into<String>) {
        self.state.lock().access_refusals.insert(username.into());
    }

    #[must_use]
    pub fn queue_exists(&self, queue: &str) -> bool {
        self.state.lock().queues.contains(queue)
    }

    /// Everything the processor has done so far, in order.
    #[must_use]
    pub fn ops(&self) -> Vec<BrokerOp> {
        self.state.lock().ops.clone()
    }

    /// Only the publishes, in order.
    #[must_use]
    pub fn published(&self) -> Vec<BrokerOp> {
        self.state
            .lock()
            .ops
            .iter()
            .filter(|op| matches!(op, BrokerOp::Published { .. }))
            .cloned()
            .collect()
    }
}

impl AmqpConnector for MockBroker {
    fn vhost_exists<'a>(
        &'a self,
        vhost: &'a str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        let exists = self.state.lock().vhosts.contains(vhost);
        Box::pin(async move { exists })
    }

    fn open<'a>(
        &'a self,
        params: OpenParams,
    ) -> Pin<
        Box<
            dyn Future<Output = std::result::Result<Arc<dyn AmqpConnection>, ConnectError>>
                + Send
                + 'a,
        >,
    > {
        let result = {
            let mut state = self.state.lock();
            if state.auth_failures.contains(&params.username) {
                Err(ConnectError::AuthFailure)
            } else if state.access_refusals.contains(&params.username) {
                Err(ConnectError::AccessRefused)
            } else {
                state.ops.push(BrokerOp::ConnectionOpened {
                    username: params.username.clone(),
                    vhost: params.vhost.clone(),
                });
                let connection: Arc<dyn AmqpConnection> = Arc::new(MockConnection {
                    username: params.username,
                    state: Arc::clone(&self.state),
                    channel_counter: Arc::clone(&self.channel_counter),
                    consumer_counter: Arc::clone(&self.consumer_counter),
                });
                Ok(connection)
            }
        };
        Box::pin(async move { result })
    }
}

struct MockConnection {
    username: String,
    state: Arc<Mutex<BrokerState>>,
    channel_counter: Arc<AtomicU32>,
    consumer_counter: Arc<AtomicU32>,
}

impl AmqpConnection for MockConnection {
    fn open_channel<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn AmqpChannel>>> + Send + 'a>> {
        let channel = self.channel_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .lock()
            .ops
            .push(BrokerOp::ChannelOpened { channel });
        let channel: Arc<dyn AmqpChannel> = Arc::new(MockChannel {
            id: channel,
            state: Arc::clone(&self.state),
            consumer_counter: Arc::clone(&self.consumer_counter),
        });
        Box::pin(async move { Ok(channel) })
    }

    fn user(&self) -> AuthUser {
        AuthUser::new(self.username.clone())
    }

    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        self.state.lock().ops.push(BrokerOp::ConnectionClosed);
        Box::pin(async { Ok(()) })
    }
}

struct MockChannel {
    id: u32,
    state: Arc<Mutex<BrokerState>>,
    consumer_counter: Arc<AtomicU32>,
}

impl AmqpChannel for MockChannel {
    fn queue_declare<'a>(
        &'a self,
        declare: QueueDeclare,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        let result = {
            let mut state = self.state.lock();
            state.ops.push(BrokerOp::QueueDeclared {
                channel: self.id,
                declare: declare.clone(),
            });
            if declare.passive {
                if state.queues.contains(&declare.queue) {
                    Ok(declare.queue)
                } else {
                    Err(GatewayError::Amqp(format!(
                        "NOT_FOUND - no queue '{}'",
                        declare.queue
                    )))
                }
            } else {
                state.queues.insert(declare.queue.clone());
                Ok(declare.queue)
            }
        };
        Box::pin(async move { result })
    }

    fn queue_delete<'a>(
        &'a self,
        queue: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        let mut state = self.state.lock();
        state.queues.remove(queue);
        state.ops.push(BrokerOp::QueueDeleted {
            channel: self.id,
            queue: queue.to_string(),
        });
        Box::pin(async { Ok(()) })
    }

    fn queue_bind<'a>(
        &'a self,
        queue: &'a str,
        exchange: &'a str,
        routing_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        self.state.lock().ops.push(BrokerOp::QueueBound {
            channel: self.id,
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        });
        Box::pin(async { Ok(()) })
    }

    fn queue_unbind<'a>(
        &'a self,
        queue: &'a str,
        exchange: &'a str,
        routing_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        self.state.lock().ops.push(BrokerOp::QueueUnbound {
            channel: self.id,
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        });
        Box::pin(async { Ok(()) })
    }

    fn basic_consume<'a>(
        &'a self,
        queue: &'a str,
        no_ack: bool,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        let consumer_tag = format!(
            "amq.ctag-{}",
            self.consumer_counter.fetch_add(1, Ordering::SeqCst) + 1
        );
        self.state.lock().ops.push(BrokerOp::ConsumerStarted {
            channel: self.id,
            queue: queue.to_string(),
            consumer_tag: consumer_tag.clone(),
            no_ack,
        });
        Box::pin(async move { Ok(consumer_tag) })
    }

    fn basic_qos<'a>(
        &'a self,
        prefetch_count: u16,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        self.state.lock().ops.push(BrokerOp::QosSet {
            channel: self.id,
            prefetch: prefetch_count,
        });
        Box::pin(async { Ok(()) })
    }

    fn confirm_select<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        self.state
            .lock()
            .ops
            .push(BrokerOp::ConfirmModeEnabled { channel: self.id });
        Box::pin(async { Ok(()) })
    }

    fn enable_delivery_flow_control(&self) {
        self.state
            .lock()
            .ops
            .push(BrokerOp::FlowControlEnabled { channel: self.id });
    }

    fn notify_received(&self, delivery_tag: u64) {
        self.state.lock().ops.push(BrokerOp::Received {
            channel: self.id,
            delivery_tag,
        });
    }

    fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: MessageProperties,
        payload: Bytes,
    ) -> Result<()> {
        self.state.lock().ops.push(BrokerOp::Published {
            channel: self.id,
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            properties,
            payload,
        });
        Ok(())
    }

    fn basic_ack(&self, delivery_tag: u64) -> Result<()> {
        self.state.lock().ops.push(BrokerOp::Acked {
            channel: self.id,
            delivery_tag,
        });
        Ok(())
    }

    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        self.state
            .lock()
            .ops
            .push(BrokerOp::ChannelClosed { channel: self.id });
        Box::pin(async { Ok(()) })
    }
}

/// Access control with per-topic deny lists and an optional loopback-only
/// user set.
#[derive(Default)]
pub struct DenyingAccessControl {
    deny_read: HashSet<String>,
    deny_write: HashSet<String>,
    loopback_only: HashSet<String>,
}

impl DenyingAccessControl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn deny_read(mut self, topic: impl Into<String>) -> Self {
        self.deny_read.insert(topic.into());
        self
    }

    #[must_use]
    pub fn deny_write(mut self, topic: impl Into<String>) -> Self {
        self.deny_write.insert(topic.into());
        self
    }

    #[must_use]
    pub fn loopback_only(mut self, username: impl Into<String>) -> Self {
        self.loopback_only.insert(username.into());
        self
    }
}

impl AccessControl for DenyingAccessControl {
    fn check_user_loopback<'a>(
        &'a self,
        username: &'a str,
        peer_addr: IpAddr,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        let allowed = !self.loopback_only.contains(username) || peer_addr.is_loopback();
        Box::pin(async move { allowed })
    }

    fn check_topic_access<'a>(
        &'a self,
        _user: &'a AuthUser,
        access: TopicAccess,
        topic: &'a str,
        _context: &'a TopicPermissionContext,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        let denied = match access {
            TopicAccess::Read => self.deny_read.contains(topic),
            TopicAccess::Write => self.deny_write.contains(topic),
        };
        Box::pin(async move {
            if denied {
                Err(GatewayError::NotAuthorized)
            } else {
                Ok(())
            }
        })
    }
}
