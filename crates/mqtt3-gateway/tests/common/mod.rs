#![allow(dead_code)]

use mqtt3_gateway::auth::{AccessControl, AllowAllAccessControl};
use mqtt3_gateway::keepalive::NoopKeepalive;
use mqtt3_gateway::params::InMemoryParameters;
use mqtt3_gateway::processor::{ConnectionInfo, Disposition, Processor};
use mqtt3_gateway::registry::InMemoryRegistry;
use mqtt3_gateway::retain::InMemoryRetainedStores;
use mqtt3_gateway::testing::MockBroker;
use mqtt3_gateway::GatewayConfig;
use mqtt3_protocol::{
    ConnAckPacket, ConnectPacket, ConnectReturnCode, Packet, PubAckPacket, PublishPacket, QoS,
    SubAckPacket, SubscribePacket,
};
use std::sync::Arc;

/// A processor wired to the in-crate mocks, with handles to everything a
/// test wants to inspect.
pub struct Harness {
    pub broker: Arc<MockBroker>,
    pub registry: Arc<InMemoryRegistry>,
    pub retainers: Arc<InMemoryRetainedStores>,
    pub params: Arc<InMemoryParameters>,
    pub frames: flume::Receiver<Packet>,
    pub processor: Processor,
}

pub fn harness() -> Harness {
    harness_with(
        GatewayConfig::default(),
        Arc::new(AllowAllAccessControl),
        ConnectionInfo::default(),
    )
}

/// Harness for a TLS listener with a certificate-authenticated peer.
pub fn harness_tls(config: GatewayConfig, info: ConnectionInfo, common_name: &str) -> Harness {
    harness_full(
        config,
        Arc::new(AllowAllAccessControl),
        info,
        Some(common_name.to_string()),
    )
}

pub fn harness_with(
    config: GatewayConfig,
    access: Arc<dyn AccessControl>,
    info: ConnectionInfo,
) -> Harness {
    harness_full(config, access, info, None)
}

pub fn harness_full(
    config: GatewayConfig,
    access: Arc<dyn AccessControl>,
    info: ConnectionInfo,
    ssl_login_name: Option<String>,
) -> Harness {
    let broker = Arc::new(MockBroker::new());
    let registry = Arc::new(InMemoryRegistry::new());
    let retainers = Arc::new(InMemoryRetainedStores::new());
    let params = Arc::new(InMemoryParameters::new());
    let (frame_tx, frames) = flume::unbounded();
    let processor = Processor::new(
        Arc::new(config),
        Arc::clone(&broker) as Arc<dyn mqtt3_gateway::amqp::AmqpConnector>,
        access,
        Arc::clone(&registry) as Arc<dyn mqtt3_gateway::registry::ClientRegistry>,
        Arc::clone(&retainers) as Arc<dyn mqtt3_gateway::retain::RetainedStores>,
        Arc::clone(&params) as Arc<dyn mqtt3_gateway::params::ParameterStore>,
        Arc::new(NoopKeepalive),
        frame_tx,
        info,
        ssl_login_name,
    );
    Harness {
        broker,
        registry,
        retainers,
        params,
        frames,
        processor,
    }
}

/// Run a CONNECT with the default guest login and assert it is accepted.
pub async fn connect_as(harness: &mut Harness, client_id: &str, clean_session: bool) {
    let connect = ConnectPacket::new(client_id)
        .with_credentials("guest", "guest")
        .with_clean_session(clean_session);
    connect_with(harness, connect).await;
}

/// Run an arbitrary CONNECT and assert it is accepted.
pub async fn connect_with(harness: &mut Harness, connect: ConnectPacket) {
    let disposition = harness
        .processor
        .handle_packet(connect.into())
        .await
        .expect("CONNECT should be accepted");
    assert_eq!(disposition, Disposition::Continue);
    let connack = expect_connack(harness);
    assert_eq!(connack.return_code, ConnectReturnCode::Accepted);
}

pub fn expect_connack(harness: &Harness) -> ConnAckPacket {
    match harness.frames.try_recv().expect("expected a CONNACK frame") {
        Packet::ConnAck(connack) => connack,
        other => panic!("expected CONNACK, got {}", other.name()),
    }
}

pub fn expect_suback(harness: &Harness) -> SubAckPacket {
    match harness.frames.try_recv().expect("expected a SUBACK frame") {
        Packet::SubAck(suback) => suback,
        other => panic!("expected SUBACK, got {}", other.name()),
    }
}

pub fn expect_publish(harness: &Harness) -> PublishPacket {
    match harness.frames.try_recv().expect("expected a PUBLISH frame") {
        Packet::Publish(publish) => publish,
        other => panic!("expected PUBLISH, got {}", other.name()),
    }
}

pub fn expect_puback(harness: &Harness) -> PubAckPacket {
    match harness.frames.try_recv().expect("expected a PUBACK frame") {
        Packet::PubAck(puback) => puback,
        other => panic!("expected PUBACK, got {}", other.name()),
    }
}

pub fn assert_no_frames(harness: &Harness) {
    if let Ok(frame) = harness.frames.try_recv() {
        panic!("expected no frames, got {}", frame.name());
    }
}

/// Subscribe to a single filter and return the SUBACK.
pub async fn subscribe_one(
    harness: &mut Harness,
    packet_id: u16,
    filter: &str,
    qos: QoS,
) -> SubAckPacket {
    let subscribe = SubscribePacket::new(packet_id).add_filter(filter, qos);
    harness
        .processor
        .handle_packet(Packet::Subscribe(subscribe))
        .await
        .expect("SUBSCRIBE should succeed");
    expect_suback(harness)
}
