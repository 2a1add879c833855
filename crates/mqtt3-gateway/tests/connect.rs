//! CONNECT handshake, clean-session policy and teardown behavior.

mod common;

use common::{connect_as, connect_with, expect_connack, harness, harness_tls, harness_with};
use mqtt3_gateway::amqp::{FieldValue, QUEUE_TTL_ARGUMENT};
use mqtt3_gateway::auth::AllowAllAccessControl;
use mqtt3_gateway::processor::{qos1_queue_name, ConnectionInfo, Disposition};
use mqtt3_gateway::testing::{BrokerOp, DenyingAccessControl};
use mqtt3_gateway::{GatewayConfig, GatewayError};
use mqtt3_protocol::{ConnectPacket, ConnectReturnCode, Packet, QoS, WillMessage};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

#[tokio::test]
async fn test_connect_happy_path_generates_client_id() {
    let mut h = harness();
    let connect = ConnectPacket::new("").with_credentials("guest", "guest");
    let disposition = h.processor.handle_packet(connect.into()).await.unwrap();
    assert_eq!(disposition, Disposition::Continue);

    let connack = expect_connack(&h);
    assert_eq!(connack.return_code, ConnectReturnCode::Accepted);
    assert!(!connack.session_present);

    let client_id = h.processor.client_id().unwrap().to_string();
    assert!(!client_id.is_empty());
    assert!(h.registry.contains(&client_id));
    assert_eq!(h.processor.vhost(), Some("/"));
    assert_eq!(h.processor.username(), Some("guest"));

    // Channel 0 is set up with flow control and the configured prefetch.
    let ops = h.broker.ops();
    assert!(ops
        .iter()
        .any(|op| matches!(op, BrokerOp::FlowControlEnabled { .. })));
    assert!(ops
        .iter()
        .any(|op| matches!(op, BrokerOp::QosSet { prefetch: 10, .. })));
}

#[tokio::test]
async fn test_frames_before_connect_are_rejected() {
    let mut h = harness();
    let err = h.processor.handle_packet(Packet::PingReq).await.unwrap_err();
    assert!(matches!(err, GatewayError::ConnectExpected));
}

#[tokio::test]
async fn test_unacceptable_protocol_version() {
    let mut h = harness();
    let connect = ConnectPacket::new("c1")
        .with_credentials("guest", "guest")
        .with_protocol_version(5);
    let err = h.processor.handle_packet(connect.into()).await.unwrap_err();
    assert!(matches!(err, GatewayError::UnsupportedProtocolVersion));

    let connack = expect_connack(&h);
    assert_eq!(
        connack.return_code,
        ConnectReturnCode::UnacceptableProtocolVersion
    );
    assert!(!connack.session_present);
}

#[tokio::test]
async fn test_empty_client_id_with_persistent_session_rejected() {
    let mut h = harness();
    let connect = ConnectPacket::new("")
        .with_credentials("guest", "guest")
        .with_clean_session(false);
    let err = h.processor.handle_packet(connect.into()).await.unwrap_err();
    assert!(matches!(err, GatewayError::IdentifierRejected));
    assert_eq!(
        expect_connack(&h).return_code,
        ConnectReturnCode::IdentifierRejected
    );
}

#[tokio::test]
async fn test_username_without_password_rejected() {
    let mut h = harness();
    let connect = ConnectPacket::new("c1").with_username("alice");
    let err = h.processor.handle_packet(connect.into()).await.unwrap_err();
    assert!(matches!(err, GatewayError::BadCredentials));
    assert_eq!(
        expect_connack(&h).return_code,
        ConnectReturnCode::BadCredentials
    );
}

#[tokio::test]
async fn test_no_credentials_with_anonymous_disabled() {
    let mut h = harness_with(
        GatewayConfig::default().with_allow_anonymous(false),
        Arc::new(AllowAllAccessControl),
        ConnectionInfo::default(),
    );
    let connect = ConnectPacket::new("c1");
    let err = h.processor.handle_packet(connect.into()).await.unwrap_err();
    assert!(matches!(err, GatewayError::BadCredentials));
    assert_eq!(
        expect_connack(&h).return_code,
        ConnectReturnCode::BadCredentials
    );
}

#[tokio::test]
async fn test_unknown_vhost_rejected() {
    let mut h = harness();
    // Username-embedded vhost that was never created on the broker.
    let connect = ConnectPacket::new("c1").with_credentials("ghost:alice", "pw");
    let err = h.processor.handle_packet(connect.into()).await.unwrap_err();
    assert!(matches!(err, GatewayError::BadCredentials));
    assert_eq!(
        expect_connack(&h).return_code,
        ConnectReturnCode::BadCredentials
    );
}

#[tokio::test]
async fn test_vhost_from_username_split() {
    let mut h = harness();
    h.broker.add_vhost("v1");
    let connect = ConnectPacket::new("c1").with_credentials("v1:u1", "pw");
    connect_with(&mut h, connect).await;
    assert_eq!(h.processor.vhost(), Some("v1"));
    assert_eq!(h.processor.username(), Some("u1"));
}

#[tokio::test]
async fn test_vhost_from_port_mapping() {
    let info = ConnectionInfo::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        1884,
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        50000,
        false,
    );
    let mut h = harness_with(GatewayConfig::default(), Arc::new(AllowAllAccessControl), info);
    h.broker.add_vhost("vX");
    h.params.set_port_to_vhost(1884, "vX");

    let connect = ConnectPacket::new("c1").with_credentials("u", "pw");
    connect_with(&mut h, connect).await;
    assert_eq!(h.processor.vhost(), Some("vX"));
    assert_eq!(h.processor.username(), Some("u"));
}

#[tokio::test]
async fn test_certificate_login_without_credentials() {
    let info = ConnectionInfo::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        8883,
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        50000,
        true,
    );
    let mut h = harness_tls(
        GatewayConfig::default().with_ssl_cert_login(true),
        info,
        "device.example",
    );
    h.params.set_default_vhost("device.example", "certs");
    h.broker.add_vhost("certs");

    let connect = ConnectPacket::new("c1");
    connect_with(&mut h, connect).await;
    assert_eq!(h.processor.vhost(), Some("certs"));
    assert_eq!(h.processor.username(), Some("device.example"));
    assert!(h.broker.ops().iter().any(|op| matches!(
        op,
        BrokerOp::ConnectionOpened { username, vhost }
            if username == "device.example" && vhost == "certs"
    )));
}

#[tokio::test]
async fn test_broker_auth_failure_maps_to_bad_credentials() {
    let mut h = harness();
    h.broker.fail_auth("guest");
    let connect = ConnectPacket::new("c1").with_credentials("guest", "wrong");
    let err = h.processor.handle_packet(connect.into()).await.unwrap_err();
    assert!(matches!(err, GatewayError::BadCredentials));
    assert_eq!(
        expect_connack(&h).return_code,
        ConnectReturnCode::BadCredentials
    );
}

#[tokio::test]
async fn test_vhost_access_refusal_maps_to_not_authorized() {
    let mut h = harness();
    h.broker.refuse_access("guest");
    let connect = ConnectPacket::new("c1").with_credentials("guest", "guest");
    let err = h.processor.handle_packet(connect.into()).await.unwrap_err();
    assert!(matches!(err, GatewayError::NotAuthorized));
    assert_eq!(
        expect_connack(&h).return_code,
        ConnectReturnCode::NotAuthorized
    );
}

#[tokio::test]
async fn test_loopback_only_user_refused_remotely() {
    let info = ConnectionInfo::new(
        IpAddr::V4(Ipv4Addr::new(192, 168, 0, 10)),
        1883,
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
        50000,
        false,
    );
    let mut h = harness_with(
        GatewayConfig::default(),
        Arc::new(DenyingAccessControl::new().loopback_only("guest")),
        info,
    );
    let connect = ConnectPacket::new("c1").with_credentials("guest", "guest");
    let err = h.processor.handle_packet(connect.into()).await.unwrap_err();
    assert!(matches!(err, GatewayError::NotAuthorized));
    assert_eq!(
        expect_connack(&h).return_code,
        ConnectReturnCode::NotAuthorized
    );

    // The half-open AMQP connection is torn back down.
    let ops = h.broker.ops();
    assert!(ops.iter().any(|op| matches!(op, BrokerOp::ConnectionClosed)));
}

#[tokio::test]
async fn test_duplicate_connect_is_a_protocol_error() {
    let mut h = harness();
    connect_as(&mut h, "c1", true).await;
    let connect = ConnectPacket::new("c1").with_credentials("guest", "guest");
    let err = h.processor.handle_packet(connect.into()).await.unwrap_err();
    assert!(matches!(err, GatewayError::ProtocolError(_)));
}

#[tokio::test]
async fn test_session_present_when_durable_queue_survived() {
    let mut h = harness();
    h.broker.add_queue(qos1_queue_name("c1"));
    let connect = ConnectPacket::new("c1")
        .with_credentials("guest", "guest")
        .with_clean_session(false);
    let disposition = h.processor.handle_packet(connect.into()).await.unwrap();
    assert_eq!(disposition, Disposition::Continue);

    let connack = expect_connack(&h);
    assert_eq!(connack.return_code, ConnectReturnCode::Accepted);
    assert!(connack.session_present);

    // The durable queue is consumed with manual acks.
    let ops = h.broker.ops();
    assert!(ops.iter().any(|op| matches!(
        op,
        BrokerOp::ConsumerStarted { queue, no_ack: false, .. } if queue == &qos1_queue_name("c1")
    )));
    assert!(h.processor.consumer_tags()[1].is_some());
}

#[tokio::test]
async fn test_session_present_false_for_fresh_persistent_session() {
    let mut h = harness();
    let connect = ConnectPacket::new("c1")
        .with_credentials("guest", "guest")
        .with_clean_session(false);
    h.processor.handle_packet(connect.into()).await.unwrap();

    let connack = expect_connack(&h);
    assert!(!connack.session_present);
    // The queue exists afterwards; a durable, non-auto-delete declaration.
    assert!(h.broker.ops().iter().any(|op| matches!(
        op,
        BrokerOp::QueueDeclared { declare, .. }
            if declare.queue == qos1_queue_name("c1")
                && declare.durable
                && !declare.auto_delete
                && !declare.passive
    )));
}

#[tokio::test]
async fn test_clean_session_deletes_stale_queue() {
    let mut h = harness();
    h.broker.add_queue(qos1_queue_name("c1"));
    connect_as(&mut h, "c1", true).await;

    assert!(!h.broker.queue_exists(&qos1_queue_name("c1")));
    let ops = h.broker.ops();
    let delete_channel = ops.iter().find_map(|op| match op {
        BrokerOp::QueueDeleted { channel, queue } if queue == &qos1_queue_name("c1") => {
            Some(*channel)
        }
        _ => None,
    });
    let delete_channel = delete_channel.expect("stale queue should be deleted");
    // The throwaway cleanup channel is closed again.
    assert!(ops
        .iter()
        .any(|op| matches!(op, BrokerOp::ChannelClosed { channel } if *channel == delete_channel)));
}

#[tokio::test]
async fn test_subscription_ttl_argument_on_persistent_sessions() {
    let mut h = harness_with(
        GatewayConfig::default().with_subscription_ttl_ms(Some(1_800_000)),
        Arc::new(AllowAllAccessControl),
        ConnectionInfo::default(),
    );
    let connect = ConnectPacket::new("c1")
        .with_credentials("guest", "guest")
        .with_clean_session(false);
    h.processor.handle_packet(connect.into()).await.unwrap();
    expect_connack(&h);

    assert!(h.broker.ops().iter().any(|op| matches!(
        op,
        BrokerOp::QueueDeclared { declare, .. }
            if declare.queue == qos1_queue_name("c1")
                && declare.arguments.get(QUEUE_TTL_ARGUMENT)
                    == Some(&FieldValue::Long(1_800_000))
    )));
}

#[tokio::test]
async fn test_clean_session_queue_has_no_ttl_and_auto_deletes() {
    let mut h = harness_with(
        GatewayConfig::default().with_subscription_ttl_ms(Some(1_800_000)),
        Arc::new(AllowAllAccessControl),
        ConnectionInfo::default(),
    );
    connect_as(&mut h, "c1", true).await;
    // Force the QoS-1 queue into existence via a subscription.
    common::subscribe_one(&mut h, 1, "a/b", QoS::AtLeastOnce).await;

    assert!(h.broker.ops().iter().any(|op| matches!(
        op,
        BrokerOp::QueueDeclared { declare, .. }
            if declare.queue == qos1_queue_name("c1")
                && declare.auto_delete
                && declare.arguments.is_empty()
    )));
}

#[tokio::test]
async fn test_will_qos2_is_capped_at_qos1() {
    let mut h = harness();
    let will = WillMessage::new("alerts/offline", &b"gone"[..]).with_qos(QoS::ExactlyOnce);
    let connect = ConnectPacket::new("c1")
        .with_credentials("guest", "guest")
        .with_will(will);
    connect_with(&mut h, connect).await;
    assert_eq!(
        h.processor.will_message().map(|will| will.qos),
        Some(QoS::AtLeastOnce)
    );
}

#[tokio::test]
async fn test_connection_info_reports_protocol_version() {
    let mut h = harness();
    let connect = ConnectPacket::new("c1")
        .with_credentials("guest", "guest")
        .with_protocol_version(3);
    connect_with(&mut h, connect).await;
    let info = h.processor.connection_info();
    assert_eq!(info.protocol_name, "MQTT");
    assert_eq!(info.protocol_version, "3.1.0");
    assert_eq!(info.channel_max, 1);
    assert_eq!(info.frame_max, 0);
    assert!(info
        .client_properties
        .iter()
        .any(|(key, value)| key == "client_id" && value == "c1"));
}
