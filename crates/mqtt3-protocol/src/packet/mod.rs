//! Per-packet structs and the [`Packet`] tagged union.

pub mod connack;
pub mod connect;
pub mod puback;
pub mod publish;
pub mod suback;
pub mod subscribe;
pub mod unsuback;
pub mod unsubscribe;

use connack::ConnAckPacket;
use connect::ConnectPacket;
use puback::PubAckPacket;
use publish::PublishPacket;
use suback::SubAckPacket;
use subscribe::SubscribePacket;
use unsuback::UnsubAckPacket;
use unsubscribe::UnsubscribePacket;

/// A decoded MQTT control packet.
///
/// CONNECT is boxed: it is by far the largest variant and appears exactly
/// once per connection.
#[derive(Debug, Clone)]
pub enum Packet {
    Connect(Box<ConnectPacket>),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    /// Packet-type name for logging and error messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::ConnAck(_) => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::PubAck(_) => "PUBACK",
            Packet::Subscribe(_) => "SUBSCRIBE",
            Packet::SubAck(_) => "SUBACK",
            Packet::Unsubscribe(_) => "UNSUBSCRIBE",
            Packet::UnsubAck(_) => "UNSUBACK",
            Packet::PingReq => "PINGREQ",
            Packet::PingResp => "PINGRESP",
            Packet::Disconnect => "DISCONNECT",
        }
    }
}

impl From<ConnectPacket> for Packet {
    fn from(packet: ConnectPacket) -> Self {
        Packet::Connect(Box::new(packet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_names() {
        assert_eq!(Packet::PingReq.name(), "PINGREQ");
        assert_eq!(
            Packet::from(ConnectPacket::new("sensor-1")).name(),
            "CONNECT"
        );
    }
}
