//! Decoded MQTT 3.1/3.1.1 frame model.
//!
//! This crate defines the in-memory shape of every control packet the
//! gateway understands. It deliberately contains no wire codec: the
//! transport layer owns framing and byte-level encoding, and hands the
//! gateway fully decoded [`Packet`] values (and serialises the ones the
//! gateway emits).

pub mod packet;
pub mod types;

pub use packet::connack::ConnAckPacket;
pub use packet::connect::{ConnectPacket, WillMessage};
pub use packet::puback::PubAckPacket;
pub use packet::publish::PublishPacket;
pub use packet::suback::SubAckPacket;
pub use packet::subscribe::{SubscribePacket, TopicFilter};
pub use packet::unsuback::UnsubAckPacket;
pub use packet::unsubscribe::UnsubscribePacket;
pub use packet::Packet;
pub use types::{version_name, ConnectReturnCode, ProtocolVersion, QoS};
