use crate::types::QoS;
use bytes::Bytes;

/// Decoded PUBLISH packet, used in both directions.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishPacket {
    pub topic_name: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    /// Present iff `qos` is above [`QoS::AtMostOnce`].
    pub packet_id: Option<u16>,
}

impl PublishPacket {
    #[must_use]
    pub fn new(topic_name: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic_name: topic_name.into(),
            payload: payload.into(),
            qos,
            retain: false,
            dup: false,
            packet_id: None,
        }
    }

    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub fn with_dup(mut self, dup: bool) -> Self {
        self.dup = dup;
        self
    }

    #[must_use]
    pub fn with_packet_id(mut self, packet_id: u16) -> Self {
        self.packet_id = Some(packet_id);
        self
    }
}
