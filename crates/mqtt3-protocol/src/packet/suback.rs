use crate::types::QoS;

/// Decoded SUBACK packet; one granted QoS per requested filter, in request
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAckPacket {
    pub packet_id: u16,
    pub granted_qos: Vec<QoS>,
}

impl SubAckPacket {
    #[must_use]
    pub fn new(packet_id: u16, granted_qos: Vec<QoS>) -> Self {
        Self {
            packet_id,
            granted_qos,
        }
    }
}
