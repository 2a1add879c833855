//! Message flow in both directions: client publishes into the broker,
//! broker deliveries and confirms back out to the client.

use super::{Processor, supported_qos};
use crate::amqp::{
    AmqpChannel, ConfirmAck, Delivery, FieldTable, FieldValue, MessageProperties,
    DUP_HEADER, PUBLISH_QOS_HEADER,
};
use crate::auth::TopicAccess;
use crate::error::Result;
use crate::topic;
use mqtt3_protocol::{Packet, PubAckPacket, PublishPacket, QoS};
use std::sync::Arc;
use tracing::debug;

impl Processor {
    pub(super) async fn handle_publish(&mut self, mut publish: PublishPacket) -> Result<()> {
        if publish.qos == QoS::ExactlyOnce {
            // No end-to-end QoS 2 support; the frame is treated as QoS 1
            // from here on.
            publish.qos = QoS::AtLeastOnce;
        }
        self.check_topic_access(&publish.topic_name, TopicAccess::Write)
            .await?;
        self.publish_with_retain(&publish).await
    }

    /// Forward a PUBLISH into the broker and update retained state.
    /// Shared between the inbound-frame path and will publication.
    pub(super) async fn publish_with_retain(&mut self, publish: &PublishPacket) -> Result<()> {
        self.amqp_publish(publish).await?;
        if publish.retain {
            if let Some(retainer) = &self.retainer {
                if publish.payload.is_empty() {
                    // An empty retained publish clears retention.
                    retainer.clear(&publish.topic_name);
                } else {
                    retainer.retain(&publish.topic_name, publish);
                }
            }
        }
        Ok(())
    }

    async fn amqp_publish(&mut self, publish: &PublishPacket) -> Result<()> {
        let routing_key = topic::mqtt_to_amqp(&publish.topic_name);
        let mut headers = FieldTable::new();
        headers.insert(PUBLISH_QOS_HEADER, FieldValue::Byte(publish.qos.into()));
        headers.insert(DUP_HEADER, FieldValue::Bool(publish.dup));
        let properties = MessageProperties {
            headers,
            delivery_mode: if publish.qos == QoS::AtMostOnce { 1 } else { 2 },
        };

        let channel = match publish.qos {
            QoS::AtMostOnce => self.consume_channel()?,
            _ => self.confirm_channel().await?,
        };
        if publish.qos != QoS::AtMostOnce {
            // Track the confirm sequence number so the broker's ack can be
            // translated back into a client PUBACK. Publishes without a
            // packet id (the will) are not tracked and keep the counter
            // untouched.
            if let (Some(packet_id), Some(seqno)) = (publish.packet_id, self.awaiting_seqno) {
                self.unacked_pubs.insert(seqno, packet_id);
                self.awaiting_seqno = Some(seqno + 1);
            }
        }
        debug!(
            routing_key = %routing_key,
            qos = ?publish.qos,
            packet_id = ?publish.packet_id,
            "Publishing to AMQP"
        );
        channel.basic_publish(
            &self.exchange,
            &routing_key,
            properties,
            publish.payload.clone(),
        )
    }

    /// Channel 1, opened on the first QoS-1 publish with confirm mode
    /// enabled and the sequence counter primed at 1.
    async fn confirm_channel(&mut self) -> Result<Arc<dyn AmqpChannel>> {
        if let Some(channel) = &self.channels[1] {
            return Ok(Arc::clone(channel));
        }
        let connection = self.amqp_connection()?;
        let channel = connection.open_channel().await?;
        channel.confirm_select().await?;
        debug!("Publisher-confirm channel opened");
        self.awaiting_seqno = Some(1);
        self.channels[1] = Some(Arc::clone(&channel));
        Ok(channel)
    }

    /// A `basic.deliver` from one of the subscription consumers.
    ///
    /// # Errors
    ///
    /// Fails when the consumer channel is gone or the frame channel is
    /// closed.
    pub async fn handle_delivery(&mut self, delivery: Delivery) -> Result<()> {
        let channel = self.consume_channel()?;
        channel.notify_received(delivery.delivery_tag);

        let dup = delivery.redelivered
            || matches!(delivery.headers.get(DUP_HEADER), Some(FieldValue::Bool(true)));
        let from_qos0_consumer =
            self.consumer_tags[0].as_deref() == Some(delivery.consumer_tag.as_str());
        let (delivery_qos, subscription_qos) = if from_qos0_consumer {
            (QoS::AtMostOnce, QoS::AtMostOnce)
        } else {
            let published_qos = match delivery.headers.get(PUBLISH_QOS_HEADER) {
                Some(FieldValue::Byte(qos)) => supported_qos(QoS::from(*qos)),
                _ => QoS::AtLeastOnce,
            };
            (published_qos, QoS::AtLeastOnce)
        };

        // A redelivered QoS-0 message would reach the client a second time
        // with no way to flag it; drop it instead.
        if dup && delivery_qos == QoS::AtMostOnce {
            debug!(
                delivery_tag = delivery.delivery_tag,
                "Dropping redelivered QoS-0 message"
            );
            if subscription_qos == QoS::AtLeastOnce {
                channel.basic_ack(delivery.delivery_tag)?;
            }
            return Ok(());
        }

        let packet_id = match delivery_qos {
            QoS::AtMostOnce => None,
            _ => Some(self.next_message_id()),
        };
        let publish = PublishPacket {
            topic_name: topic::amqp_to_mqtt(&delivery.routing_key),
            payload: delivery.payload.clone(),
            qos: delivery_qos,
            retain: false,
            dup,
            packet_id,
        };
        self.send_frame(Packet::Publish(publish))?;

        match packet_id {
            Some(packet_id) => {
                // Ack only once the client returns its PUBACK.
                self.awaiting_ack.insert(packet_id, delivery.delivery_tag);
            }
            None if subscription_qos == QoS::AtLeastOnce => {
                // Delivered at QoS 0; nothing more will come from the
                // client, settle now.
                channel.basic_ack(delivery.delivery_tag)?;
            }
            None => {}
        }
        Ok(())
    }

    /// A publisher confirm from the broker: translate into client PUBACKs,
    /// cumulatively when `multiple` is set.
    ///
    /// # Errors
    ///
    /// Fails only when the frame channel is closed.
    pub fn handle_confirm(&mut self, ack: ConfirmAck) -> Result<()> {
        if ack.multiple {
            while let Some((&seqno, &packet_id)) = self.unacked_pubs.first_key_value() {
                if seqno > ack.delivery_tag {
                    break;
                }
                self.unacked_pubs.remove(&seqno);
                self.send_frame(Packet::PubAck(PubAckPacket::new(packet_id)))?;
            }
            Ok(())
        } else if let Some(packet_id) = self.unacked_pubs.remove(&ack.delivery_tag) {
            self.send_frame(Packet::PubAck(PubAckPacket::new(packet_id)))
        } else {
            // Confirms for untracked publishes (no packet id) have nothing
            // to report to the client.
            debug!(seqno = ack.delivery_tag, "Confirm for untracked publish");
            Ok(())
        }
    }

    /// PUBACK from the client settles the matching AMQP delivery. Unknown
    /// packet ids are ignored: clients that ack twice, or ack a QoS
    /// downgrade, must not take the connection down.
    pub(super) fn handle_puback(&mut self, puback: &PubAckPacket) -> Result<()> {
        match self.awaiting_ack.remove(&puback.packet_id) {
            Some(delivery_tag) => {
                let channel = self.consume_channel()?;
                channel.basic_ack(delivery_tag)
            }
            None => {
                debug!(
                    packet_id = puback.packet_id,
                    "PUBACK for unknown packet id ignored"
                );
                Ok(())
            }
        }
    }
}
