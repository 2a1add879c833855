//! Subscription queue management, SUBSCRIBE and UNSUBSCRIBE.

use super::{Processor, qos_index, supported_qos};
use crate::amqp::{FieldTable, FieldValue, QueueDeclare, QUEUE_TTL_ARGUMENT};
use crate::auth::TopicAccess;
use crate::error::Result;
use crate::topic;
use mqtt3_protocol::{
    Packet, PublishPacket, QoS, SubAckPacket, SubscribePacket, UnsubAckPacket, UnsubscribePacket,
};
use std::sync::Arc;
use tracing::debug;

/// Name of the non-durable queue feeding a client's QoS-0 subscriptions.
#[must_use]
pub fn qos0_queue_name(client_id: &str) -> String {
    format!("mqtt-subscription-{client_id}qos0")
}

/// Name of the durable queue feeding a client's QoS-1 subscriptions.
#[must_use]
pub fn qos1_queue_name(client_id: &str) -> String {
    format!("mqtt-subscription-{client_id}qos1")
}

fn queue_name_for(client_id: &str, qos: QoS) -> String {
    match qos {
        QoS::AtMostOnce => qos0_queue_name(client_id),
        _ => qos1_queue_name(client_id),
    }
}

impl Processor {
    /// Make sure the subscription queue for `qos` exists and is being
    /// consumed; returns the queue name.
    ///
    /// The QoS-0 queue is transient and consumed without acks; the QoS-1
    /// queue is durable (auto-deleted for clean sessions) and consumed
    /// with manual acks. Re-entry with an active consumer is a no-op.
    pub(super) async fn ensure_queue(&mut self, qos: QoS) -> Result<String> {
        let queue = queue_name_for(self.client_id_str()?, qos);
        let index = qos_index(qos);
        if self.consumer_tags[index].is_some() {
            return Ok(queue);
        }

        let declare = match qos {
            QoS::AtMostOnce => QueueDeclare {
                queue: queue.clone(),
                durable: false,
                auto_delete: true,
                ..QueueDeclare::default()
            },
            _ => {
                let mut arguments = FieldTable::new();
                if !self.clean_session {
                    if let Some(ttl_ms) = self.config.subscription_ttl_ms {
                        arguments.insert(
                            QUEUE_TTL_ARGUMENT,
                            FieldValue::Long(i64::try_from(ttl_ms).unwrap_or(i64::MAX)),
                        );
                    }
                }
                QueueDeclare {
                    queue: queue.clone(),
                    durable: true,
                    auto_delete: self.clean_session,
                    arguments,
                    ..QueueDeclare::default()
                }
            }
        };

        let channel = self.consume_channel()?;
        channel.queue_declare(declare).await?;
        let no_ack = qos == QoS::AtMostOnce;
        let consumer_tag = channel.basic_consume(&queue, no_ack).await?;
        debug!(
            queue = %queue,
            consumer_tag = %consumer_tag,
            no_ack,
            "Subscription consumer started"
        );
        self.consumer_tags[index] = Some(consumer_tag);
        Ok(queue)
    }

    pub(super) async fn handle_subscribe(&mut self, subscribe: SubscribePacket) -> Result<()> {
        // All filters are vetted before any binding happens; one refusal
        // fails the whole SUBSCRIBE and the connection.
        for filter in &subscribe.filters {
            self.check_topic_access(&filter.filter, TopicAccess::Read)
                .await?;
        }

        let mut granted = Vec::with_capacity(subscribe.filters.len());
        for filter in &subscribe.filters {
            let qos = supported_qos(filter.qos);
            let queue = self.ensure_queue(qos).await?;
            let routing_key = topic::mqtt_to_amqp(&filter.filter);
            let channel = self.consume_channel()?;
            channel
                .queue_bind(&queue, &self.exchange, &routing_key)
                .await?;
            self.subscriptions
                .entry(filter.filter.clone())
                .or_default()
                .insert(0, qos);
            granted.push(qos);
        }
        debug!(
            packet_id = subscribe.packet_id,
            filters = subscribe.filters.len(),
            "Subscriptions established"
        );

        self.send_frame(Packet::SubAck(SubAckPacket::new(
            subscribe.packet_id,
            granted.clone(),
        )))?;
        self.send_retained(&subscribe, &granted).await
    }

    /// Replay retained messages for freshly subscribed filters.
    ///
    /// Packet ids for QoS-1 replays start at the subscribe packet id or
    /// the current counter, whichever is higher, and the counter is left
    /// at that watermark afterwards.
    async fn send_retained(
        &mut self,
        subscribe: &SubscribePacket,
        granted: &[QoS],
    ) -> Result<()> {
        let retainer = match &self.retainer {
            Some(retainer) => Arc::clone(retainer),
            None => return Ok(()),
        };
        let watermark = subscribe.packet_id.max(self.message_id);
        self.message_id = watermark.max(1);

        for (filter, granted_qos) in subscribe.filters.iter().zip(granted) {
            for message in retainer.fetch(&filter.filter).await {
                let qos = (*granted_qos).min(message.qos);
                let packet_id = match qos {
                    QoS::AtMostOnce => None,
                    _ => Some(self.next_message_id()),
                };
                let publish = PublishPacket {
                    topic_name: filter.filter.clone(),
                    payload: message.payload.clone(),
                    qos,
                    retain: true,
                    dup: false,
                    packet_id,
                };
                debug!(
                    topic = %filter.filter,
                    qos = ?qos,
                    packet_id = ?packet_id,
                    "Replaying retained message"
                );
                self.send_frame(Packet::Publish(publish))?;
            }
        }
        Ok(())
    }

    pub(super) async fn handle_unsubscribe(
        &mut self,
        unsubscribe: UnsubscribePacket,
    ) -> Result<()> {
        let client_id = self.client_id_str()?.to_string();
        let channel = self.consume_channel()?;
        for filter in &unsubscribe.filters {
            if let Some(mut qos_list) = self.subscriptions.remove(filter) {
                // Repeated subscribes may have stacked duplicates; unbind
                // once per distinct QoS level.
                qos_list.sort_unstable();
                qos_list.dedup();
                let routing_key = topic::mqtt_to_amqp(filter);
                for qos in qos_list {
                    let queue = queue_name_for(&client_id, qos);
                    channel
                        .queue_unbind(&queue, &self.exchange, &routing_key)
                        .await?;
                }
                debug!(filter = %filter, "Unsubscribed");
            }
        }
        self.send_frame(Packet::UnsubAck(UnsubAckPacket::new(
            unsubscribe.packet_id,
        )))
    }
}
