//! Keepalive response, will publication and connection teardown.

use super::Processor;
use crate::auth::TopicAccess;
use crate::error::Result;
use mqtt3_protocol::{Packet, PublishPacket};
use tracing::{debug, warn};

impl Processor {
    pub(super) fn handle_pingreq(&self) -> Result<()> {
        self.send_frame(Packet::PingResp)
    }

    /// Publish the will, if one was registered at CONNECT time.
    ///
    /// Called by the connection owner on abnormal termination (socket
    /// closure, keepalive expiry), never after a clean DISCONNECT, which
    /// already revoked the will. Best-effort: an access refusal is logged
    /// and skipped. The channel pair is closed on the way out, publisher
    /// side first.
    pub async fn send_will(&mut self) {
        if let Some(will) = self.will_msg.take() {
            match self.check_topic_access(&will.topic, TopicAccess::Write).await {
                Ok(()) => {
                    let publish = PublishPacket {
                        topic_name: will.topic.clone(),
                        payload: will.payload.clone(),
                        qos: will.qos,
                        retain: will.retain,
                        dup: false,
                        packet_id: None,
                    };
                    if let Err(error) = self.publish_with_retain(&publish).await {
                        warn!(topic = %will.topic, %error, "Will publication failed");
                    } else {
                        debug!(topic = %will.topic, "Will published");
                    }
                }
                Err(error) => {
                    warn!(topic = %will.topic, %error, "Will publication refused");
                }
            }
            if let Some(channel) = self.channels[1].take() {
                let _ = channel.close().await;
            }
            if let Some(channel) = self.channels[0].take() {
                let _ = channel.close().await;
            }
        }
    }

    /// Tear down the AMQP side. Idempotent, swallows errors: teardown runs
    /// on every exit path and the broker may already be gone.
    pub async fn close_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Some(client_id) = self.client_id.clone() {
                if let Err(error) = self.registry.unregister(&client_id).await {
                    debug!(client_id = %client_id, %error, "Collector unregister failed");
                }
            }
            self.channels = [None, None];
            if let Err(error) = connection.close().await {
                debug!(%error, "AMQP connection close failed");
            }
            debug!(client_id = ?self.client_id, "Connection closed");
        }
    }
}
