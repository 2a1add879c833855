//! MQTT topic ↔ AMQP routing-key translation.
//!
//! MQTT separates levels with `/` and uses `+` as the single-level
//! wildcard; AMQP topic exchanges use `.` and `*`. The multi-level
//! wildcard `#` is the same on both sides.

/// Translate an MQTT topic (or filter) into an AMQP routing key.
#[must_use]
pub fn mqtt_to_amqp(topic: &str) -> String {
    topic
        .chars()
        .map(|c| match c {
            '/' => '.',
            '+' => '*',
            other => other,
        })
        .collect()
}

/// Translate an AMQP routing key back into an MQTT topic.
#[must_use]
pub fn amqp_to_mqtt(routing_key: &str) -> String {
    routing_key
        .chars()
        .map(|c| match c {
            '.' => '/',
            '*' => '+',
            other => other,
        })
        .collect()
}
