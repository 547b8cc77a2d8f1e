//! The seam between the remote command channel and the coordinator.
//!
//! Karna never speaks MQTT directly from its dispatch logic. The dispatcher
//! implements [`CommandHandler`] and talks back through a [`CommandLink`];
//! [`MqttLink`][crate::mqtt::MqttLink] is the production binding and tests
//! substitute an in-memory recorder.

use async_trait::async_trait;
use karna_types::KarnaError;

/// Inbound command topic for `robot_id`.
pub fn command_topic(robot_id: &str) -> String {
    format!("robot/{robot_id}/command")
}

/// Outbound arrival topic for `robot_id`.
pub fn arrival_topic(robot_id: &str) -> String {
    format!("robot/{robot_id}/arrival")
}

/// Outbound half of the command channel.
#[async_trait]
pub trait CommandLink: Send + Sync {
    /// Subscribe to `topic`.
    async fn subscribe(&self, topic: &str) -> Result<(), KarnaError>;

    /// Publish `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), KarnaError>;
}

/// Receiver of connection results and inbound command payloads.
///
/// The listener awaits each call before polling for the next message, so a
/// handler must not wait on a human or on long-running work.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Called after every connection attempt; `Err` carries the broker's
    /// refusal reason or the transport error that stopped the attempt.
    async fn on_connect(&self, result: Result<(), String>);

    /// Called with the raw body of each message on the command topic.
    async fn on_command(&self, payload: &[u8]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_embed_robot_id() {
        assert_eq!(command_topic("karna-01"), "robot/karna-01/command");
        assert_eq!(arrival_topic("karna-01"), "robot/karna-01/arrival");
    }
}
