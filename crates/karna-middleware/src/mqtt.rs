//! MQTT binding of the command channel.
//!
//! [`connect`] splits a broker connection into an [`MqttLink`] (the outbound
//! [`CommandLink`]) and an [`MqttListener`] that drives the connection and
//! hands every message on `robot/{robotId}/command` to a [`CommandHandler`].
//!
//! The listener processes one message at a time and never exits on a bad
//! payload. A lost or refused connection is logged and, unless a reconnect
//! delay is configured, ends the loop: the broker is not retried
//! automatically.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use karna_types::KarnaError;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
    Transport,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::link::{CommandHandler, CommandLink, command_topic};

/// Number of outbound requests buffered between the client and the loop.
const REQUEST_CAPACITY: usize = 16;

/// Everything needed to open the broker connection.
#[derive(Clone)]
pub struct MqttSettings {
    pub robot_id: String,
    pub broker: String,
    pub port: u16,
    pub keepalive: Duration,
    /// Left empty, a random `karna-<uuid>` id is used.
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
    /// `None` stops the listener on the first connection failure.
    pub reconnect_delay: Option<Duration>,
}

impl std::fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSettings")
            .field("robot_id", &self.robot_id)
            .field("broker", &self.broker)
            .field("port", &self.port)
            .field("keepalive", &self.keepalive)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("use_tls", &self.use_tls)
            .field("reconnect_delay", &self.reconnect_delay)
            .finish()
    }
}

impl MqttSettings {
    fn options(&self) -> MqttOptions {
        let client_id = if self.client_id.trim().is_empty() {
            format!("karna-{}", Uuid::new_v4().simple())
        } else {
            self.client_id.clone()
        };
        let mut options = MqttOptions::new(client_id, self.broker.clone(), self.port);
        options.set_keep_alive(self.keepalive);
        if !self.username.is_empty() {
            options.set_credentials(self.username.clone(), self.password.clone());
        }
        if self.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

/// Open a connection described by `settings`.
///
/// Nothing touches the network until [`MqttListener::run`] is polled.
pub fn connect(settings: &MqttSettings) -> (MqttLink, MqttListener) {
    let (client, eventloop) = AsyncClient::new(settings.options(), REQUEST_CAPACITY);
    (
        MqttLink { client },
        MqttListener {
            eventloop,
            command_topic: command_topic(&settings.robot_id),
            reconnect_delay: settings.reconnect_delay,
        },
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// Outbound half of an MQTT connection.
#[derive(Clone)]
pub struct MqttLink {
    client: AsyncClient,
}

#[async_trait]
impl CommandLink for MqttLink {
    async fn subscribe(&self, topic: &str) -> Result<(), KarnaError> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| KarnaError::Transport(format!("subscribe {topic}: {e}")))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), KarnaError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| KarnaError::Transport(format!("publish {topic}: {e}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// Drives the MQTT connection and feeds the command handler.
pub struct MqttListener {
    eventloop: EventLoop,
    command_topic: String,
    reconnect_delay: Option<Duration>,
}

impl MqttListener {
    pub fn command_topic(&self) -> &str {
        &self.command_topic
    }

    /// Run until `shutdown` flips to `true`, or until the connection fails
    /// and no reconnect delay is configured.
    ///
    /// # Errors
    ///
    /// Returns [`KarnaError::Transport`] describing the connection failure
    /// that ended the loop.
    pub async fn run(
        mut self,
        handler: Arc<dyn CommandHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), KarnaError> {
        info!(topic = %self.command_topic, "starting MQTT loop");
        let mut connected = false;

        loop {
            let polled = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("MQTT loop shutting down");
                        return Ok(());
                    }
                    continue;
                }
                polled = self.eventloop.poll() => polled,
            };

            let failure = match polled {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        connected = true;
                        handler.on_connect(Ok(())).await;
                        continue;
                    }
                    handler.on_connect(Err(format!("{:?}", ack.code))).await;
                    KarnaError::Transport(format!("connection refused: {:?}", ack.code))
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if publish.topic == self.command_topic {
                        handler.on_command(&publish.payload).await;
                    } else {
                        debug!(topic = %publish.topic, "ignoring message on unexpected topic");
                    }
                    continue;
                }
                Ok(_) => continue,
                Err(ConnectionError::ConnectionRefused(code)) => {
                    handler.on_connect(Err(format!("{code:?}"))).await;
                    KarnaError::Transport(format!("connection refused: {code:?}"))
                }
                Err(e) => {
                    error!(error = %e, "MQTT connection error");
                    // Unreachable broker, TLS or DNS failure: the attempt
                    // itself failed.
                    if !connected {
                        handler.on_connect(Err(e.to_string())).await;
                    }
                    KarnaError::Transport(e.to_string())
                }
            };

            connected = false;
            if !Self::retry_or_stop(self.reconnect_delay, failure, &mut shutdown).await? {
                info!("MQTT loop shutting down");
                return Ok(());
            }
        }
    }

    /// Wait out the reconnect delay, or give up with `err` when none is
    /// configured. Returns `false` when shutdown arrives during the wait.
    async fn retry_or_stop(
        reconnect_delay: Option<Duration>,
        err: KarnaError,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool, KarnaError> {
        match reconnect_delay {
            Some(delay) => {
                warn!(error = %err, ?delay, "reconnecting to broker after delay");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => Ok(true),
                    changed = shutdown.changed() => Ok(changed.is_ok() && !*shutdown.borrow()),
                }
            }
            None => {
                error!(error = %err, "broker connection lost; automatic reconnect disabled");
                Err(err)
            }
        }
    }
}
