//! [`CommandDispatcher`] – turns remote commands into gate and navigation
//! requests.
//!
//! | Action | Effect |
//! |---|---|
//! | `start_delivery` | navigate to `ownerLocation`, then publish `{"deliveryId", "message": "I have arrived"}` on `robot/{id}/arrival` |
//! | `set_otp` | install `(otp, deliveryId)` as the pending session, replacing any other |
//! | `open_door` | open on `deliveryId` alone if it names the pending session and policy allows |
//! | `go_to_base` | navigate to `baseLocation` |
//!
//! Nothing here waits for a human: `set_otp` returns as soon as the gate
//! worker has installed the session. A bad payload or a failed action is
//! logged and the listener moves on to the next message.

use std::sync::Arc;

use async_trait::async_trait;
use karna_kernel::IdentityOpen;
use karna_middleware::{CommandHandler, CommandLink, EventBus, Topic, arrival_topic, command_topic};
use karna_types::{ArrivalMessage, CommandAction, CommandMessage, DeliveryId, Event, EventPayload, KarnaError};
use tracing::{debug, error, info, warn};

use crate::gate_worker::GateHandle;
use crate::navigation::{NavTarget, Navigator};

const SOURCE: &str = "karna-runtime::dispatcher";

/// What a successfully dispatched command did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Arrived and told the broker.
    ArrivalPublished(DeliveryId),
    /// Arrived, but the command named no delivery to announce.
    ArrivalSkipped,
    CredentialSet { superseded: Option<DeliveryId> },
    /// Result of an identity-only open request.
    DoorRequest(IdentityOpen),
    ReturnedToBase,
}

pub struct CommandDispatcher {
    robot_id: String,
    link: Arc<dyn CommandLink>,
    gate: GateHandle,
    navigator: Arc<dyn Navigator>,
    bus: EventBus,
}

impl CommandDispatcher {
    pub fn new(
        robot_id: impl Into<String>,
        link: Arc<dyn CommandLink>,
        gate: GateHandle,
        navigator: Arc<dyn Navigator>,
        bus: EventBus,
    ) -> Self {
        Self {
            robot_id: robot_id.into(),
            link,
            gate,
            navigator,
            bus,
        }
    }

    /// Carry out one parsed command.
    ///
    /// # Errors
    ///
    /// - [`KarnaError::MissingField`] when the action's required field is
    ///   absent.
    /// - Whatever the gate, the navigator or the link reported.
    pub async fn dispatch(&self, msg: CommandMessage) -> Result<DispatchOutcome, KarnaError> {
        match msg.action {
            CommandAction::StartDelivery => self.start_delivery(msg).await,
            CommandAction::SetOtp => {
                let otp = msg.require_otp()?.clone();
                let delivery_id = msg.require_delivery_id()?.clone();
                let superseded = self.gate.set_credential(otp, delivery_id).await?;
                Ok(DispatchOutcome::CredentialSet { superseded })
            }
            CommandAction::OpenDoor => {
                let delivery_id = msg.require_delivery_id()?.clone();
                let result = self.gate.open_by_delivery_id(delivery_id).await?;
                Ok(DispatchOutcome::DoorRequest(result))
            }
            CommandAction::GoToBase => {
                let location = msg.base_location.ok_or(KarnaError::MissingField {
                    action: CommandAction::GoToBase.as_str(),
                    field: "baseLocation",
                })?;
                self.navigator.navigate_to(NavTarget::Base { location }).await?;
                Ok(DispatchOutcome::ReturnedToBase)
            }
        }
    }

    async fn start_delivery(&self, msg: CommandMessage) -> Result<DispatchOutcome, KarnaError> {
        let location = msg.owner_location.ok_or(KarnaError::MissingField {
            action: CommandAction::StartDelivery.as_str(),
            field: "ownerLocation",
        })?;
        self.navigator
            .navigate_to(NavTarget::Owner {
                delivery_id: msg.delivery_id.clone(),
                location,
            })
            .await?;

        let Some(delivery_id) = msg.delivery_id else {
            warn!("arrived, but start_delivery named no deliveryId; arrival notice not sent");
            return Ok(DispatchOutcome::ArrivalSkipped);
        };

        let body = serde_json::to_vec(&ArrivalMessage::arrived(delivery_id.clone()))
            .map_err(|e| KarnaError::Transport(format!("encode arrival: {e}")))?;
        self.link.publish(&arrival_topic(&self.robot_id), body).await?;
        info!(delivery_id = %delivery_id, "arrival published");
        self.bus.publish_to(
            Topic::Outbound,
            Event::new(
                SOURCE,
                EventPayload::ArrivalPublished {
                    delivery_id: delivery_id.clone(),
                },
            ),
        );
        Ok(DispatchOutcome::ArrivalPublished(delivery_id))
    }
}

#[async_trait]
impl CommandHandler for CommandDispatcher {
    async fn on_connect(&self, result: Result<(), String>) {
        match result {
            Ok(()) => {
                let topic = command_topic(&self.robot_id);
                info!(topic = %topic, "connected to broker");
                if let Err(e) = self.link.subscribe(&topic).await {
                    error!(topic = %topic, error = %e, "subscribe failed");
                }
            }
            Err(reason) => {
                error!(reason = %reason, "broker refused connection");
                self.bus.publish_to(
                    Topic::SystemAlerts,
                    Event::new(
                        SOURCE,
                        EventPayload::Fault {
                            component: "mqtt".to_string(),
                            message: reason,
                        },
                    ),
                );
            }
        }
    }

    async fn on_command(&self, payload: &[u8]) {
        let msg = match CommandMessage::parse(payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "dropping malformed command");
                return;
            }
        };
        let action = msg.action.as_str();
        debug!(action, delivery_id = ?msg.delivery_id, "command received");
        match self.dispatch(msg).await {
            Ok(outcome) => info!(action, ?outcome, "command handled"),
            Err(e) => warn!(action, error = %e, "command failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate_worker::spawn_gate_worker;
    use crate::navigation::PlaceholderNavigator;
    use crate::notifier::tests::FakeApi;
    use crate::notifier::{RetryPolicy, VerificationNotifier};
    use karna_hal::{DoorLog, SimDoor};
    use karna_kernel::{AccessGate, OpenDoorPolicy, SessionState};
    use karna_memory::Outbox;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLink {
        subscriptions: Mutex<Vec<String>>,
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl CommandLink for RecordingLink {
        async fn subscribe(&self, topic: &str) -> Result<(), KarnaError> {
            self.subscriptions.lock().unwrap().push(topic.to_string());
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), KarnaError> {
            self.published.lock().unwrap().push((topic.to_string(), payload));
            Ok(())
        }
    }

    struct Rig {
        dispatcher: CommandDispatcher,
        link: Arc<RecordingLink>,
        nav: Arc<PlaceholderNavigator>,
        door: DoorLog,
        gate: GateHandle,
        bus: EventBus,
    }

    fn rig() -> Rig {
        let bus = EventBus::default();
        let door = SimDoor::new("compartment_door");
        let log = door.log();
        let notifier = Arc::new(VerificationNotifier::new(
            Arc::new(FakeApi::default()),
            Outbox::open_in_memory().unwrap(),
            bus.clone(),
            RetryPolicy::default(),
        ));
        let (gate, _task) = spawn_gate_worker(
            AccessGate::new(Box::new(door), OpenDoorPolicy::default()),
            bus.clone(),
            notifier,
        );
        let link = Arc::new(RecordingLink::default());
        let nav = Arc::new(PlaceholderNavigator::new());
        let dispatcher = CommandDispatcher::new("karna-01", link.clone(), gate.clone(), nav.clone(), bus.clone());
        Rig {
            dispatcher,
            link,
            nav,
            door: log,
            gate,
            bus,
        }
    }

    #[tokio::test]
    async fn on_connect_subscribes_to_command_topic() {
        let r = rig();
        r.dispatcher.on_connect(Ok(())).await;
        assert_eq!(
            *r.link.subscriptions.lock().unwrap(),
            vec!["robot/karna-01/command".to_string()]
        );
    }

    #[tokio::test]
    async fn refused_connection_raises_alert_without_subscribing() {
        let r = rig();
        let mut alerts = r.bus.subscribe_to(Topic::SystemAlerts);
        r.dispatcher.on_connect(Err("NotAuthorized".into())).await;
        assert!(r.link.subscriptions.lock().unwrap().is_empty());
        assert!(matches!(
            alerts.recv().await.unwrap().payload,
            EventPayload::Fault { component, .. } if component == "mqtt"
        ));
    }

    #[tokio::test]
    async fn start_delivery_navigates_then_announces_arrival() {
        let r = rig();
        r.dispatcher
            .on_command(br#"{"action":"start_delivery","deliveryId":"D1","ownerLocation":{"lat":1.0,"lng":2.0}}"#)
            .await;

        assert_eq!(r.nav.targets().len(), 1);
        let published = r.link.published.lock().unwrap().clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "robot/karna-01/arrival");
        let body: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(body, serde_json::json!({"deliveryId": "D1", "message": "I have arrived"}));
    }

    #[tokio::test]
    async fn start_delivery_without_delivery_id_skips_arrival() {
        let r = rig();
        let msg = CommandMessage::parse(br#"{"action":"start_delivery","ownerLocation":"gate 3"}"#).unwrap();
        assert_eq!(r.dispatcher.dispatch(msg).await.unwrap(), DispatchOutcome::ArrivalSkipped);
        assert!(r.link.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_delivery_requires_owner_location() {
        let r = rig();
        let msg = CommandMessage::parse(br#"{"action":"start_delivery","deliveryId":"D1"}"#).unwrap();
        assert_eq!(
            r.dispatcher.dispatch(msg).await.unwrap_err(),
            KarnaError::MissingField {
                action: "start_delivery",
                field: "ownerLocation"
            }
        );
        assert!(r.nav.targets().is_empty());
    }

    #[tokio::test]
    async fn set_otp_installs_session_without_blocking() {
        let r = rig();
        let msg = CommandMessage::parse(br#"{"action":"set_otp","otp":"4321","deliveryId":"D1"}"#).unwrap();
        assert_eq!(
            r.dispatcher.dispatch(msg).await.unwrap(),
            DispatchOutcome::CredentialSet { superseded: None }
        );

        // The listener is free again; a second set_otp replaces the first.
        let msg = CommandMessage::parse(br#"{"action":"set_otp","otp":9999,"deliveryId":2}"#).unwrap();
        assert_eq!(
            r.dispatcher.dispatch(msg).await.unwrap(),
            DispatchOutcome::CredentialSet {
                superseded: Some(DeliveryId::new("D1"))
            }
        );
        assert_eq!(
            r.gate.state().await.unwrap(),
            SessionState::Pending {
                delivery_id: DeliveryId::new("2")
            }
        );
    }

    #[tokio::test]
    async fn set_otp_missing_otp_is_rejected() {
        let r = rig();
        let msg = CommandMessage::parse(br#"{"action":"set_otp","deliveryId":"D1"}"#).unwrap();
        assert!(matches!(
            r.dispatcher.dispatch(msg).await,
            Err(KarnaError::MissingField { field: "otp", .. })
        ));
        assert_eq!(r.gate.state().await.unwrap(), SessionState::Unset);
    }

    #[tokio::test]
    async fn open_door_with_active_delivery_opens_via_identity_path() {
        let r = rig();
        r.dispatcher
            .on_command(br#"{"action":"set_otp","otp":"4321","deliveryId":"D1"}"#)
            .await;
        r.dispatcher
            .on_command(br#"{"action":"open_door","deliveryId":"D1"}"#)
            .await;
        assert_eq!(r.door.count(), 1);

        // Unknown delivery: nothing happens.
        let msg = CommandMessage::parse(br#"{"action":"open_door","deliveryId":"D9"}"#).unwrap();
        assert_eq!(
            r.dispatcher.dispatch(msg).await.unwrap(),
            DispatchOutcome::DoorRequest(IdentityOpen::NoMatch)
        );
        assert_eq!(r.door.count(), 1);
    }

    #[tokio::test]
    async fn go_to_base_records_base_target() {
        let r = rig();
        r.dispatcher
            .on_command(br#"{"action":"go_to_base","baseLocation":"dock-A"}"#)
            .await;
        assert_eq!(
            r.nav.targets(),
            vec![NavTarget::Base {
                location: serde_json::json!("dock-A")
            }]
        );
    }

    #[tokio::test]
    async fn malformed_payloads_are_dropped() {
        let r = rig();
        r.dispatcher.on_command(b"not json").await;
        r.dispatcher.on_command(br#"{"action":"self_destruct"}"#).await;
        r.dispatcher.on_command(br#"{"action":"go_to_base"}"#).await;
        assert!(r.nav.targets().is_empty());
        assert!(r.link.published.lock().unwrap().is_empty());
        assert_eq!(r.door.count(), 0);
    }
}
