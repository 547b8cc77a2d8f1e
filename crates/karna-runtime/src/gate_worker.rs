//! The gate worker – sole owner of the [`AccessGate`].
//!
//! The gate runs on a dedicated blocking thread because opening the door
//! holds the lock solenoid for the whole actuation delay. Everything else
//! talks to it through a cloneable [`GateHandle`]: commands go in over an
//! mpsc channel, answers come back on oneshot channels.
//!
//! Every state change is also announced on the [`EventBus`]:
//!
//! | Gate activity | Topic | Payload |
//! |---|---|---|
//! | new credential installed | `AccessGate` | `SessionSuperseded` (if one was pending), then `CredentialRequired` |
//! | keypad mismatch | `AccessGate` | `CredentialRejected` |
//! | door opened | `AccessGate` | `DoorOpened` with the authorization path |
//! | door failed | `SystemAlerts` | `Fault` |
//! | door opened, latch did not re-arm | `SystemAlerts` | `Fault` after `DoorOpened` |
//!
//! A verified credential additionally starts a [`VerificationNotifier`] task
//! on the runtime the worker was spawned from.

use std::sync::Arc;

use karna_kernel::{AccessGate, Attempt, IdentityOpen, SessionState};
use karna_middleware::{EventBus, Topic};
use karna_types::{DeliveryId, Event, EventPayload, KarnaError, OpenPath, Otp, VerificationOutcome};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::notifier::VerificationNotifier;

const SOURCE: &str = "karna-runtime::gate";
const QUEUE_DEPTH: usize = 32;

/// Requests understood by the gate worker.
#[derive(Debug)]
pub enum GateCommand {
    SetCredential {
        otp: Otp,
        delivery_id: DeliveryId,
        reply: oneshot::Sender<Option<DeliveryId>>,
    },
    Attempt {
        entered: String,
        reply: oneshot::Sender<Result<VerificationOutcome, KarnaError>>,
    },
    MatchesDeliveryId {
        candidate: DeliveryId,
        reply: oneshot::Sender<bool>,
    },
    OpenByDeliveryId {
        candidate: DeliveryId,
        reply: oneshot::Sender<Result<IdentityOpen, KarnaError>>,
    },
    State {
        reply: oneshot::Sender<SessionState>,
    },
}

/// Cloneable front door to the gate worker.
#[derive(Debug, Clone)]
pub struct GateHandle {
    tx: mpsc::Sender<GateCommand>,
}

impl GateHandle {
    /// Install a new pending session. Returns the delivery it replaced, if
    /// any. Returns as soon as the session is installed; entering the code
    /// is up to whichever surface listens for `CredentialRequired`.
    pub async fn set_credential(
        &self,
        otp: Otp,
        delivery_id: DeliveryId,
    ) -> Result<Option<DeliveryId>, KarnaError> {
        self.request(|reply| GateCommand::SetCredential {
            otp,
            delivery_id,
            reply,
        })
        .await
    }

    /// Submit a code typed on the keypad.
    pub async fn attempt(&self, entered: impl Into<String>) -> Result<VerificationOutcome, KarnaError> {
        let entered = entered.into();
        self.request(|reply| GateCommand::Attempt { entered, reply })
            .await?
    }

    pub async fn matches_delivery_id(&self, candidate: DeliveryId) -> Result<bool, KarnaError> {
        self.request(|reply| GateCommand::MatchesDeliveryId { candidate, reply })
            .await
    }

    /// Identity-only open request from a remote `open_door` command.
    pub async fn open_by_delivery_id(&self, candidate: DeliveryId) -> Result<IdentityOpen, KarnaError> {
        self.request(|reply| GateCommand::OpenByDeliveryId { candidate, reply })
            .await?
    }

    pub async fn state(&self) -> Result<SessionState, KarnaError> {
        self.request(|reply| GateCommand::State { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> GateCommand,
    ) -> Result<T, KarnaError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| KarnaError::Channel("gate worker has stopped".into()))?;
        rx.await
            .map_err(|_| KarnaError::Channel("gate worker dropped the request".into()))
    }
}

/// Move `gate` onto a blocking thread and return a handle to it.
///
/// The worker stops once every [`GateHandle`] has been dropped.
///
/// # Panics
///
/// Must be called from within a Tokio runtime.
pub fn spawn_gate_worker(
    gate: AccessGate,
    bus: EventBus,
    notifier: Arc<VerificationNotifier>,
) -> (GateHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(QUEUE_DEPTH);
    let runtime = Handle::current();
    let mut worker = GateWorker {
        gate,
        bus,
        notifier,
        runtime,
    };

    let task = tokio::task::spawn_blocking(move || {
        info!(policy = ?worker.gate.policy(), "gate worker started");
        while let Some(command) = rx.blocking_recv() {
            worker.handle(command);
        }
        info!("gate worker stopped");
    });

    (GateHandle { tx }, task)
}

struct GateWorker {
    gate: AccessGate,
    bus: EventBus,
    notifier: Arc<VerificationNotifier>,
    runtime: Handle,
}

impl GateWorker {
    // A dropped reply receiver only means the requester gave up waiting.
    fn handle(&mut self, command: GateCommand) {
        match command {
            GateCommand::SetCredential {
                otp,
                delivery_id,
                reply,
            } => {
                let _ = reply.send(self.set_credential(otp, delivery_id));
            }
            GateCommand::Attempt { entered, reply } => {
                let _ = reply.send(self.attempt(&entered));
            }
            GateCommand::MatchesDeliveryId { candidate, reply } => {
                let _ = reply.send(self.gate.matches_delivery_id(&candidate));
            }
            GateCommand::OpenByDeliveryId { candidate, reply } => {
                let _ = reply.send(self.open_by_delivery_id(candidate));
            }
            GateCommand::State { reply } => {
                let _ = reply.send(self.gate.state());
            }
        }
    }

    fn set_credential(&mut self, otp: Otp, delivery_id: DeliveryId) -> Option<DeliveryId> {
        let previous = self
            .gate
            .set_credential(otp, delivery_id.clone())
            .map(|old| old.delivery_id().clone());
        if let Some(previous) = &previous {
            self.publish(
                Topic::AccessGate,
                EventPayload::SessionSuperseded {
                    previous: previous.clone(),
                    current: delivery_id.clone(),
                },
            );
        }
        self.publish(Topic::AccessGate, EventPayload::CredentialRequired { delivery_id });
        previous
    }

    fn attempt(&mut self, entered: &str) -> Result<VerificationOutcome, KarnaError> {
        let attempt = self.gate.attempt(entered).inspect_err(|e| self.report_fault(e))?;
        let outcome = attempt.outcome();
        match attempt {
            Attempt::Verified(session) => {
                self.report_door_fault();
                self.publish(
                    Topic::AccessGate,
                    EventPayload::DoorOpened {
                        delivery_id: session.delivery_id().clone(),
                        path: OpenPath::Credential,
                    },
                );
                let notifier = self.notifier.clone();
                self.runtime.spawn(async move { notifier.notify(session).await });
            }
            Attempt::Rejected { delivery_id } => {
                self.publish(Topic::AccessGate, EventPayload::CredentialRejected { delivery_id });
            }
        }
        Ok(outcome)
    }

    fn open_by_delivery_id(&mut self, candidate: DeliveryId) -> Result<IdentityOpen, KarnaError> {
        let result = self
            .gate
            .open_by_delivery_id(&candidate)
            .inspect_err(|e| self.report_fault(e))?;
        if result == IdentityOpen::Opened {
            self.report_door_fault();
            self.publish(
                Topic::AccessGate,
                EventPayload::DoorOpened {
                    delivery_id: candidate,
                    path: OpenPath::DeliveryIdMatch,
                },
            );
        }
        Ok(result)
    }

    fn report_fault(&self, error: &KarnaError) {
        if let KarnaError::HardwareFault { component, details } = error {
            self.publish(
                Topic::SystemAlerts,
                EventPayload::Fault {
                    component: component.clone(),
                    message: details.clone(),
                },
            );
        }
    }

    /// The door opened, but something went wrong along the way.
    fn report_door_fault(&mut self) {
        if let Some(fault) = self.gate.take_door_fault() {
            self.report_fault(&fault);
        }
    }

    fn publish(&self, topic: Topic, payload: EventPayload) {
        let delivered = self.bus.publish_to(topic, Event::new(SOURCE, payload));
        debug!(?topic, subscribers = delivered, "gate event published");
    }
}
