//! `karna coordinator` – the delivery process.
//!
//! Wires the door, the gate worker, the notifier and the command dispatcher
//! together, then serves the MQTT command topic and the terminal keypad
//! until Ctrl-C.

use std::sync::Arc;

use karna_hal::{RelayDoor, SimRelay};
use karna_kernel::AccessGate;
use karna_memory::Outbox;
use karna_middleware::{ActivityChannel, EventBus, MqttListener, Topic, TopicReceiver, mqtt};
use karna_runtime::{
    CommandDispatcher, GateHandle, HttpDeliveryApi, PlaceholderNavigator, VerificationNotifier,
    spawn_gate_worker,
};
use karna_types::{Event, EventPayload, KarnaError};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::keypad::KeypadSurface;

pub struct Coordinator {
    bus: EventBus,
    gate: GateHandle,
    gate_task: JoinHandle<()>,
    notifier: Arc<VerificationNotifier>,
    dispatcher: Arc<CommandDispatcher>,
    listener: MqttListener,
    activity: ActivityChannel,
}

impl Coordinator {
    /// Assemble every component from `cfg`. Must be called inside a Tokio
    /// runtime; nothing touches the network yet.
    ///
    /// # Errors
    ///
    /// - [`KarnaError::Storage`] if the outbox cannot be opened.
    /// - [`KarnaError::Config`] if `api_base_url` is not a URL.
    pub fn build(cfg: &Config) -> Result<Self, KarnaError> {
        let bus = EventBus::default();

        let outbox = match &cfg.notify.outbox_path {
            Some(path) => Outbox::open(path),
            None => {
                warn!("no outbox_path configured; undelivered notifications are lost on exit");
                Outbox::open_in_memory()
            }
        }
        .map_err(|e| KarnaError::Storage(e.to_string()))?;

        let api = Arc::new(HttpDeliveryApi::new(&cfg.api_base_url)?);
        let notifier = Arc::new(VerificationNotifier::new(
            api,
            outbox,
            bus.clone(),
            cfg.retry_policy(),
        ));

        let door = RelayDoor::new(
            "compartment_door",
            SimRelay::new("lock_solenoid"),
            cfg.door_actuation(),
        );
        let (gate, gate_task) = spawn_gate_worker(
            AccessGate::new(Box::new(door), cfg.open_door_policy),
            bus.clone(),
            notifier.clone(),
        );

        let (link, listener) = mqtt::connect(&cfg.mqtt_settings());
        let dispatcher = Arc::new(CommandDispatcher::new(
            cfg.robot_id.clone(),
            Arc::new(link),
            gate.clone(),
            Arc::new(PlaceholderNavigator::new()),
            bus.clone(),
        ));

        Ok(Self {
            bus,
            gate,
            gate_task,
            notifier,
            dispatcher,
            listener,
            activity: ActivityChannel::new(&cfg.activity_file),
        })
    }

    /// Serve until `shutdown` flips to `true`. A broker connection that ends
    /// without a reconnect delay is logged; the keypad stays up.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Coordinator {
            bus,
            gate,
            gate_task,
            notifier,
            dispatcher,
            listener,
            activity,
        } = self;
        info!(topic = %listener.command_topic(), "coordinator starting");

        let flusher = tokio::spawn(notifier.run(shutdown.clone()));
        let operator_log = tokio::spawn(log_operator_events(
            bus.subscribe_to(Topic::Outbound),
            bus.subscribe_to(Topic::SystemAlerts),
            shutdown.clone(),
        ));
        let keypad = tokio::spawn(
            KeypadSurface::new(gate, activity, std::io::stdout()).run(
                tokio::io::BufReader::new(tokio::io::stdin()),
                bus.subscribe_to(Topic::AccessGate),
                shutdown.clone(),
            ),
        );

        match listener.run(dispatcher.clone(), shutdown.clone()).await {
            Ok(()) => {}
            Err(e) => {
                error!(error = %e, "command listener stopped; remote commands unavailable");
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            }
        }

        // The gate worker exits once the dispatcher and keypad have let go
        // of their handles.
        drop(dispatcher);
        for (name, task) in [("keypad", keypad), ("operator log", operator_log), ("flusher", flusher)] {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "task ended abnormally");
            }
        }
        if let Err(e) = gate_task.await {
            warn!(error = %e, "gate worker ended abnormally");
        }
        info!("coordinator stopped");
    }
}

/// Mirror delivery and fault events into the log for the operator.
async fn log_operator_events(
    mut outbound: TopicReceiver,
    mut alerts: TopicReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let received = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            event = outbound.recv() => event,
            event = alerts.recv() => event,
        };
        match received {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "operator log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &Event) {
    match &event.payload {
        EventPayload::ArrivalPublished { delivery_id } => {
            info!(delivery_id = %delivery_id, "arrival announced");
        }
        EventPayload::NotificationDelivered { delivery_id } => {
            info!(delivery_id = %delivery_id, "backend notified of verified delivery");
        }
        EventPayload::NotificationQueued {
            delivery_id,
            reason,
        } => {
            warn!(delivery_id = %delivery_id, reason, "notification queued for retry");
        }
        EventPayload::Fault { component, message } => {
            error!(component, message, source = %event.source, "fault reported");
        }
        other => info!(payload = ?other, source = %event.source, "event"),
    }
}
