//! [`VerificationNotifier`] – tells the delivery backend a door was opened.
//!
//! The door opens before the backend hears about it, and a failed
//! notification never closes it again. Instead the notification is parked in
//! the [`Outbox`] and re-sent by [`VerificationNotifier::run`] every retry
//! interval until the backend acknowledges it or it runs out of attempts.
//!
//! Each send is the two-step exchange of [`DeliveryApi`]: the owner lookup
//! must succeed before `verify-otp` is issued.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use karna_kernel::DeliverySession;
use karna_memory::{Outbox, OutboxError, OutboxStatus};
use karna_middleware::{EventBus, Topic};
use karna_types::{DeliveryId, Event, EventPayload, KarnaError, Otp};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::delivery_api::DeliveryApi;

const SOURCE: &str = "karna-runtime::notifier";

/// Retry policy for queued notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// Total attempts, the first live one included.
    pub max_attempts: u32,
    /// How long delivered and abandoned entries are kept before a flush
    /// removes them.
    pub retention: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_attempts: 5,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// What one pass over the outbox achieved.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub still_pending: usize,
    pub abandoned: usize,
    /// Settled entries removed after the retention period.
    pub pruned: usize,
}

pub struct VerificationNotifier {
    api: Arc<dyn DeliveryApi>,
    outbox: Mutex<Outbox>,
    bus: EventBus,
    policy: RetryPolicy,
}

impl VerificationNotifier {
    pub fn new(api: Arc<dyn DeliveryApi>, outbox: Outbox, bus: EventBus, policy: RetryPolicy) -> Self {
        Self {
            api,
            outbox: Mutex::new(outbox),
            bus,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Report a verified session. A failure is queued, never returned.
    pub async fn notify(&self, session: DeliverySession) {
        let delivery_id = session.delivery_id().clone();
        match self.send(&delivery_id, session.otp()).await {
            Ok(()) => {
                info!(delivery_id = %delivery_id, "backend notified of verified delivery");
                self.publish(EventPayload::NotificationDelivered { delivery_id });
            }
            Err(e) => {
                let reason = e.to_string();
                match self.enqueue(&delivery_id, session.otp(), &reason) {
                    Ok(OutboxStatus::Abandoned) => self.abandon(&delivery_id, &reason),
                    Ok(_) => {
                        warn!(delivery_id = %delivery_id, error = %reason, "verification notification failed, queueing");
                        self.publish(EventPayload::NotificationQueued { delivery_id, reason });
                    }
                    Err(e) => {
                        error!(delivery_id = %delivery_id, error = %e, "could not queue verification notification");
                    }
                }
            }
        }
    }

    /// Owner lookup, then verify-otp. The second call is only made when the
    /// first one succeeded.
    async fn send(&self, delivery_id: &DeliveryId, otp: &Otp) -> Result<(), KarnaError> {
        let owner_id = self.api.owner_id(delivery_id).await?;
        debug!(delivery_id = %delivery_id, owner_id, "owner resolved");
        self.api.verify_otp(delivery_id, otp, &owner_id).await
    }

    /// Re-send every pending notification once.
    pub async fn flush(&self) -> Result<FlushReport, KarnaError> {
        let pending = self.lock().pending().map_err(storage)?;
        let mut report = FlushReport::default();

        for entry in pending {
            let delivery_id = DeliveryId::new(entry.delivery_id);
            let otp = Otp::new(entry.otp);
            match self.send(&delivery_id, &otp).await {
                Ok(()) => {
                    self.lock().mark_delivered(&entry.id).map_err(storage)?;
                    info!(delivery_id = %delivery_id, attempts = entry.attempts + 1, "queued notification delivered");
                    self.publish(EventPayload::NotificationDelivered { delivery_id });
                    report.delivered += 1;
                }
                Err(e) => {
                    let status = self
                        .lock()
                        .record_failure(&entry.id, &e.to_string(), self.policy.max_attempts)
                        .map_err(storage)?;
                    match status {
                        OutboxStatus::Abandoned => {
                            self.abandon(&delivery_id, &e.to_string());
                            report.abandoned += 1;
                        }
                        _ => {
                            debug!(delivery_id = %delivery_id, error = %e, "retry failed");
                            report.still_pending += 1;
                        }
                    }
                }
            }
        }

        report.pruned = self
            .lock()
            .prune_settled(self.policy.retention)
            .map_err(storage)?;
        if report.pruned > 0 {
            debug!(pruned = report.pruned, "settled outbox entries removed");
        }
        Ok(report)
    }

    /// Flush the outbox every [`RetryPolicy::interval`] until `shutdown`
    /// flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.policy.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a fresh failure is not
        // retried within the same instant.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.flush().await {
                        Ok(report) if report != FlushReport::default() => {
                            info!(?report, "outbox flushed");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "outbox flush failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("notification flusher stopped");
    }

    /// Number of notifications still waiting for the backend.
    pub fn pending_count(&self) -> Result<usize, KarnaError> {
        Ok(self.lock().pending().map_err(storage)?.len())
    }

    /// Park a failed live attempt. Returns the new entry's status.
    fn enqueue(&self, delivery_id: &DeliveryId, otp: &Otp, reason: &str) -> Result<OutboxStatus, KarnaError> {
        let outbox = self.lock();
        let id = outbox
            .enqueue(delivery_id.as_str(), otp.as_str(), reason)
            .map_err(storage)?;
        // The live attempt already counts against the budget.
        if self.policy.max_attempts <= 1 {
            return outbox
                .record_failure(&id, reason, self.policy.max_attempts)
                .map_err(storage);
        }
        Ok(OutboxStatus::Pending)
    }

    fn abandon(&self, delivery_id: &DeliveryId, reason: &str) {
        error!(delivery_id = %delivery_id, error = reason, "giving up on verification notification");
        self.bus.publish_to(
            Topic::SystemAlerts,
            Event::new(
                SOURCE,
                EventPayload::Fault {
                    component: "delivery_api".to_string(),
                    message: format!("backend never acknowledged delivery {delivery_id}: {reason}"),
                },
            ),
        );
    }

    fn publish(&self, payload: EventPayload) {
        self.bus.publish_to(Topic::Outbound, Event::new(SOURCE, payload));
    }

    fn lock(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn storage(e: OutboxError) -> KarnaError {
    KarnaError::Storage(e.to_string())
}
