//! Where the robot is asked to go.
//!
//! Locomotion is not part of Karna yet. [`PlaceholderNavigator`] records each
//! target and reports arrival at once, which is enough for the dispatcher to
//! complete the `start_delivery` flow end to end.

use std::sync::Mutex;

use async_trait::async_trait;
use karna_types::{DeliveryId, KarnaError};
use tracing::info;

/// A navigation goal. Locations are passed through exactly as the remote
/// command supplied them.
#[derive(Debug, Clone, PartialEq)]
pub enum NavTarget {
    Owner {
        delivery_id: Option<DeliveryId>,
        location: serde_json::Value,
    },
    Base {
        location: serde_json::Value,
    },
}

#[async_trait]
pub trait Navigator: Send + Sync {
    /// Drive to `target`, returning once the robot has arrived.
    async fn navigate_to(&self, target: NavTarget) -> Result<(), KarnaError>;
}

#[derive(Debug, Default)]
pub struct PlaceholderNavigator {
    targets: Mutex<Vec<NavTarget>>,
}

impl PlaceholderNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every target received so far, oldest first.
    pub fn targets(&self) -> Vec<NavTarget> {
        self.targets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Navigator for PlaceholderNavigator {
    async fn navigate_to(&self, target: NavTarget) -> Result<(), KarnaError> {
        info!(?target, "navigation not available, reporting immediate arrival");
        self.targets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(target);
        Ok(())
    }
}
