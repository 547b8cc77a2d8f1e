//! In-process stand-ins for running without compartment hardware.
//!
//! [`SimDoor`] records every command it receives into a shared [`DoorLog`]
//! that stays readable after the door itself has been boxed and handed to
//! the access gate. This lets tests and headless deployments observe exactly
//! how many times the door was actuated.
//!
//! # Example
//!
//! ```rust
//! use karna_hal::{DoorActuator, SimDoor};
//! use karna_types::DoorCommand;
//!
//! let door = SimDoor::new("compartment_door");
//! let log = door.log();
//!
//! let mut boxed: Box<dyn DoorActuator> = Box::new(door);
//! boxed.actuate(DoorCommand::Open).expect("sim door always opens");
//!
//! assert_eq!(log.commands(), vec![DoorCommand::Open]);
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use karna_types::{DoorCommand, KarnaError};
use tracing::info;

use crate::door::DoorActuator;
use crate::relay::Relay;

// ────────────────────────────────────────────────────────────────────────────
// Shared command log
// ────────────────────────────────────────────────────────────────────────────

/// Cheaply cloneable record of the commands a [`SimDoor`] has performed.
#[derive(Debug, Clone, Default)]
pub struct DoorLog(Arc<Mutex<Vec<DoorCommand>>>);

impl DoorLog {
    pub fn commands(&self) -> Vec<DoorCommand> {
        self.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    fn push(&self, command: DoorCommand) {
        self.lock().push(command);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DoorCommand>> {
        // A poisoned log only means a test thread panicked mid-push.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub door
// ────────────────────────────────────────────────────────────────────────────

/// A simulated compartment door. Always succeeds after `delay`.
pub struct SimDoor {
    id: String,
    delay: Duration,
    log: DoorLog,
}

impl SimDoor {
    /// A door with no actuation delay.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            delay: Duration::ZERO,
            log: DoorLog::default(),
        }
    }

    /// Simulate the mechanical actuation time (builder-style).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Handle onto this door's command log.
    pub fn log(&self) -> DoorLog {
        self.log.clone()
    }
}

impl DoorActuator for SimDoor {
    fn id(&self) -> &str {
        &self.id
    }

    fn actuate(&mut self, command: DoorCommand) -> Result<(), KarnaError> {
        info!(door = %self.id, command = command.as_str(), "sim door actuating");
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.log.push(command);
        info!(door = %self.id, "sim door opened");
        Ok(())
    }

    fn last_command(&self) -> Option<DoorCommand> {
        self.log.lock().last().copied()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub relay
// ────────────────────────────────────────────────────────────────────────────

/// A simulated relay that records its current state. Always succeeds.
pub struct SimRelay {
    id: String,
    state: bool,
}

impl SimRelay {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: false,
        }
    }
}

impl Relay for SimRelay {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_state(&mut self, active: bool) -> Result<(), KarnaError> {
        self.state = active;
        Ok(())
    }

    fn state(&self) -> bool {
        self.state
    }
}
