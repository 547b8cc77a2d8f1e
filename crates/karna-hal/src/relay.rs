//! Generic `Relay` trait for discrete on/off hardware (lock solenoids, power
//! switches), and [`RelayDoor`], which opens the compartment through one.

use std::thread;
use std::time::Duration;

use karna_types::{DoorCommand, KarnaError};
use tracing::{debug, error, info};

use crate::door::DoorActuator;

/// A discrete on/off hardware device.
pub trait Relay: Send + Sync {
    /// Stable identifier for this relay, e.g. `"latch_solenoid"`.
    fn id(&self) -> &str;

    /// Drive the relay to `active` (`true` = energised).
    ///
    /// # Errors
    ///
    /// Returns [`KarnaError::HardwareFault`] if the command cannot be applied.
    fn set_state(&mut self, active: bool) -> Result<(), KarnaError>;

    /// Return the relay's current state (`true` = energised).
    fn state(&self) -> bool;
}

/// A compartment door whose latch is released while a relay is energised.
///
/// `Open` energises the relay, holds it for the actuation delay and then
/// de-energises it, so the latch re-engages once the door is shut again.
/// The door counts as opened once the relay was energised; a failure to
/// de-energise is kept for [`DoorActuator::take_fault`].
pub struct RelayDoor<R: Relay> {
    id: String,
    relay: R,
    hold: Duration,
    last: Option<DoorCommand>,
    fault: Option<KarnaError>,
}

impl<R: Relay> RelayDoor<R> {
    pub fn new(id: impl Into<String>, relay: R, hold: Duration) -> Self {
        Self {
            id: id.into(),
            relay,
            hold,
            last: None,
            fault: None,
        }
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }
}

impl<R: Relay> DoorActuator for RelayDoor<R> {
    fn id(&self) -> &str {
        &self.id
    }

    fn actuate(&mut self, command: DoorCommand) -> Result<(), KarnaError> {
        match command {
            DoorCommand::Open => {
                info!(door = %self.id, relay = %self.relay.id(), "opening door");
                self.relay.set_state(true)?;
                thread::sleep(self.hold);
                match self.relay.set_state(false) {
                    Ok(()) => debug!(door = %self.id, "latch released and re-armed"),
                    Err(e) => {
                        error!(door = %self.id, relay = %self.relay.id(), error = %e, "door opened but latch did not re-arm");
                        self.fault = Some(e);
                    }
                }
            }
        }
        self.last = Some(command);
        Ok(())
    }

    fn last_command(&self) -> Option<DoorCommand> {
        self.last
    }

    fn take_fault(&mut self) -> Option<KarnaError> {
        self.fault.take()
    }
}
