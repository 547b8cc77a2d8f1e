//! Generic `DoorActuator` trait for the compartment lock.
//!
//! Implementations perform the physical action synchronously and return once
//! the actuation delay has elapsed. Issuing [`DoorCommand::Open`] while the
//! door is already open must be harmless.

use karna_types::{DoorCommand, KarnaError};

/// The compartment door as seen by the access-control layer.
///
/// An actuator keeps no state beyond the last command it was given.
pub trait DoorActuator: Send + Sync {
    /// Stable identifier, e.g. `"compartment_door"`.
    fn id(&self) -> &str;

    /// Perform `command` and block until the actuation delay has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`KarnaError::HardwareFault`] if the hardware rejects the
    /// command.
    fn actuate(&mut self, command: DoorCommand) -> Result<(), KarnaError>;

    /// The most recent command issued, if any.
    fn last_command(&self) -> Option<DoorCommand>;

    /// A fault from the last actuation that did not stop the door from
    /// opening, e.g. a latch that failed to re-arm. Taking it clears it.
    fn take_fault(&mut self) -> Option<KarnaError> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockDoor {
        last: Option<DoorCommand>,
        jammed: bool,
    }

    impl DoorActuator for MockDoor {
        fn id(&self) -> &str {
            "mock_door"
        }

        fn actuate(&mut self, command: DoorCommand) -> Result<(), KarnaError> {
            if self.jammed {
                return Err(KarnaError::HardwareFault {
                    component: self.id().to_string(),
                    details: "latch jammed".to_string(),
                });
            }
            self.last = Some(command);
            Ok(())
        }

        fn last_command(&self) -> Option<DoorCommand> {
            self.last
        }
    }

    #[test]
    fn repeated_open_is_harmless() {
        let mut door = MockDoor {
            last: None,
            jammed: false,
        };
        assert_eq!(door.last_command(), None);
        door.actuate(DoorCommand::Open).unwrap();
        door.actuate(DoorCommand::Open).unwrap();
        assert_eq!(door.last_command(), Some(DoorCommand::Open));
        assert!(door.take_fault().is_none());
    }

    #[test]
    fn jammed_door_reports_fault() {
        let mut door = MockDoor {
            last: None,
            jammed: true,
        };
        let err = door.actuate(DoorCommand::Open).unwrap_err();
        assert!(err.to_string().contains("latch jammed"));
        assert_eq!(door.last_command(), None);
    }
}
