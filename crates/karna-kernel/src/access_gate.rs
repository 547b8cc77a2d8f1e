//! [`AccessGate`] – the only component allowed to open the compartment.
//!
//! The gate owns the single [`DeliverySession`] and the boxed
//! [`DoorActuator`]. Two paths may open the door:
//!
//! 1. **Credential** ([`AccessGate::attempt`]): the code typed on the keypad
//!    must equal the session's passcode. A match clears the session and
//!    actuates the door; a mismatch changes nothing.
//!
//! 2. **Identity-only** ([`AccessGate::open_by_delivery_id`]): a remote
//!    `open_door` command naming the active delivery. This is a weaker
//!    authorization than the credential path, so it is governed by an
//!    explicit [`OpenDoorPolicy`] and never consumes the session.
//!
//! # Example
//!
//! ```
//! use karna_hal::SimDoor;
//! use karna_kernel::{AccessGate, Attempt, OpenDoorPolicy};
//! use karna_types::{DeliveryId, Otp};
//!
//! let door = SimDoor::new("compartment_door");
//! let log = door.log();
//! let mut gate = AccessGate::new(Box::new(door), OpenDoorPolicy::default());
//!
//! gate.set_credential(Otp::new("4321"), DeliveryId::new("D1"));
//!
//! // Wrong code → nothing happens.
//! assert!(matches!(gate.attempt("0000").unwrap(), Attempt::Rejected { .. }));
//! assert_eq!(log.count(), 0);
//!
//! // Right code → door opens once and the session is gone.
//! assert!(matches!(gate.attempt("4321").unwrap(), Attempt::Verified(_)));
//! assert_eq!(log.count(), 1);
//! assert!(gate.active_delivery().is_none());
//! ```

use karna_hal::DoorActuator;
use karna_types::{DeliveryId, DoorCommand, KarnaError, Otp, VerificationOutcome};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::session::{DeliverySession, SessionState};

/// How a remote `open_door` command naming the active delivery is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenDoorPolicy {
    /// Open when the named delivery equals the active session's delivery,
    /// regardless of whether the credential has been entered.
    #[default]
    DeliveryIdMatch,
    /// Refuse every identity-only request; only the keypad opens the door.
    Disabled,
}

/// Result of a keypad attempt against an active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// The code matched. The door has been opened and the returned session
    /// has been removed from the gate.
    Verified(DeliverySession),
    /// The code did not match; the pending session is untouched.
    Rejected { delivery_id: DeliveryId },
}

impl Attempt {
    pub fn outcome(&self) -> VerificationOutcome {
        match self {
            Attempt::Verified(_) => VerificationOutcome::Match,
            Attempt::Rejected { .. } => VerificationOutcome::Mismatch,
        }
    }
}

/// Result of an identity-only open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityOpen {
    Opened,
    /// No session, or the named delivery is not the active one.
    NoMatch,
    /// [`OpenDoorPolicy::Disabled`] forbids this path.
    Refused,
}

/// Sole owner of the delivery session and of the compartment door.
pub struct AccessGate {
    session: Option<DeliverySession>,
    door: Box<dyn DoorActuator>,
    policy: OpenDoorPolicy,
}

impl AccessGate {
    pub fn new(door: Box<dyn DoorActuator>, policy: OpenDoorPolicy) -> Self {
        Self {
            session: None,
            door,
            policy,
        }
    }

    pub fn policy(&self) -> OpenDoorPolicy {
        self.policy
    }

    pub fn state(&self) -> SessionState {
        SessionState::of(self.session.as_ref())
    }

    pub fn active_delivery(&self) -> Option<&DeliveryId> {
        self.session.as_ref().map(DeliverySession::delivery_id)
    }

    /// Install a new pending session, unconditionally.
    ///
    /// Any previous unverified session is discarded and returned so the
    /// caller can report that it was superseded.
    pub fn set_credential(&mut self, otp: Otp, delivery_id: DeliveryId) -> Option<DeliverySession> {
        info!(delivery_id = %delivery_id, "credential set, awaiting entry");
        let previous = self.session.replace(DeliverySession::new(delivery_id, otp));
        if let Some(old) = &previous {
            warn!(
                previous = %old.delivery_id(),
                "pending delivery session superseded before verification"
            );
        }
        previous
    }

    /// Compare `entered` against the active session's passcode.
    ///
    /// On a match the session is removed, the door is opened exactly once,
    /// and the verified session is handed back so the caller can notify the
    /// delivery backend. If the door reports a fault the session is restored
    /// so the recipient can try again.
    ///
    /// # Errors
    ///
    /// - [`KarnaError::NoActiveSession`] – nothing to verify against.
    /// - [`KarnaError::HardwareFault`] – the code matched but the door failed.
    pub fn attempt(&mut self, entered: &str) -> Result<Attempt, KarnaError> {
        let session = self.session.take().ok_or(KarnaError::NoActiveSession)?;

        if !session.otp().matches(entered) {
            let delivery_id = session.delivery_id().clone();
            info!(delivery_id = %delivery_id, "credential mismatch");
            self.session = Some(session);
            return Ok(Attempt::Rejected { delivery_id });
        }

        if let Err(e) = self.door.actuate(DoorCommand::Open) {
            warn!(delivery_id = %session.delivery_id(), error = %e, "door failed after credential match");
            self.session = Some(session);
            return Err(e);
        }

        info!(delivery_id = %session.delivery_id(), door = %self.door.id(), "credential verified, door opened");
        Ok(Attempt::Verified(session))
    }

    /// Fault left behind by the last door opening, if any.
    pub fn take_door_fault(&mut self) -> Option<KarnaError> {
        self.door.take_fault()
    }

    /// `true` iff a session is active and its delivery equals `candidate`.
    /// Never consumes the session.
    pub fn matches_delivery_id(&self, candidate: &DeliveryId) -> bool {
        self.active_delivery() == Some(candidate)
    }

    /// Open the door for a remote request naming `candidate`, subject to the
    /// configured [`OpenDoorPolicy`]. The session is left in place.
    ///
    /// # Errors
    ///
    /// Returns [`KarnaError::HardwareFault`] if the door fails.
    pub fn open_by_delivery_id(&mut self, candidate: &DeliveryId) -> Result<IdentityOpen, KarnaError> {
        if self.policy == OpenDoorPolicy::Disabled {
            warn!(delivery_id = %candidate, "identity-only open refused by policy");
            return Ok(IdentityOpen::Refused);
        }
        if !self.matches_delivery_id(candidate) {
            info!(delivery_id = %candidate, "open_door ignored: not the active delivery");
            return Ok(IdentityOpen::NoMatch);
        }
        warn!(
            delivery_id = %candidate,
            "opening door on delivery id alone, credential not re-entered"
        );
        self.door.actuate(DoorCommand::Open)?;
        Ok(IdentityOpen::Opened)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use karna_hal::{DoorLog, SimDoor};

    fn gate_with(policy: OpenDoorPolicy) -> (AccessGate, DoorLog) {
        let door = SimDoor::new("compartment_door");
        let log = door.log();
        (AccessGate::new(Box::new(door), policy), log)
    }

    fn pending(gate: &mut AccessGate, otp: &str, id: &str) {
        gate.set_credential(Otp::new(otp), DeliveryId::new(id));
    }

    struct FaultyDoor;

    impl DoorActuator for FaultyDoor {
        fn id(&self) -> &str {
            "faulty"
        }
        fn actuate(&mut self, _command: DoorCommand) -> Result<(), KarnaError> {
            Err(KarnaError::HardwareFault {
                component: "faulty".into(),
                details: "motor stalled".into(),
            })
        }
        fn last_command(&self) -> Option<DoorCommand> {
            None
        }
    }

    #[test]
    fn matching_code_opens_once_and_clears_session() {
        let (mut gate, log) = gate_with(OpenDoorPolicy::default());
        pending(&mut gate, "4321", "D1");

        let attempt = gate.attempt("4321").unwrap();
        assert_eq!(attempt.outcome(), VerificationOutcome::Match);
        match attempt {
            Attempt::Verified(session) => {
                assert_eq!(session.delivery_id(), &DeliveryId::new("D1"));
                assert!(session.otp().matches("4321"));
            }
            other => panic!("expected Verified, got {other:?}"),
        }
        assert_eq!(log.commands(), vec![DoorCommand::Open]);
        assert_eq!(gate.state(), SessionState::Unset);
    }

    #[test]
    fn mismatch_never_actuates_and_keeps_session() {
        let (mut gate, log) = gate_with(OpenDoorPolicy::default());
        pending(&mut gate, "4321", "D1");

        for wrong in ["0000", "", "43210", "1234"] {
            let attempt = gate.attempt(wrong).unwrap();
            assert_eq!(attempt.outcome(), VerificationOutcome::Mismatch);
        }
        assert_eq!(log.count(), 0);
        assert_eq!(
            gate.state(),
            SessionState::Pending {
                delivery_id: DeliveryId::new("D1")
            }
        );

        // The same session still verifies afterwards.
        assert!(matches!(gate.attempt("4321").unwrap(), Attempt::Verified(_)));
        assert_eq!(log.count(), 1);
    }

    #[test]
    fn attempt_without_session_is_an_error() {
        let (mut gate, log) = gate_with(OpenDoorPolicy::default());
        assert_eq!(gate.attempt("4321"), Err(KarnaError::NoActiveSession));
        assert_eq!(log.count(), 0);
    }

    #[test]
    fn second_attempt_after_verification_fails() {
        let (mut gate, log) = gate_with(OpenDoorPolicy::default());
        pending(&mut gate, "4321", "D1");
        gate.attempt("4321").unwrap();
        assert_eq!(gate.attempt("4321"), Err(KarnaError::NoActiveSession));
        assert_eq!(log.count(), 1);
    }

    #[test]
    fn new_credential_supersedes_pending_one() {
        let (mut gate, log) = gate_with(OpenDoorPolicy::default());
        assert!(gate.set_credential(Otp::new("1111"), DeliveryId::new("D1")).is_none());
        let previous = gate
            .set_credential(Otp::new("2222"), DeliveryId::new("D2"))
            .expect("D1 was pending");
        assert_eq!(previous.delivery_id(), &DeliveryId::new("D1"));

        // D1's code no longer opens anything.
        assert!(matches!(gate.attempt("1111").unwrap(), Attempt::Rejected { .. }));
        assert_eq!(log.count(), 0);

        match gate.attempt("2222").unwrap() {
            Attempt::Verified(session) => assert_eq!(session.delivery_id(), &DeliveryId::new("D2")),
            other => panic!("expected Verified, got {other:?}"),
        }
    }

    #[test]
    fn matches_delivery_id_is_independent_of_otp() {
        let (mut gate, _) = gate_with(OpenDoorPolicy::default());
        assert!(!gate.matches_delivery_id(&DeliveryId::new("D1")));

        pending(&mut gate, "4321", "D1");
        assert!(gate.matches_delivery_id(&DeliveryId::new("D1")));
        assert!(!gate.matches_delivery_id(&DeliveryId::new("D2")));

        // A failed attempt does not affect the predicate.
        gate.attempt("9999").unwrap();
        assert!(gate.matches_delivery_id(&DeliveryId::new("D1")));
    }

    #[test]
    fn identity_open_with_matching_id_opens_without_consuming_session() {
        let (mut gate, log) = gate_with(OpenDoorPolicy::DeliveryIdMatch);
        pending(&mut gate, "4321", "D1");

        assert_eq!(
            gate.open_by_delivery_id(&DeliveryId::new("D1")).unwrap(),
            IdentityOpen::Opened
        );
        assert_eq!(log.count(), 1);
        assert!(gate.matches_delivery_id(&DeliveryId::new("D1")));
    }

    #[test]
    fn identity_open_with_other_id_or_no_session_does_nothing() {
        let (mut gate, log) = gate_with(OpenDoorPolicy::DeliveryIdMatch);
        assert_eq!(
            gate.open_by_delivery_id(&DeliveryId::new("D1")).unwrap(),
            IdentityOpen::NoMatch
        );
        pending(&mut gate, "4321", "D1");
        assert_eq!(
            gate.open_by_delivery_id(&DeliveryId::new("D2")).unwrap(),
            IdentityOpen::NoMatch
        );
        assert_eq!(log.count(), 0);
    }

    #[test]
    fn disabled_policy_refuses_identity_open() {
        let (mut gate, log) = gate_with(OpenDoorPolicy::Disabled);
        pending(&mut gate, "4321", "D1");
        assert_eq!(
            gate.open_by_delivery_id(&DeliveryId::new("D1")).unwrap(),
            IdentityOpen::Refused
        );
        assert_eq!(log.count(), 0);
        // The keypad path is unaffected.
        assert!(matches!(gate.attempt("4321").unwrap(), Attempt::Verified(_)));
    }

    #[test]
    fn door_fault_restores_session() {
        let mut gate = AccessGate::new(Box::new(FaultyDoor), OpenDoorPolicy::default());
        pending(&mut gate, "4321", "D1");

        assert!(matches!(
            gate.attempt("4321"),
            Err(KarnaError::HardwareFault { .. })
        ));
        assert!(gate.matches_delivery_id(&DeliveryId::new("D1")));
    }
}
