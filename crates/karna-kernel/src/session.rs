//! [`DeliverySession`] – the single in-flight delivery.
//!
//! A session is created by a `set_otp` command, never mutated, and destroyed
//! either by successful verification or by being replaced with a newer one.

use karna_types::{DeliveryId, Otp};

/// Identifier and credential of the delivery currently authorized to open
/// the compartment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySession {
    delivery_id: DeliveryId,
    otp: Otp,
}

impl DeliverySession {
    pub fn new(delivery_id: DeliveryId, otp: Otp) -> Self {
        Self { delivery_id, otp }
    }

    pub fn delivery_id(&self) -> &DeliveryId {
        &self.delivery_id
    }

    pub fn otp(&self) -> &Otp {
        &self.otp
    }
}

/// Externally visible state of the gate's session slot.
///
/// `Verified` is not represented: a verified session is cleared, which
/// returns the slot to `Unset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unset,
    Pending { delivery_id: DeliveryId },
}

impl SessionState {
    pub fn of(session: Option<&DeliverySession>) -> Self {
        match session {
            Some(s) => SessionState::Pending {
                delivery_id: s.delivery_id().clone(),
            },
            None => SessionState::Unset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_of_no_session_is_unset() {
        assert_eq!(SessionState::of(None), SessionState::Unset);
    }

    #[test]
    fn state_of_session_is_pending_with_its_id() {
        let session = DeliverySession::new(DeliveryId::new("D1"), Otp::new("4321"));
        assert_eq!(
            SessionState::of(Some(&session)),
            SessionState::Pending {
                delivery_id: DeliveryId::new("D1")
            }
        );
    }
}
