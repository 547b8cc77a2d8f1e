//! `karna-kernel` – Access Control
//!
//! The part of Karna that decides whether the compartment may open. It does
//! not talk to the network; it enforces rules and drives the door.
//!
//! # Modules
//!
//! - [`session`] – [`DeliverySession`][session::DeliverySession]: the one
//!   in-flight delivery's identifier and one-time passcode.
//! - [`access_gate`] – [`AccessGate`][access_gate::AccessGate]: sole owner of
//!   the session and sole authority over the
//!   [`DoorActuator`][karna_hal::DoorActuator]. Validates keypad attempts and
//!   applies the [`OpenDoorPolicy`][access_gate::OpenDoorPolicy] to remote
//!   identity-only open requests.
//! - [`keypad`] – [`CodeEntry`][keypad::CodeEntry]: the UI-free model of the
//!   numeric keypad used to type a credential.

pub mod access_gate;
pub mod keypad;
pub mod session;

pub use access_gate::{AccessGate, Attempt, IdentityOpen, OpenDoorPolicy};
pub use keypad::{CodeEntry, INVALID_CODE_MESSAGE, Key, MAX_CODE_DIGITS};
pub use session::{DeliverySession, SessionState};
