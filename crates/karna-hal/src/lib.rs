//! `karna-hal` – Hardware Abstraction for the delivery compartment.
//!
//! The rest of the system only ever talks to the [`DoorActuator`] trait, so a
//! real motor or solenoid binding can be swapped in without touching the
//! access-control logic.
//!
//! # Modules
//!
//! - [`door`] – [`DoorActuator`]: the single-method actuation capability.
//! - [`relay`] – [`Relay`]: discrete on/off devices, and [`RelayDoor`], a door
//!   that releases its latch by energising a relay for the actuation delay.
//! - [`sim`] – [`SimDoor`] and [`SimRelay`]: recording stand-ins used by
//!   tests and by the coordinator when no hardware is attached.

pub mod door;
pub mod relay;
pub mod sim;

pub use door::DoorActuator;
pub use relay::{Relay, RelayDoor};
pub use sim::{DoorLog, SimDoor, SimRelay};
