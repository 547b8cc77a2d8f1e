//! `karna-memory` – durable state that must outlive a failed network call.
//!
//! # Modules
//!
//! - [`outbox`] – [`Outbox`][outbox::Outbox]: a SQLite-backed queue of
//!   verification notifications the delivery backend has not yet
//!   acknowledged. The door has already opened for every entry; the outbox
//!   only makes sure the backend eventually hears about it.

pub mod outbox;

pub use outbox::{Outbox, OutboxEntry, OutboxError, OutboxStatus};
