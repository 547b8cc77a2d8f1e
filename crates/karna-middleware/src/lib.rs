//! `karna-middleware` – The Nervous System
//!
//! Moves data between the coordinator, the outside world and the other Karna
//! processes without caring about its meaning.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based in-process publish/subscribe bus built on
//!   Tokio broadcast channels.
//! - [`activity`] – the cross-process activity slot: a single overwritable
//!   token file with last-write-wins semantics, plus the polling
//!   [`ActivityWatcher`] used by presentation processes.
//! - [`link`] – [`CommandLink`] / [`CommandHandler`]: the seam between the
//!   remote command channel and the dispatcher, and the topic names.
//! - [`mqtt`] – the TLS MQTT binding of [`CommandLink`] and the listener loop
//!   that feeds inbound commands to a [`CommandHandler`].

pub mod activity;
pub mod bus;
pub mod link;
pub mod mqtt;

pub use activity::{ActivityChannel, ActivitySignal, ActivityWatcher};
pub use bus::{EventBus, Topic, TopicReceiver};
pub use link::{CommandHandler, CommandLink, arrival_topic, command_topic};
pub use mqtt::{MqttLink, MqttListener, MqttSettings};
