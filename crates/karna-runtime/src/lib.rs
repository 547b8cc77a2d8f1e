//! `karna-runtime` – orchestration of the delivery coordinator and the voice
//! assistant.
//!
//! # Modules
//!
//! - [`gate_worker`] – [`spawn_gate_worker`] moves the
//!   [`AccessGate`][karna_kernel::AccessGate] onto its own blocking thread
//!   and hands out [`GateHandle`]s. Credential entry never blocks the
//!   command listener: installing a session only publishes
//!   `CredentialRequired` on the event bus.
//! - [`dispatcher`] – [`CommandDispatcher`]: the
//!   [`CommandHandler`][karna_middleware::CommandHandler] that maps the four
//!   remote actions onto the gate, the navigator and the arrival topic.
//! - [`delivery_api`] – [`DeliveryApi`] and its HTTP binding
//!   [`HttpDeliveryApi`] (owner lookup + verify-otp).
//! - [`notifier`] – [`VerificationNotifier`]: reports verified deliveries and
//!   keeps retrying failed reports from the SQLite outbox.
//! - [`navigation`] – [`Navigator`] and the immediate-arrival
//!   [`PlaceholderNavigator`].
//! - [`voice`] – [`VoiceSession`], the spoken-conversation loop that drives
//!   the activity slot.
//! - [`faq`] – the local delivery FAQ and its similarity matcher.
//! - [`llm_responder`] – OpenAI-compatible chat client and the FAQ-first
//!   [`DeliveryAssistant`].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: `tracing`
//!   subscriber setup with optional OTLP export.

pub mod delivery_api;
pub mod dispatcher;
pub mod faq;
pub mod gate_worker;
pub mod llm_responder;
pub mod navigation;
pub mod notifier;
pub mod telemetry;
pub mod voice;

pub use delivery_api::{DeliveryApi, HttpDeliveryApi};
pub use dispatcher::{CommandDispatcher, DispatchOutcome};
pub use faq::FaqTable;
pub use gate_worker::{GateCommand, GateHandle, spawn_gate_worker};
pub use llm_responder::{
    ChatLog, ChatMessage, DeliveryAssistant, LlmClient, LlmError, Role, UnansweredLog,
};
pub use navigation::{NavTarget, Navigator, PlaceholderNavigator};
pub use notifier::{FlushReport, RetryPolicy, VerificationNotifier};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use voice::{Responder, SpeechRecognizer, SpeechSynthesizer, TurnOutcome, VoiceSession};
