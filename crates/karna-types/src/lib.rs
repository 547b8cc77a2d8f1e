//! `karna-types` – the shared vocabulary of the Karna delivery robot.
//!
//! Every other crate in the workspace speaks in these types: the remote
//! command schema, the delivery credential, the activity token shared between
//! processes, the internal event bus envelope and the workspace-wide error.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers and credentials
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque identifier of one delivery, supplied by the remote command source.
///
/// The backend sometimes encodes identifiers as JSON numbers; both forms
/// deserialize to the same textual identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DeliveryId(String);

impl DeliveryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeliveryId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for DeliveryId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        string_or_number(deserializer).map(Self)
    }
}

/// One-time passcode proving authorization to open the compartment.
///
/// `Debug` never prints the code itself.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Otp(String);

impl Otp {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare an entered value against this code in constant time.
    pub fn matches(&self, entered: &str) -> bool {
        self.0.as_bytes().ct_eq(entered.as_bytes()).into()
    }
}

impl fmt::Debug for Otp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Otp(<{} digits>)", self.0.len())
    }
}

impl<'de> Deserialize<'de> for Otp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        string_or_number(deserializer).map(Self)
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Unsigned(u64),
        Signed(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Unsigned(n) => n.to_string(),
        Raw::Signed(n) => n.to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Remote command schema
// ─────────────────────────────────────────────────────────────────────────────

/// The four actions the remote command source may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    StartDelivery,
    SetOtp,
    OpenDoor,
    GoToBase,
}

impl CommandAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandAction::StartDelivery => "start_delivery",
            CommandAction::SetOtp => "set_otp",
            CommandAction::OpenDoor => "open_door",
            CommandAction::GoToBase => "go_to_base",
        }
    }
}

/// Inbound unit on `robot/{robotId}/command`. Consumed once, never persisted.
///
/// Locations are forwarded to navigation untouched, so their shape is left
/// open.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMessage {
    pub action: CommandAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<DeliveryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp: Option<Otp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_location: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_location: Option<serde_json::Value>,
}

impl CommandMessage {
    /// Parse a raw JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`KarnaError::MalformedCommand`] for invalid JSON or an unknown
    /// `action`.
    pub fn parse(payload: &[u8]) -> Result<Self, KarnaError> {
        serde_json::from_slice(payload).map_err(|e| KarnaError::MalformedCommand(e.to_string()))
    }

    pub fn require_delivery_id(&self) -> Result<&DeliveryId, KarnaError> {
        self.delivery_id.as_ref().ok_or(KarnaError::MissingField {
            action: self.action.as_str(),
            field: "deliveryId",
        })
    }

    pub fn require_otp(&self) -> Result<&Otp, KarnaError> {
        self.otp.as_ref().ok_or(KarnaError::MissingField {
            action: self.action.as_str(),
            field: "otp",
        })
    }
}

/// Outbound body on `robot/{robotId}/arrival`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalMessage {
    pub delivery_id: DeliveryId,
    pub message: String,
}

impl ArrivalMessage {
    pub const ARRIVED: &'static str = "I have arrived";

    pub fn arrived(delivery_id: DeliveryId) -> Self {
        Self {
            delivery_id,
            message: Self::ARRIVED.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Activity token
// ─────────────────────────────────────────────────────────────────────────────

/// What the robot is currently, externally observably, doing.
///
/// The textual form is the wire format of the cross-process activity slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityToken {
    #[default]
    Idle,
    Listening,
    Thinking,
    Answering,
    Last,
}

impl ActivityToken {
    pub const ALL: [ActivityToken; 5] = [
        ActivityToken::Idle,
        ActivityToken::Listening,
        ActivityToken::Thinking,
        ActivityToken::Answering,
        ActivityToken::Last,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityToken::Idle => "idle",
            ActivityToken::Listening => "listening",
            ActivityToken::Thinking => "thinking",
            ActivityToken::Answering => "answering",
            ActivityToken::Last => "last",
        }
    }
}

impl fmt::Display for ActivityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not one of the five activity tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized activity token '{0}'")]
pub struct UnknownActivity(pub String);

impl FromStr for ActivityToken {
    type Err = UnknownActivity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        ActivityToken::ALL
            .into_iter()
            .find(|t| t.as_str() == trimmed)
            .ok_or_else(|| UnknownActivity(trimmed.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Door and verification
// ─────────────────────────────────────────────────────────────────────────────

/// Commands understood by a compartment door actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoorCommand {
    Open,
}

impl DoorCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoorCommand::Open => "open",
        }
    }
}

/// Result of matching an entered credential against the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationOutcome {
    /// Credential accepted; the door was actuated.
    Match,
    /// Credential rejected; the session is unchanged.
    Mismatch,
}

/// Which authorization path opened the door.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenPath {
    /// A credential typed on the keypad matched the session's code.
    Credential,
    /// A remote `open_door` command named the active delivery.
    DeliveryIdMatch,
}

// ─────────────────────────────────────────────────────────────────────────────
// Event bus envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the in-process event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"karna-runtime::gate"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A new session is pending and the keypad should ask for its code.
    CredentialRequired { delivery_id: DeliveryId },
    /// A keypad attempt did not match; the session is still pending.
    CredentialRejected { delivery_id: DeliveryId },
    /// A pending session was replaced before it was verified.
    SessionSuperseded {
        previous: DeliveryId,
        current: DeliveryId,
    },
    DoorOpened {
        delivery_id: DeliveryId,
        path: OpenPath,
    },
    ArrivalPublished { delivery_id: DeliveryId },
    NotificationDelivered { delivery_id: DeliveryId },
    /// The verification notification failed and was queued for redelivery.
    NotificationQueued {
        delivery_id: DeliveryId,
        reason: String,
    },
    Fault { component: String, message: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Workspace-wide error type.
///
/// None of these are fatal to the process; every loop that receives one logs
/// it and keeps running.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KarnaError {
    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Remote API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected Response: {0}")]
    BadResponse(String),

    #[error("Malformed Command: {0}")]
    MalformedCommand(String),

    #[error("Command '{action}' is missing field '{field}'")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("No delivery session is active")]
    NoActiveSession,

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Activity Channel Error: {0}")]
    Activity(String),

    #[error("Storage Error: {0}")]
    Storage(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_otp_command_parses_camel_case_fields() {
        let raw = br#"{"action":"set_otp","otp":"4321","deliveryId":"D1"}"#;
        let msg = CommandMessage::parse(raw).unwrap();
        assert_eq!(msg.action, CommandAction::SetOtp);
        assert_eq!(msg.require_delivery_id().unwrap().as_str(), "D1");
        assert!(msg.require_otp().unwrap().matches("4321"));
    }

    #[test]
    fn numeric_otp_and_delivery_id_become_text() {
        let raw = br#"{"action":"set_otp","otp":4321,"deliveryId":17}"#;
        let msg = CommandMessage::parse(raw).unwrap();
        assert_eq!(msg.delivery_id, Some(DeliveryId::new("17")));
        assert!(msg.otp.unwrap().matches("4321"));
    }

    #[test]
    fn unknown_action_is_malformed() {
        let raw = br#"{"action":"self_destruct"}"#;
        assert!(matches!(
            CommandMessage::parse(raw),
            Err(KarnaError::MalformedCommand(_))
        ));
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(
            CommandMessage::parse(b"not json"),
            Err(KarnaError::MalformedCommand(_))
        ));
    }

    #[test]
    fn missing_field_names_action_and_field() {
        let msg = CommandMessage::parse(br#"{"action":"open_door"}"#).unwrap();
        let err = msg.require_delivery_id().unwrap_err();
        assert_eq!(
            err,
            KarnaError::MissingField {
                action: "open_door",
                field: "deliveryId"
            }
        );
        assert!(err.to_string().contains("open_door"));
    }

    #[test]
    fn start_delivery_keeps_location_verbatim() {
        let raw = br#"{"action":"start_delivery","deliveryId":"D9","ownerLocation":{"lat":1.5,"lng":2.5}}"#;
        let msg = CommandMessage::parse(raw).unwrap();
        let loc = msg.owner_location.unwrap();
        assert_eq!(loc["lat"], 1.5);
    }

    #[test]
    fn arrival_message_wire_format() {
        let json = serde_json::to_value(ArrivalMessage::arrived(DeliveryId::new("D1"))).unwrap();
        assert_eq!(json["deliveryId"], "D1");
        assert_eq!(json["message"], "I have arrived");
    }

    #[test]
    fn otp_matches_only_the_exact_code() {
        let otp = Otp::new("4321");
        assert!(otp.matches("4321"));
        assert!(!otp.matches("4320"));
        assert!(!otp.matches("432"));
        assert!(!otp.matches("43210"));
        assert!(!otp.matches(""));
    }

    #[test]
    fn otp_debug_does_not_leak_code() {
        let otp = Otp::new("987654");
        let dbg = format!("{otp:?}");
        assert!(!dbg.contains("987654"));
        assert!(dbg.contains("6 digits"));
    }

    #[test]
    fn activity_token_text_form() {
        for token in ActivityToken::ALL {
            assert_eq!(token.as_str().parse::<ActivityToken>().unwrap(), token);
        }
        assert_eq!(" thinking\n".parse::<ActivityToken>().unwrap(), ActivityToken::Thinking);
        assert_eq!(ActivityToken::default(), ActivityToken::Idle);
    }

    #[test]
    fn unrecognized_activity_token_is_an_error() {
        let err = "dancing".parse::<ActivityToken>().unwrap_err();
        assert_eq!(err, UnknownActivity("dancing".to_string()));
    }

    #[test]
    fn event_carries_source_and_payload() {
        let event = Event::new(
            "karna-runtime::gate",
            EventPayload::DoorOpened {
                delivery_id: DeliveryId::new("D1"),
                path: OpenPath::Credential,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert!(matches!(
            back.payload,
            EventPayload::DoorOpened { path: OpenPath::Credential, .. }
        ));
    }
}
