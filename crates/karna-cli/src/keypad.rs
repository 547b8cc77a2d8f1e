//! Terminal keypad – where the recipient types the delivery code.
//!
//! The surface follows the `AccessGate` topic: `CredentialRequired` opens a
//! prompt, each input line is typed into a [`CodeEntry`] and submitted
//! through the [`GateHandle`]. While a code is expected the activity slot
//! shows `listening`, while it is checked `thinking`, and `idle` once the
//! compartment is open.

use std::fmt::Display;
use std::io::Write;

use colored::Colorize;
use karna_kernel::CodeEntry;
use karna_middleware::{ActivityChannel, TopicReceiver};
use karna_runtime::GateHandle;
use karna_types::{
    ActivityToken, DeliveryId, Event, EventPayload, KarnaError, OpenPath, VerificationOutcome,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct KeypadSurface<W> {
    gate: GateHandle,
    entry: CodeEntry,
    /// The delivery whose code is being asked for.
    awaiting: Option<DeliveryId>,
    activity: ActivityChannel,
    out: W,
}

impl<W: Write> KeypadSurface<W> {
    pub fn new(gate: GateHandle, activity: ActivityChannel, out: W) -> Self {
        Self {
            gate,
            entry: CodeEntry::new(),
            awaiting: None,
            activity,
            out,
        }
    }

    pub fn on_event(&mut self, event: &Event) {
        match &event.payload {
            EventPayload::SessionSuperseded { previous, current } => {
                self.say(format!(
                    "  {} Delivery {} was replaced by {}.",
                    "!".yellow().bold(),
                    previous,
                    current
                ));
            }
            EventPayload::CredentialRequired { delivery_id } => {
                self.awaiting = Some(delivery_id.clone());
                self.entry = CodeEntry::new();
                self.activity.signal(ActivityToken::Listening);
                self.prompt();
            }
            EventPayload::DoorOpened {
                delivery_id,
                path: OpenPath::DeliveryIdMatch,
            } => {
                self.say(format!(
                    "  Compartment opened remotely for delivery {delivery_id}."
                ));
            }
            _ => {}
        }
    }

    /// Type `line` on the pad and submit it.
    ///
    /// Returns `Ok(None)` when nothing was submitted: no delivery is waiting
    /// or the line held no digits.
    pub async fn on_input(&mut self, line: &str) -> Result<Option<VerificationOutcome>, KarnaError> {
        if self.awaiting.is_none() {
            self.say(format!("  {}", "No delivery is waiting for a code.".dimmed()));
            return Ok(None);
        }
        self.entry.type_str(line);
        if self.entry.display().is_empty() {
            self.prompt();
            return Ok(None);
        }

        let code = self.entry.submit();
        self.activity.signal(ActivityToken::Thinking);
        let outcome = match self.gate.attempt(code).await {
            Ok(outcome) => outcome,
            Err(KarnaError::NoActiveSession) => {
                self.awaiting = None;
                self.activity.signal(ActivityToken::Idle);
                self.say(format!("  {}", "This delivery is no longer active.".yellow()));
                return Err(KarnaError::NoActiveSession);
            }
            Err(e) => {
                self.activity.signal(ActivityToken::Listening);
                self.say(format!("  {} {e}", "Could not check the code:".red()));
                self.prompt();
                return Err(e);
            }
        };

        match outcome {
            VerificationOutcome::Match => {
                if let Some(id) = self.awaiting.take() {
                    info!(delivery_id = %id, "keypad code accepted");
                }
                self.activity.signal(ActivityToken::Idle);
                self.say(format!(
                    "  {} Code accepted. Please take your parcel.",
                    "✓".green().bold()
                ));
            }
            VerificationOutcome::Mismatch => {
                self.entry.reject();
                self.activity.signal(ActivityToken::Listening);
                if let Some(message) = self.entry.error() {
                    self.say(format!("  {}", message.red()));
                }
                self.prompt();
            }
        }
        Ok(Some(outcome))
    }

    /// Serve the keypad until `shutdown` flips to `true`. A closed input
    /// stream leaves the surface following events only.
    pub async fn run<R>(
        mut self,
        input: R,
        mut events: TopicReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut input_open = true;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => self.on_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "keypad fell behind the event bus");
                    }
                    Err(RecvError::Closed) => break,
                },
                line = lines.next_line(), if input_open => match line {
                    Ok(Some(line)) => {
                        if let Err(e) = self.on_input(&line).await {
                            warn!(error = %e, "keypad attempt failed");
                        }
                    }
                    Ok(None) => {
                        debug!("keypad input closed");
                        input_open = false;
                    }
                    Err(e) => {
                        warn!(error = %e, "keypad input unreadable");
                        input_open = false;
                    }
                },
            }
        }
        debug!("keypad stopped");
    }

    fn prompt(&mut self) {
        if let Some(id) = self.awaiting.clone() {
            self.say(format!(
                "  {} Enter the security code for delivery {} and press Enter:",
                "▶".cyan().bold(),
                id.to_string().bold()
            ));
        }
    }

    fn say(&mut self, text: impl Display) {
        if let Err(e) = writeln!(self.out, "{text}").and_then(|()| self.out.flush()) {
            debug!(error = %e, "keypad output failed");
        }
    }
}
