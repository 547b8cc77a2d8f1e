//! The cross-process activity slot.
//!
//! Independently scheduled processes (the voice loop, the keypad surface,
//! the presentation host) share "what the robot is doing" through one small
//! text file holding a single [`ActivityToken`].
//!
//! # Consistency model
//!
//! * **Last write wins.** [`ActivityChannel::publish`] overwrites the slot
//!   unconditionally. There is no versioning, ordering or acknowledgement
//!   between producers.
//! * **No torn reads.** Writes go to a sibling temporary file that is then
//!   renamed over the slot, so a reader sees either the old or the new
//!   token, never a partial one.
//! * **Bounded staleness.** A consumer sees a change within one polling
//!   interval; intermediate tokens written faster than that may be skipped.
//! * A missing slot reads as [`ActivityToken::Idle`]. An unrecognised value
//!   is reported as [`ActivitySignal::Unrecognized`] and a conformant
//!   consumer treats it as "no change".

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use karna_types::{ActivityToken, KarnaError};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a poll of the slot found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivitySignal {
    Token(ActivityToken),
    Unrecognized(String),
}

/// Handle onto the activity slot at a given path. Cheap to clone; holds no
/// open file.
#[derive(Debug, Clone)]
pub struct ActivityChannel {
    path: PathBuf,
}

impl ActivityChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the slot with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`KarnaError::Activity`] if the slot cannot be written.
    pub fn publish(&self, token: ActivityToken) -> Result<(), KarnaError> {
        self.publish_raw(token.as_str())
    }

    /// Overwrite the slot with an arbitrary value. Producers should use
    /// [`publish`][Self::publish]; this exists so consumers can be exercised
    /// against foreign writers.
    pub fn publish_raw(&self, value: &str) -> Result<(), KarnaError> {
        let tmp = self.temp_path();
        fs::write(&tmp, value).map_err(|e| {
            KarnaError::Activity(format!("write {}: {e}", tmp.display()))
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            KarnaError::Activity(format!("replace {}: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), value, "activity published");
        Ok(())
    }

    /// Read the current value of the slot; a missing slot is `idle`.
    ///
    /// # Errors
    ///
    /// Returns [`KarnaError::Activity`] for I/O failures other than the slot
    /// not existing.
    pub fn poll(&self) -> Result<ActivitySignal, KarnaError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(match raw.parse::<ActivityToken>() {
                Ok(token) => ActivitySignal::Token(token),
                Err(_) => ActivitySignal::Unrecognized(raw.trim().to_string()),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ActivitySignal::Token(ActivityToken::Idle)),
            Err(e) => Err(KarnaError::Activity(format!(
                "read {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Create (or overwrite) the slot with `idle`, as done at process start.
    pub fn reset(&self) -> Result<(), KarnaError> {
        self.publish(ActivityToken::Idle)
    }

    /// Delete the slot on orderly shutdown. Deleting a missing slot is fine.
    pub fn remove(&self) -> Result<(), KarnaError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KarnaError::Activity(format!(
                "remove {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Publish `token`, logging rather than returning a failure. Producers
    /// use this so a broken slot degrades to "no visual change".
    pub fn signal(&self, token: ActivityToken) {
        if let Err(e) = self.publish(token) {
            warn!(error = %e, token = %token, "failed to publish activity");
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "activity".to_string());
        self.path
            .with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4().simple()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Consumer side
// ─────────────────────────────────────────────────────────────────────────────

/// Polling consumer that reports only *changes* of the activity token.
pub struct ActivityWatcher {
    channel: ActivityChannel,
    current: ActivityToken,
    last_error: Option<String>,
}

impl ActivityWatcher {
    /// Start watching; the initially observed token is `idle`.
    pub fn new(channel: ActivityChannel) -> Self {
        Self {
            channel,
            current: ActivityToken::Idle,
            last_error: None,
        }
    }

    pub fn current(&self) -> ActivityToken {
        self.current
    }

    /// Poll once. Returns the new token if it differs from the last one seen.
    ///
    /// Unrecognised values and read failures never propagate: they are
    /// logged (read failures once per distinct error) and count as no change.
    pub fn observe(&mut self) -> Option<ActivityToken> {
        match self.channel.poll() {
            Ok(signal) => {
                self.last_error = None;
                match signal {
                    ActivitySignal::Token(token) if token != self.current => {
                        self.current = token;
                        Some(token)
                    }
                    ActivitySignal::Token(_) => None,
                    ActivitySignal::Unrecognized(value) => {
                        debug!(value, "ignoring unrecognized activity value");
                        None
                    }
                }
            }
            Err(e) => {
                let msg = e.to_string();
                if self.last_error.as_deref() != Some(msg.as_str()) {
                    warn!(error = %msg, "activity slot unreadable");
                    self.last_error = Some(msg);
                }
                None
            }
        }
    }

    /// Poll every `interval` and call `on_change` for each observed change
    /// until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run<F>(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>, mut on_change: F)
    where
        F: FnMut(ActivityToken),
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(path = %self.channel.path().display(), ?interval, "watching activity slot");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(token) = self.observe() {
                        on_change(token);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("activity watcher stopped");
    }
}
