//! [`VoiceSession`] – the spoken-conversation loop and the main producer
//! of the activity slot.
//!
//! | Moment | Activity |
//! |---|---|
//! | greeting | `answering`, then `idle` |
//! | waiting for speech | `listening` |
//! | working out a reply | `thinking` |
//! | speaking the reply | `answering`, then `idle` |
//! | exit word heard | `last`, then the loop ends |
//! | a turn failed | `idle`, and the loop carries on |
//!
//! Speech capture, speech synthesis and answer generation are traits so the
//! session can run against cloud engines, a terminal, or test doubles.

use async_trait::async_trait;
use karna_middleware::ActivityChannel;
use karna_types::{ActivityToken, KarnaError};
use tokio::sync::watch;
use tracing::{info, warn};

/// Saying any of these ends the session.
pub const EXIT_WORDS: [&str; 4] = ["exit", "quit", "stop", "bye"];

pub const DEFAULT_GREETING: &str = "Hello! How can I help you?";

#[async_trait]
pub trait SpeechRecognizer: Send {
    /// Capture one utterance. `Ok(None)` means nothing intelligible was
    /// heard; the session simply listens again.
    async fn listen(&mut self) -> Result<Option<String>, KarnaError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send {
    async fn speak(&mut self, text: &str) -> Result<(), KarnaError>;
}

#[async_trait]
pub trait Responder: Send {
    async fn respond(&mut self, query: &str) -> Result<String, KarnaError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Answered { query: String, answer: String },
    /// Nothing was heard.
    Silent,
    /// An exit word was heard.
    Exit,
}

pub struct VoiceSession<L, S, R> {
    recognizer: L,
    synthesizer: S,
    responder: R,
    activity: ActivityChannel,
    greeting: String,
}

impl<L, S, R> VoiceSession<L, S, R>
where
    L: SpeechRecognizer,
    S: SpeechSynthesizer,
    R: Responder,
{
    pub fn new(recognizer: L, synthesizer: S, responder: R, activity: ActivityChannel) -> Self {
        Self {
            recognizer,
            synthesizer,
            responder,
            activity,
            greeting: DEFAULT_GREETING.to_string(),
        }
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = greeting.into();
        self
    }

    /// Speak the greeting. A synthesis failure is logged, not returned.
    pub async fn greet(&mut self) {
        self.activity.signal(ActivityToken::Answering);
        if let Err(e) = self.synthesizer.speak(&self.greeting).await {
            warn!(error = %e, "greeting failed");
        }
        self.activity.signal(ActivityToken::Idle);
    }

    /// Listen once and, if something was said, answer it.
    pub async fn turn(&mut self) -> Result<TurnOutcome, KarnaError> {
        self.activity.signal(ActivityToken::Listening);
        let Some(heard) = self.recognizer.listen().await? else {
            return Ok(TurnOutcome::Silent);
        };
        let query = heard.trim().to_lowercase();
        if query.is_empty() {
            return Ok(TurnOutcome::Silent);
        }
        if EXIT_WORDS.contains(&query.as_str()) {
            self.activity.signal(ActivityToken::Last);
            return Ok(TurnOutcome::Exit);
        }

        info!(query, "user said");
        self.activity.signal(ActivityToken::Thinking);
        let answer = self.responder.respond(&query).await?;
        info!(answer, "responding");
        self.activity.signal(ActivityToken::Answering);
        self.synthesizer.speak(&answer).await?;
        self.activity.signal(ActivityToken::Idle);
        Ok(TurnOutcome::Answered { query, answer })
    }

    /// Greet, then take turns until an exit word is heard or `shutdown`
    /// flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        self.greet().await;
        info!("voice session ready");

        loop {
            let turn = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                turn = self.turn() => turn,
            };
            match turn {
                Ok(TurnOutcome::Exit) => {
                    info!("exit word heard, ending voice session");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "voice turn failed");
                    self.activity.signal(ActivityToken::Idle);
                }
            }
        }
        info!("voice session stopped");
    }
}
