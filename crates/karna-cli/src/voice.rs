//! `karna voice` – the assistant with the terminal standing in for the
//! microphone and the speaker.

use std::io::Write;

use async_trait::async_trait;
use colored::Colorize;
use karna_middleware::ActivityChannel;
use karna_runtime::{
    ChatLog, DeliveryAssistant, FaqTable, LlmClient, SpeechRecognizer, SpeechSynthesizer, UnansweredLog,
    VoiceSession,
};
use karna_types::KarnaError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::watch;
use tracing::warn;

use crate::config::Config;

/// Reads one utterance per line. End of input counts as saying "bye".
pub struct TerminalEars<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> TerminalEars<R> {
    pub fn new(input: R) -> Self {
        Self {
            lines: input.lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> SpeechRecognizer for TerminalEars<R> {
    async fn listen(&mut self) -> Result<Option<String>, KarnaError> {
        print!("{} ", "you>".bold().green());
        std::io::stdout().flush().ok();

        match self.lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => Ok(None),
            Ok(Some(line)) => Ok(Some(line)),
            Ok(None) => Ok(Some("bye".to_string())),
            Err(e) => Err(KarnaError::Transport(format!("read terminal: {e}"))),
        }
    }
}

/// Prints replies instead of speaking them.
pub struct TerminalVoice<W> {
    out: W,
}

impl<W: Write> TerminalVoice<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

#[async_trait]
impl<W: Write + Send> SpeechSynthesizer for TerminalVoice<W> {
    async fn speak(&mut self, text: &str) -> Result<(), KarnaError> {
        writeln!(self.out, "{} {}", "karna>".bold().cyan(), text)
            .and_then(|()| self.out.flush())
            .map_err(|e| KarnaError::Transport(format!("write terminal: {e}")))
    }
}

pub fn assistant(cfg: &Config) -> DeliveryAssistant {
    DeliveryAssistant::new(
        FaqTable::delivery(),
        LlmClient::new(
            cfg.voice.llm_base_url.clone(),
            cfg.voice.llm_model.clone(),
            cfg.voice.llm_api_key.expose(),
        ),
        Some(UnansweredLog::new(cfg.voice.unanswered_log.clone())),
    )
    .with_chat_log(ChatLog::new(cfg.voice.chat_log.clone()))
}

/// Run a terminal conversation until an exit word, end of input or
/// `shutdown`.
pub async fn run(cfg: &Config, shutdown: watch::Receiver<bool>) {
    if cfg.voice.llm_api_key.is_empty() {
        warn!("no LLM API key configured; only FAQ questions will be answered");
    }
    VoiceSession::new(
        TerminalEars::new(tokio::io::BufReader::new(tokio::io::stdin())),
        TerminalVoice::new(std::io::stdout()),
        assistant(cfg),
        ActivityChannel::new(&cfg.activity_file),
    )
    .with_greeting(cfg.voice.greeting.clone())
    .run(shutdown)
    .await;
}
