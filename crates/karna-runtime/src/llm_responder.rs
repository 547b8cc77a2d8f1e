//! Answering what the FAQ table cannot.
//!
//! [`LlmClient`] speaks the OpenAI-compatible `/v1/chat/completions`
//! protocol, so it works against Groq (`https://api.groq.com/openai`),
//! OpenAI or a local server such as Ollama. [`DeliveryAssistant`] puts the
//! pieces together: FAQ first, then the model with the running
//! conversation as context, and any answer the model admits it does not
//! know goes to the [`UnansweredLog`] for later curation. With a
//! [`ChatLog`] attached the conversation itself survives a restart.
//!
//! # Example
//!
//! ```rust,no_run
//! use karna_runtime::faq::FaqTable;
//! use karna_runtime::llm_responder::{DeliveryAssistant, LlmClient};
//!
//! let llm = LlmClient::new("https://api.groq.com/openai", "llama3-70b-8192", "gsk_...");
//! let assistant = DeliveryAssistant::new(FaqTable::delivery(), llm, None);
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use karna_types::KarnaError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::faq::FaqTable;
use crate::voice::Responder;

const MAX_TOKENS: u32 = 1024;
const TEMPERATURE: f32 = 0.7;

/// Phrases by which the model admits it has no answer.
const UNANSWERED_MARKERS: [&str; 2] = ["I don't know", "I couldn't find"];

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

impl From<LlmError> for KarnaError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Http(e) => match e.status() {
                Some(status) => KarnaError::Api {
                    status: status.as_u16(),
                    body: e.to_string(),
                },
                None => KarnaError::Transport(e.to_string()),
            },
            LlmError::BadResponse(msg) => KarnaError::BadResponse(msg),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message types (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmClient
// ─────────────────────────────────────────────────────────────────────────────

/// An async client for a hosted chat-completions endpoint.
pub struct LlmClient {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" })
            .finish()
    }
}

impl LlmClient {
    /// `api_key` may be empty for servers that need no authentication.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Send `messages` and return the assistant's reply text.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Http`] if the request fails or the server answers
    /// with an error status, or [`LlmError::BadResponse`] if the reply has no
    /// choices.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            stream: false,
        };

        let mut request = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response: ChatResponse = request.send().await?.error_for_status()?.json().await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::BadResponse("empty choices array".into()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unanswered-query log
// ─────────────────────────────────────────────────────────────────────────────

/// JSON array of questions the assistant could not answer.
#[derive(Debug, Clone)]
pub struct UnansweredLog {
    path: PathBuf,
}

impl UnansweredLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every recorded query, oldest first. A missing or empty file is an
    /// empty log.
    pub fn entries(&self) -> Result<Vec<String>, KarnaError> {
        read_json_list(&self.path)
    }

    pub fn record(&self, query: &str) -> Result<(), KarnaError> {
        let mut entries = self.entries()?;
        entries.push(query.to_string());
        write_json_list(&self.path, &entries)?;
        info!(query, "query saved for training");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat log
// ─────────────────────────────────────────────────────────────────────────────

/// Conversation history kept on disk as a JSON array of messages.
#[derive(Debug, Clone)]
pub struct ChatLog {
    path: PathBuf,
}

impl ChatLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The saved conversation. A missing or empty file is a fresh one.
    pub fn load(&self) -> Result<Vec<ChatMessage>, KarnaError> {
        read_json_list(&self.path)
    }

    /// Replace the saved conversation with `history`.
    pub fn save(&self, history: &[ChatMessage]) -> Result<(), KarnaError> {
        write_json_list(&self.path, history)
    }
}

fn read_json_list<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, KarnaError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(KarnaError::Storage(format!("read {}: {e}", path.display()))),
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw)
        .map_err(|e| KarnaError::Storage(format!("parse {}: {e}", path.display())))
}

/// Write through a sibling temp file so a crash never leaves half a file.
fn write_json_list<T: Serialize>(path: &Path, items: &[T]) -> Result<(), KarnaError> {
    let json = serde_json::to_string_pretty(items).map_err(|e| KarnaError::Storage(e.to_string()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{name}.tmp"));
    fs::write(&tmp, json)
        .map_err(|e| KarnaError::Storage(format!("write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        KarnaError::Storage(format!("replace {}: {e}", path.display()))
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// DeliveryAssistant
// ─────────────────────────────────────────────────────────────────────────────

/// FAQ-first responder used by the voice session.
pub struct DeliveryAssistant {
    faq: FaqTable,
    llm: LlmClient,
    history: Vec<ChatMessage>,
    unanswered: Option<UnansweredLog>,
    chat_log: Option<ChatLog>,
}

impl DeliveryAssistant {
    pub fn new(faq: FaqTable, llm: LlmClient, unanswered: Option<UnansweredLog>) -> Self {
        Self {
            faq,
            llm,
            history: Vec::new(),
            unanswered,
            chat_log: None,
        }
    }

    /// Resume the conversation saved in `log` and keep it up to date after
    /// every answered turn. An unreadable log starts a fresh conversation.
    pub fn with_chat_log(mut self, log: ChatLog) -> Self {
        match log.load() {
            Ok(history) => {
                debug!(messages = history.len(), path = %log.path().display(), "chat log loaded");
                self.history = history;
            }
            Err(e) => warn!(error = %e, "could not load chat log; starting fresh"),
        }
        self.chat_log = Some(log);
        self
    }

    fn save_history(&self) {
        if let Some(log) = &self.chat_log {
            if let Err(e) = log.save(&self.history) {
                warn!(error = %e, "could not save chat log");
            }
        }
    }

    /// The conversation so far, as sent to the model.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }
}

#[async_trait]
impl Responder for DeliveryAssistant {
    async fn respond(&mut self, query: &str) -> Result<String, KarnaError> {
        let query = query.trim().to_lowercase();

        if let Some(answer) = self.faq.lookup(&query) {
            debug!("answered from FAQ");
            let answer = answer.to_string();
            self.history.push(ChatMessage::user(query));
            self.history.push(ChatMessage::assistant(answer.clone()));
            self.save_history();
            return Ok(answer);
        }

        self.history.push(ChatMessage::user(query.clone()));
        let answer = match self.llm.complete(&self.history).await {
            Ok(answer) => answer,
            Err(e) => {
                // Keep the history strictly alternating.
                self.history.pop();
                return Err(e.into());
            }
        };
        self.history.push(ChatMessage::assistant(answer.clone()));
        self.save_history();

        if UNANSWERED_MARKERS.iter().any(|m| answer.contains(m)) {
            if let Some(log) = &self.unanswered {
                if let Err(e) = log.record(&query) {
                    warn!(error = %e, "could not save unanswered query");
                }
            }
        }
        Ok(answer)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
