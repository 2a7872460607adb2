//! AI reply backend.
//!
//! [`HttpAssistant`] talks to any OpenAI-compatible `/chat/completions`
//! endpoint. The server runs without a backend when none is configured; user
//! messages are then stored and published with no reply.
//!
//! With metadata extraction on, the model is asked to end each reply with a
//! `<metadata>{...}</metadata>` block describing the conversation. The block
//! is stripped from the reply text and parsed into [`ConversationMetadata`];
//! a malformed block is logged and ignored.

use std::time::Duration;

use async_trait::async_trait;
use chatline_core::{Conversation, ConversationMetadata, Role};
use chatline_settings::AssistantSettings;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Assistant failures. Routes map all of them to `502 Bad Gateway`.
#[derive(Debug, Error)]
pub enum AssistantError {
    /// Transport failure or undecodable body.
    #[error("assistant request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-success status from the backend.
    #[error("assistant returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error text from the body, or the raw body.
        message: String,
    },
    /// A success response without any choice content.
    #[error("assistant returned no content")]
    EmptyResponse,
}

/// A generated reply.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssistantReply {
    /// Reply text.
    pub content: String,
    /// Metadata derived alongside the reply, if the backend produces any.
    pub metadata: Option<ConversationMetadata>,
}

/// Produces the assistant's reply to a conversation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// Generate a reply to the conversation's latest state.
    async fn reply(&self, conversation: &Conversation) -> Result<AssistantReply, AssistantError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

const METADATA_OPEN: &str = "<metadata>";
const METADATA_CLOSE: &str = "</metadata>";
const METADATA_INSTRUCTION: &str = "After your reply, add one final line of the form \
<metadata>{\"title\": string, \"keyPoints\": [string], \"summary\": string, \"tags\": [string]}</metadata> \
describing the whole conversation so far. Leave out any field you cannot fill.";

/// Client for an OpenAI-compatible chat completion API.
#[derive(Clone, Debug)]
pub struct HttpAssistant {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    system_prompt: Option<String>,
    extract_metadata: bool,
}

impl HttpAssistant {
    /// Create a client for `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AssistantError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            system_prompt: None,
            extract_metadata: false,
        })
    }

    /// Build from settings. Returns `None` when no base URL is configured.
    ///
    /// The API key is read from the environment variable named by
    /// `api_key_env`; a missing key sends unauthenticated requests.
    pub fn from_settings(settings: &AssistantSettings) -> Result<Option<Self>, AssistantError> {
        let Some(base_url) = settings.base_url.as_deref() else {
            return Ok(None);
        };
        let mut assistant = Self::new(
            base_url,
            settings.model.as_str(),
            Duration::from_millis(settings.timeout_ms),
        )?;
        assistant.api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        assistant.system_prompt.clone_from(&settings.system_prompt);
        assistant.extract_metadata = settings.extract_metadata;
        Ok(Some(assistant))
    }

    /// Set the bearer token.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Prepend a system prompt to every request.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Ask for conversation metadata alongside each reply.
    #[must_use]
    pub fn with_metadata_extraction(mut self, enabled: bool) -> Self {
        self.extract_metadata = enabled;
        self
    }

    fn build_messages<'a>(&'a self, conversation: &'a Conversation) -> Vec<ChatMessage<'a>> {
        let mut messages = Vec::with_capacity(conversation.messages.len() + 3);
        if let Some(prompt) = &self.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: prompt,
            });
        }
        if self.extract_metadata {
            messages.push(ChatMessage {
                role: "system",
                content: METADATA_INSTRUCTION,
            });
        }
        if let Some(context) = &conversation.context {
            messages.push(ChatMessage {
                role: "system",
                content: &context.content,
            });
        }
        messages.extend(conversation.messages.iter().map(|m| ChatMessage {
            role: match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
            },
            content: &m.content,
        }));
        messages
    }
}

#[async_trait]
impl AssistantBackend for HttpAssistant {
    async fn reply(&self, conversation: &Conversation) -> Result<AssistantReply, AssistantError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: self.build_messages(conversation),
        };
        debug!(
            model = %self.model,
            conversation_id = %conversation.id,
            message_count = request.messages.len(),
            "sending chat completion request"
        );

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = parse_error_message(&body);
            error!(status = status.as_u16(), %message, "assistant API error");
            return Err(AssistantError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let raw = parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or(AssistantError::EmptyResponse)?;
        let (content, metadata) = if self.extract_metadata {
            split_metadata(&raw)
        } else {
            (raw, None)
        };
        if content.trim().is_empty() {
            return Err(AssistantError::EmptyResponse);
        }

        Ok(AssistantReply { content, metadata })
    }
}

/// Separate a trailing `<metadata>` block from the reply text.
///
/// Returns the text without the block, and the parsed metadata when the block
/// is valid and sets at least one field.
fn split_metadata(raw: &str) -> (String, Option<ConversationMetadata>) {
    let Some(start) = raw.rfind(METADATA_OPEN) else {
        return (raw.to_string(), None);
    };
    let body_start = start + METADATA_OPEN.len();
    let Some(body_len) = raw[body_start..].find(METADATA_CLOSE) else {
        return (raw.to_string(), None);
    };
    let body = raw[body_start..body_start + body_len].trim();
    let rest = &raw[body_start + body_len + METADATA_CLOSE.len()..];
    let content = format!("{}{}", raw[..start].trim_end(), rest.trim_end());

    let metadata = match serde_json::from_str::<ConversationMetadata>(body) {
        Ok(metadata) if !metadata.is_empty() => Some(metadata),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, len = body.len(), "ignoring malformed metadata block");
            None
        }
    };
    (content, metadata)
}

/// Pull `error.message` out of an OpenAI-style error body, falling back to
/// the raw text.
fn parse_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}
