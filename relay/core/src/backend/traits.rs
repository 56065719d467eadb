//! Model Backend Traits
//!
//! Trait definitions for conversational model backends. This abstraction
//! lets the relay stream turns from different providers without changing
//! the rendering pipeline.
//!
//! # Design Philosophy
//!
//! The `ModelBackend` trait provides a common interface for:
//! - Sending a turn and receiving the reply (streaming or batch)
//! - Health checking the backend
//! - Querying available models
//!
//! Implementations handle provider-specific details (API formats, auth, etc.)

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Stream events from model backends
#[derive(Clone, Debug)]
pub enum StreamingChunk {
    /// A piece of response text
    Token(String),
    /// Response completed successfully
    Complete {
        /// The complete reply (may differ from concatenated tokens)
        message: String,
    },
    /// Error occurred during streaming
    Error(String),
}

/// Role of a prior message in the conversation history
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Message written by the chat user
    User,
    /// Message written by the model
    Assistant,
}

impl Role {
    /// Wire name used by chat-completion APIs
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One prior exchange carried into the prompt
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    /// Who wrote it
    pub role: Role,
    /// Message text
    pub content: String,
}

impl HistoryEntry {
    /// A user-authored history entry
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// A model-authored history entry
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Configuration for one model turn
#[derive(Clone, Debug)]
pub struct ChatPrompt {
    /// The user message for this turn
    pub prompt: String,
    /// Model to use (backend-specific identifier)
    pub model: String,
    /// System prompt (optional, sent ahead of the conversation)
    pub system: Option<String>,
    /// Prior exchanges, oldest first
    pub history: Vec<HistoryEntry>,
    /// Temperature (0.0-1.0, higher = more creative)
    pub temperature: f32,
    /// Maximum tokens in response (0 = provider default)
    pub max_tokens: u32,
}

impl Default for ChatPrompt {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            model: String::new(),
            system: None,
            history: Vec::new(),
            temperature: 0.7,
            max_tokens: 0,
        }
    }
}

impl ChatPrompt {
    /// Create a new prompt with message and model
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set conversation history
    #[must_use]
    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.history = history;
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Response from a non-streaming model request
#[derive(Clone, Debug)]
pub struct ChatReply {
    /// The response text
    pub content: String,
    /// Model that generated the response
    pub model: String,
    /// Tokens used (if reported)
    pub tokens_used: Option<u32>,
    /// Response generation time in milliseconds
    pub duration_ms: Option<u64>,
}

/// Model backend trait
///
/// Implement this trait to add support for different model providers.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Get the backend name (e.g., "OpenAI")
    fn name(&self) -> &str;

    /// Check if the backend is healthy and reachable
    async fn health_check(&self) -> bool;

    /// Send a turn and get a streaming response
    ///
    /// Returns a channel receiver that will receive chunks as they arrive.
    /// The channel closes when the response is complete or an error occurs.
    async fn send_streaming(
        &self,
        prompt: &ChatPrompt,
    ) -> anyhow::Result<mpsc::Receiver<StreamingChunk>>;

    /// Send a turn and wait for the complete response (non-streaming)
    ///
    /// Useful for internal queries (summaries, plans) where streaming
    /// would be noise.
    async fn send(&self, prompt: &ChatPrompt) -> anyhow::Result<ChatReply>;

    /// List available model identifiers
    async fn list_models(&self) -> anyhow::Result<Vec<String>>;

    /// Check if a specific model is available
    async fn has_model(&self, model: &str) -> anyhow::Result<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| m == model))
    }
}
