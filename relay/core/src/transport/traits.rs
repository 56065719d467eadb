//! Chat Transport Traits
//!
//! Core trait definition for the chat-facing side of the relay.
//!
//! A [`ChatTransport`] delivers rendered text into a conversation and can
//! edit messages it previously sent. The streaming renderer drives it hard:
//! live messages are edited repeatedly while tokens arrive, then retired.

use std::fmt;

use async_trait::async_trait;

use crate::chat::{ConversationId, MessageHandle};

/// How message text should be interpreted by the transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextMode {
    /// Formatted markup (the transport's markdown dialect)
    #[default]
    Markdown,
    /// Literal text, no markup processing
    Plain,
}

impl fmt::Display for TextMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Markdown => write!(f, "markdown"),
            Self::Plain => write!(f, "plain"),
        }
    }
}

/// Per-send options for [`ChatTransport::send_message`]
#[derive(Clone, Copy, Debug, Default)]
pub struct SendOptions {
    /// Message this send should thread under, if any
    pub reply_to: Option<MessageHandle>,
    /// Markup interpretation for the text
    pub mode: TextMode,
}

impl SendOptions {
    /// Options for a plain-text send with no threading
    #[must_use]
    pub fn plain() -> Self {
        Self {
            reply_to: None,
            mode: TextMode::Plain,
        }
    }

    /// Options threading under `handle`, keeping the given mode
    #[must_use]
    pub fn replying_to(handle: MessageHandle, mode: TextMode) -> Self {
        Self {
            reply_to: Some(handle),
            mode,
        }
    }
}

/// Errors that can occur during transport operations
#[derive(Debug)]
pub enum TransportError {
    /// The transport refused the message content, typically malformed markup.
    /// Recoverable by retrying the same text in [`TextMode::Plain`].
    Rejected(String),
    /// The transport is unreachable (network failure, timeout)
    Unavailable(String),
    /// Any other per-message failure (rate limit, unknown handle, ...)
    Failed(String),
}

impl TransportError {
    /// True when a literal-text retry of the same content may succeed
    #[must_use]
    pub fn is_markup_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(msg) => write!(f, "Message rejected: {msg}"),
            Self::Unavailable(msg) => write!(f, "Transport unavailable: {msg}"),
            Self::Failed(msg) => write!(f, "Operation failed: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Transport trait for the chat-service side of the relay
///
/// Implementations handle the specific chat service. The renderer only ever
/// needs two operations: append a new message to a conversation, or replace
/// the text of a message it sent earlier.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a new message into `conversation`, returning its handle
    async fn send_message(
        &self,
        conversation: &ConversationId,
        text: &str,
        options: SendOptions,
    ) -> Result<MessageHandle, TransportError>;

    /// Replace the full text of a previously sent message
    async fn edit_message(
        &self,
        handle: MessageHandle,
        text: &str,
        mode: TextMode,
    ) -> Result<(), TransportError>;

    /// Delete a previously sent message
    ///
    /// Best-effort. Transports that cannot delete may report `Failed`.
    async fn delete_message(&self, handle: MessageHandle) -> Result<(), TransportError>;
}
