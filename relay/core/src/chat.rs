//! Chat Identifiers and Context
//!
//! Identifier newtypes shared by every layer: which conversation a turn
//! belongs to, which transport message is being edited, which user asked.
//! The relay treats all of them as opaque; only the transport knows what
//! they mean on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier for one chat thread.
///
/// Direct chats use the peer id, group chats the (negative) group id, and
/// forum-style threads combine group id and thread id so that two threads
/// of the same group never share a live message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Create a conversation id from a raw string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Conversation id for a direct chat with a user
    #[must_use]
    pub fn direct(user: UserId) -> Self {
        Self(user.0.to_string())
    }

    /// Conversation id for a group chat
    #[must_use]
    pub fn group(chat_id: i64) -> Self {
        Self(chat_id.to_string())
    }

    /// Conversation id for a thread inside a group chat
    #[must_use]
    pub fn thread(chat_id: i64, thread_id: i64) -> Self {
        Self(format!("{chat_id}_{thread_id}"))
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-level user identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a message the transport has accepted.
///
/// Assigned by the transport on `send_message`; the only thing the relay
/// ever does with it is pass it back for edits and reply-threading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle(pub i64);

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation id for one conversation turn, used in log lines
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TurnId(pub String);

impl TurnId {
    /// Generate a new unique turn ID from a random 64-bit value
    #[must_use]
    pub fn new() -> Self {
        use rand::Rng;
        let bytes: [u8; 8] = rand::thread_rng().gen();
        Self(format!("turn_{}", hex::encode(bytes)))
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of chat a conversation lives in.
///
/// Shared chats (groups and threads) get a wider edit cadence because
/// edit traffic there is rate-limited more aggressively by real transports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatKind {
    /// One-on-one chat
    Direct,
    /// Group chat without topic threads
    Group,
    /// Topic thread inside a group
    Thread,
}

impl ChatKind {
    /// Whether this chat is shared by multiple participants
    #[must_use]
    pub fn is_shared(self) -> bool {
        matches!(self, Self::Group | Self::Thread)
    }
}

/// Where a turn is happening: the conversation and its chat kind
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatContext {
    /// Conversation the turn belongs to
    pub conversation: ConversationId,
    /// Kind of chat the conversation lives in
    pub kind: ChatKind,
}

impl ChatContext {
    /// Context for a direct chat with a user
    #[must_use]
    pub fn direct(user: UserId) -> Self {
        Self {
            conversation: ConversationId::direct(user),
            kind: ChatKind::Direct,
        }
    }

    /// Context for a group chat
    #[must_use]
    pub fn group(chat_id: i64) -> Self {
        Self {
            conversation: ConversationId::group(chat_id),
            kind: ChatKind::Group,
        }
    }

    /// Context for a thread inside a group chat
    #[must_use]
    pub fn thread(chat_id: i64, thread_id: i64) -> Self {
        Self {
            conversation: ConversationId::thread(chat_id, thread_id),
            kind: ChatKind::Thread,
        }
    }
}
