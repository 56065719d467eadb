//! Stream Session State
//!
//! Per-turn mutable state for one streamed model reply being rendered into
//! one conversation. The session tracks the accumulated text, the live
//! message being edited in place, and the edit cadence; the drive loop in
//! [`super::renderer`] owns the transport calls.

use tokio::sync::watch;

use crate::chat::{ChatKind, ConversationId, MessageHandle, TurnId};
use crate::render::detect::{classify_at_end, classify_prefix, PayloadKind};
use crate::render::fence::safe_render;
use crate::render::segment::SplitPlan;

/// Edit cadence configuration
///
/// Streaming edits are throttled to one per `period` chunks. Shared
/// conversations get a slower cadence to keep group noise down, and some
/// models override the period outright (substring match on the model
/// name, first hit wins).
#[derive(Clone, Debug)]
pub struct CadencePolicy {
    /// Period for direct conversations
    pub default_period: u32,
    /// Period for group and thread conversations
    pub shared_period: u32,
    /// Period applied after a long reply has been segmented
    pub post_split_period: u32,
    /// Case-insensitive model-name substrings with their periods
    pub model_overrides: Vec<(String, u32)>,
}

impl Default for CadencePolicy {
    fn default() -> Self {
        Self {
            default_period: 20,
            shared_period: 35,
            post_split_period: 40,
            model_overrides: vec![("gpt-4o".to_string(), 25), ("gemini".to_string(), 1)],
        }
    }
}

impl CadencePolicy {
    /// Resolve the edit period for `model` in a conversation of `kind`
    ///
    /// Model overrides win over the conversation-kind period.
    #[must_use]
    pub fn period_for(&self, model: &str, kind: ChatKind) -> u32 {
        let lowered = model.to_lowercase();
        for (pattern, period) in &self.model_overrides {
            if lowered.contains(&pattern.to_lowercase()) {
                return (*period).max(1);
            }
        }
        let period = if kind.is_shared() {
            self.shared_period
        } else {
            self.default_period
        };
        period.max(1)
    }
}

/// Cancellation token for one streaming turn
///
/// Carries the serial this turn was started with and a watch on the
/// conversation's latest serial. When a newer turn starts, the watched
/// value moves past ours and the turn becomes stale. Checked between
/// chunks only, so a transport call is never torn mid-flight.
#[derive(Clone, Debug)]
pub struct TurnToken {
    serial: u64,
    latest: Option<watch::Receiver<u64>>,
}

impl TurnToken {
    /// Token tied to a conversation's serial watch
    #[must_use]
    pub fn new(serial: u64, latest: watch::Receiver<u64>) -> Self {
        Self {
            serial,
            latest: Some(latest),
        }
    }

    /// Token that never goes stale, for tests and one-shot turns
    #[must_use]
    pub fn detached() -> Self {
        Self {
            serial: 0,
            latest: None,
        }
    }

    /// True once a newer turn has superseded this one
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.latest
            .as_ref()
            .is_some_and(|rx| *rx.borrow() != self.serial)
    }
}

/// State of one streamed reply being rendered into a conversation
#[derive(Debug)]
pub struct StreamSession {
    conversation: ConversationId,
    turn: TurnId,
    buffer: String,
    last_rendered: String,
    tick_count: u64,
    cadence: u32,
    post_split_cadence: u32,
    payload_kind: PayloadKind,
    title_prefix: Option<String>,
    live_handle: Option<MessageHandle>,
    reply_anchor: Option<MessageHandle>,
    split_occurred: bool,
    pending_carry: Option<String>,
}

impl StreamSession {
    /// Start a session for one turn
    pub fn new(
        conversation: ConversationId,
        kind: ChatKind,
        model: &str,
        cadence: &CadencePolicy,
        title_prefix: Option<String>,
        reply_anchor: Option<MessageHandle>,
    ) -> Self {
        Self {
            conversation,
            turn: TurnId::new(),
            buffer: String::new(),
            last_rendered: String::new(),
            tick_count: 0,
            cadence: cadence.period_for(model, kind),
            post_split_cadence: cadence.post_split_period.max(1),
            payload_kind: PayloadKind::Unknown,
            title_prefix,
            live_handle: None,
            reply_anchor,
            split_occurred: false,
            pending_carry: None,
        }
    }

    /// Conversation this session renders into
    #[must_use]
    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// Identifier of this turn
    #[must_use]
    pub fn turn(&self) -> &TurnId {
        &self.turn
    }

    /// Accumulated raw reply text
    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Chunks received so far
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Current edit period
    #[must_use]
    pub fn cadence(&self) -> u32 {
        self.cadence
    }

    /// Payload classification so far
    #[must_use]
    pub fn payload_kind(&self) -> PayloadKind {
        self.payload_kind
    }

    /// Handle of the message currently being edited, if one exists
    #[must_use]
    pub fn live_handle(&self) -> Option<MessageHandle> {
        self.live_handle
    }

    /// Message the first send of this turn threads under, if any
    #[must_use]
    pub fn reply_anchor(&self) -> Option<MessageHandle> {
        self.reply_anchor
    }

    /// Whether a mid-stream split has happened this turn
    #[must_use]
    pub fn split_occurred(&self) -> bool {
        self.split_occurred
    }

    /// Fence opener reopened into the current buffer by the last split
    #[must_use]
    pub fn pending_carry(&self) -> Option<&str> {
        self.pending_carry.as_deref()
    }

    /// Characters the title prefix will add to a render
    #[must_use]
    pub fn title_chars(&self) -> usize {
        self.title_prefix
            .as_deref()
            .map_or(0, |t| t.chars().count())
    }

    /// Append one stream chunk
    ///
    /// Counts the tick and, while the payload kind is still undecided,
    /// re-runs classification on the accumulated prefix.
    pub fn push_chunk(&mut self, chunk: &str) {
        self.tick_count += 1;
        self.buffer.push_str(chunk);
        if !self.payload_kind.is_decided() {
            self.payload_kind = classify_prefix(&self.buffer);
        }
    }

    /// True on ticks where a throttled edit is due
    #[must_use]
    pub fn is_edit_tick(&self) -> bool {
        self.tick_count % u64::from(self.cadence) == 0
    }

    /// Title prefix (until the first segment is finalized) plus the
    /// fence-balanced form of `text`
    #[must_use]
    pub fn compose_render(&self, text: &str) -> String {
        let balanced = safe_render(text);
        match self.title_prefix.as_deref() {
            Some(title) => format!("{title}{balanced}"),
            None => balanced.into_owned(),
        }
    }

    /// The text a render right now would display
    #[must_use]
    pub fn render_candidate(&self) -> String {
        self.compose_render(&self.buffer)
    }

    /// True when `candidate` differs from what the live message shows
    #[must_use]
    pub fn differs_from_rendered(&self, candidate: &str) -> bool {
        candidate != self.last_rendered
    }

    /// Record a successful render of `text` into `handle`
    pub fn mark_rendered(&mut self, text: String, handle: MessageHandle) {
        self.last_rendered = text;
        self.live_handle = Some(handle);
    }

    /// Apply a split: the head has been finalized elsewhere, the tail
    /// becomes the new working buffer
    ///
    /// Clears the live handle (the next render starts a fresh message),
    /// drops the title (it belongs to the first segment only), widens the
    /// cadence, and remembers the carried fence opener for segment
    /// bookkeeping.
    pub fn apply_split(&mut self, plan: SplitPlan) {
        self.buffer = plan.tail;
        self.pending_carry = plan.carry;
        self.title_prefix = None;
        self.live_handle = None;
        self.last_rendered.clear();
        self.split_occurred = true;
        self.cadence = self.post_split_cadence;
    }

    /// Take the carried fence opener, leaving none
    pub fn take_carry(&mut self) -> Option<String> {
        self.pending_carry.take()
    }

    /// Resolve classification at end of stream
    ///
    /// A stream that ended while still undecided is prose.
    pub fn finish_classification(&mut self) {
        if !self.payload_kind.is_decided() {
            self.payload_kind = classify_at_end(&self.buffer);
        }
    }
}
