//! Structured Message Dispatch
//!
//! Sends the elements of a parsed message envelope as separate chat
//! messages, paced like a person typing them one after another. Delays
//! scale with message length, and follow-up messages sometimes thread
//! under the previous one based on a weighted coin flip.
//!
//! All randomness comes through the caller's [`Rng`], so tests can pin
//! every decision with a seeded or fixed generator.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::chat::{ConversationId, MessageHandle};
use crate::transport::{ChatTransport, SendOptions, TextMode, TransportError};

/// Pacing constants for multi-message dispatch
///
/// These are read-only per-turn configuration. Tests shrink them to
/// milliseconds so dispatch sequences finish instantly.
#[derive(Clone, Debug)]
pub struct DispatchPacing {
    /// Delay before a message under 50 characters
    pub short_delay: Duration,
    /// Delay before a message under 200 characters
    pub medium_delay: Duration,
    /// Base delay for longer messages
    pub long_base: Duration,
    /// Added per 100 characters beyond 200
    pub long_increment: Duration,
    /// Upper bound for any single delay
    pub long_cap: Duration,
}

impl Default for DispatchPacing {
    fn default() -> Self {
        Self {
            short_delay: Duration::from_millis(1500),
            medium_delay: Duration::from_millis(2000),
            long_base: Duration::from_millis(2500),
            long_increment: Duration::from_millis(500),
            long_cap: Duration::from_millis(4000),
        }
    }
}

impl DispatchPacing {
    /// Base delay before dispatching a message of `char_len` characters
    #[must_use]
    pub fn base_delay(&self, char_len: usize) -> Duration {
        if char_len < 50 {
            self.short_delay
        } else if char_len < 200 {
            self.medium_delay
        } else {
            let extra = (char_len - 200) as f64 / 100.0;
            let secs = self.long_base.as_secs_f64() + extra * self.long_increment.as_secs_f64();
            Duration::from_secs_f64(secs.min(self.long_cap.as_secs_f64()))
        }
    }
}

/// Probability that message `index` (of `total`) threads under its
/// predecessor
///
/// Starts from a 35% base and shifts for position, length, and whether
/// the message reads like a question. Clamped to [0, 1].
#[must_use]
pub fn reply_probability(index: usize, total: usize, content: &str) -> f64 {
    // The second message leans toward answering the first; the last
    // message leans toward standing alone. For a two-message dispatch
    // the second-message bonus wins.
    let position_factor = if index == 1 {
        0.2
    } else if index + 1 == total {
        -0.1
    } else {
        0.0
    };

    let char_len = content.chars().count();
    let length_factor = if char_len < 30 {
        0.15
    } else if char_len > 200 {
        -0.1
    } else {
        0.0
    };

    let trimmed = content.trim();
    let content_factor = if trimmed.starts_with('?') || trimmed.ends_with('?') {
        0.15
    } else {
        0.0
    };

    (0.35_f64 + position_factor + length_factor + content_factor).clamp(0.0, 1.0)
}

/// Send `messages` into `conversation` as independent chat messages
///
/// The first message goes out immediately, threading under `reply_anchor`
/// when given. Each follow-up waits a jittered length-based delay, then
/// may thread under the message before it. Structured content is sent as
/// literal text.
///
/// Returns the handles of all sent messages, in order. A failed send
/// aborts the sequence; messages already delivered stay delivered.
pub async fn dispatch_messages<T, R>(
    transport: &T,
    conversation: &ConversationId,
    messages: &[String],
    reply_anchor: Option<MessageHandle>,
    pacing: &DispatchPacing,
    rng: &mut R,
) -> Result<Vec<MessageHandle>, TransportError>
where
    T: ChatTransport + ?Sized,
    R: Rng + ?Sized,
{
    if messages.is_empty() {
        return Ok(Vec::new());
    }

    let mut handles = Vec::with_capacity(messages.len());

    let first = transport
        .send_message(
            conversation,
            &messages[0],
            SendOptions {
                reply_to: reply_anchor,
                mode: TextMode::Plain,
            },
        )
        .await?;
    handles.push(first);

    let mut previous = first;
    for (index, content) in messages.iter().enumerate().skip(1) {
        let char_len = content.chars().count();

        // 90%-110% of the base delay, so pacing never looks mechanical
        let jitter = 0.9 + rng.gen::<f64>() * 0.2;
        let delay = pacing.base_delay(char_len).mul_f64(jitter);
        tokio::time::sleep(delay).await;

        let probability = reply_probability(index, messages.len(), content);
        let draw = rng.gen::<f64>();
        let should_reply = draw < probability;
        debug!(
            index,
            char_len,
            delay_ms = delay.as_millis() as u64,
            probability,
            should_reply,
            "dispatching structured message"
        );

        let handle = transport
            .send_message(
                conversation,
                content,
                SendOptions {
                    reply_to: should_reply.then_some(previous),
                    mode: TextMode::Plain,
                },
            )
            .await?;
        handles.push(handle);
        previous = handle;
    }

    Ok(handles)
}
