//! Proactive Outreach Planner
//!
//! When enabled, the relay occasionally messages the user first. A daily
//! planning pass asks the backend (non-streaming) for 2-3 suitable times
//! today; each upcoming slot becomes a spawned task that sleeps until the
//! planned instant, asks the backend to write the actual message, and
//! sends it over the transport as plain text.
//!
//! Planning replies use the `{"message_times": [...]}` convention below.
//! Extraction is tolerant of fences and chatter, like the envelope
//! extractor. Slots already in the past are skipped, never rescheduled.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::traits::{ChatPrompt, ModelBackend};
use crate::chat::ConversationId;
use crate::render::envelope::first_json_object;
use crate::transport::traits::{ChatTransport, SendOptions};

/// System instruction for planning and writing outreach messages
pub const OUTREACH_SYSTEM_INSTRUCTION: &str = "\
You are an assistant that occasionally reaches out to the user first. \
Your goals:\n\
1. Pick 2-3 suitable moments per day to start a conversation.\n\
2. Write messages that are worth receiving: share something interesting, \
follow up on earlier topics, or ask about ongoing plans.\n\
3. Never message at unsociable hours.\n\
The aim is a welcome check-in, not an interruption.";

/// Errors from parsing a planning reply
#[derive(Debug, Error)]
pub enum OutreachError {
    /// The reply contained no JSON object at all
    #[error("no JSON object in planning reply")]
    PlanMissing,

    /// The object was found but did not match the plan structure
    #[error("Failed to parse outreach plan: {0}")]
    PlanParse(#[from] serde_json::Error),
}

/// One planned send time for today
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedSlot {
    /// Hour of day, 0-23
    pub hour: u32,
    /// Minute, 0-59
    pub minute: u32,
    /// The model's reason for picking this time
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct PlanReply {
    #[serde(default)]
    message_times: Vec<PlanEntry>,
}

#[derive(Debug, Deserialize)]
struct PlanEntry {
    #[serde(default)]
    hour: Option<u32>,
    #[serde(default)]
    minute: Option<u32>,
    #[serde(default)]
    reason: Option<String>,
}

/// Parse the planner's `{"message_times": [...]}` reply.
///
/// Missing hour defaults to 12, missing minute to 0.
///
/// # Errors
///
/// Returns an error when no JSON object is present or the object does
/// not match the plan structure.
pub fn parse_plan(text: &str) -> Result<Vec<PlannedSlot>, OutreachError> {
    let object = first_json_object(text).ok_or(OutreachError::PlanMissing)?;
    let reply: PlanReply = serde_json::from_str(object)?;
    Ok(reply
        .message_times
        .into_iter()
        .map(|entry| PlannedSlot {
            hour: entry.hour.unwrap_or(12),
            minute: entry.minute.unwrap_or(0),
            reason: entry.reason.unwrap_or_default(),
        })
        .collect())
}

/// Resolve `slots` against today's date, keeping only future instants.
///
/// Slots with out-of-range times are skipped with a warning.
#[must_use]
pub fn upcoming_today(
    slots: &[PlannedSlot],
    now: DateTime<Local>,
) -> Vec<(DateTime<Local>, PlannedSlot)> {
    let mut scheduled = Vec::new();
    for slot in slots {
        let Some(naive) = now.date_naive().and_hms_opt(slot.hour, slot.minute, 0) else {
            warn!(
                hour = slot.hour,
                minute = slot.minute,
                "skipping outreach slot with invalid time"
            );
            continue;
        };
        let Some(instant) = naive.and_local_timezone(Local).single() else {
            continue;
        };
        if instant < now {
            continue;
        }
        scheduled.push((instant, slot.clone()));
    }
    scheduled
}

/// When the next daily planning pass should run: the next 01:00 local
#[must_use]
pub fn next_planning_instant(now: DateTime<Local>) -> DateTime<Local> {
    let today = now.date_naive().and_hms_opt(1, 0, 0);
    if let Some(instant) = today.and_then(|n| n.and_local_timezone(Local).single()) {
        if instant > now {
            return instant;
        }
    }
    let tomorrow = (now.date_naive() + chrono::Days::new(1)).and_hms_opt(1, 0, 0);
    tomorrow
        .and_then(|n| n.and_local_timezone(Local).single())
        .unwrap_or_else(|| now + chrono::Duration::hours(24))
}

fn build_planning_prompt(date: &str) -> String {
    format!(
        "Today is {date}. Decide on 2 or 3 times today to check in with the \
         user. Respect ordinary waking hours.\n\
         Reply with exactly this JSON structure:\n\
         {{\"message_times\": [{{\"hour\": 14, \"minute\": 30, \"reason\": \
         \"why this time\"}}]}}"
    )
}

fn build_content_prompt(now: &str, reason: &str) -> String {
    format!(
        "It is {now}. You decided to reach out to the user now because: \
         \"{reason}\".\n\
         Write one natural, conversational message the user would be glad \
         to receive. Do not mention that the message was scheduled."
    )
}

/// Plans outreach slots and spawns the tasks that deliver them
pub struct OutreachPlanner<B, T> {
    backend: Arc<B>,
    transport: Arc<T>,
    model: String,
}

impl<B, T> OutreachPlanner<B, T>
where
    B: ModelBackend + 'static,
    T: ChatTransport + 'static,
{
    /// Planner sending through `transport` with plans and content from
    /// `backend`
    pub fn new(backend: Arc<B>, transport: Arc<T>, model: impl Into<String>) -> Self {
        Self {
            backend,
            transport,
            model: model.into(),
        }
    }

    /// Ask the backend for today's outreach slots
    ///
    /// # Errors
    ///
    /// Returns an error when the backend call fails or the reply does not
    /// contain a parsable plan.
    pub async fn plan(&self) -> Result<Vec<PlannedSlot>> {
        let date = Local::now().format("%Y-%m-%d").to_string();
        let request = ChatPrompt::new(build_planning_prompt(&date), &self.model)
            .with_system(OUTREACH_SYSTEM_INSTRUCTION);
        let reply = self
            .backend
            .send(&request)
            .await
            .context("outreach planning request failed")?;
        let slots = parse_plan(&reply.content).context("outreach plan was not parsable")?;
        info!(count = slots.len(), "planned outreach slots");
        Ok(slots)
    }

    /// Spawn a delivery task per upcoming slot for `conversation`.
    ///
    /// Returns how many sends were scheduled; past and invalid slots are
    /// dropped here.
    pub fn schedule(&self, conversation: &ConversationId, slots: &[PlannedSlot]) -> usize {
        let now = Local::now();
        let upcoming = upcoming_today(slots, now);
        for (instant, slot) in &upcoming {
            let wait = (*instant - now).to_std().unwrap_or_default();
            let backend = Arc::clone(&self.backend);
            let transport = Arc::clone(&self.transport);
            let conversation = conversation.clone();
            let model = self.model.clone();
            let reason = slot.reason.clone();
            debug!(
                conversation = %conversation,
                hour = slot.hour,
                minute = slot.minute,
                "scheduled outreach send"
            );
            tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                if let Err(e) =
                    deliver(&*backend, &*transport, &conversation, &model, &reason).await
                {
                    warn!(conversation = %conversation, error = %e, "outreach delivery failed");
                }
            });
        }
        upcoming.len()
    }

    /// One full planning cycle: plan once, schedule for every conversation
    ///
    /// # Errors
    ///
    /// Returns an error when planning fails; scheduling itself is
    /// infallible.
    pub async fn run_once(&self, conversations: &[ConversationId]) -> Result<usize> {
        let slots = self.plan().await?;
        let mut scheduled = 0;
        for conversation in conversations {
            scheduled += self.schedule(conversation, &slots);
        }
        Ok(scheduled)
    }

    /// Background task that replans at startup and then at 01:00 daily
    pub fn spawn_daily(
        planner: Arc<Self>,
        conversations: Vec<ConversationId>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(e) = planner.run_once(&conversations).await {
                    warn!(error = %e, "daily outreach planning failed");
                }
                let now = Local::now();
                let next = next_planning_instant(now);
                let wait = (next - now).to_std().unwrap_or_default();
                debug!(next = %next, "outreach planner sleeping until next pass");
                tokio::time::sleep(wait).await;
            }
        })
    }
}

/// Generate and send one outreach message
async fn deliver<B, T>(
    backend: &B,
    transport: &T,
    conversation: &ConversationId,
    model: &str,
    reason: &str,
) -> Result<()>
where
    B: ModelBackend + ?Sized,
    T: ChatTransport + ?Sized,
{
    let now = Local::now().format("%Y-%m-%d %H:%M").to_string();
    let request = ChatPrompt::new(build_content_prompt(&now, reason), model)
        .with_system(OUTREACH_SYSTEM_INSTRUCTION);
    let reply = backend
        .send(&request)
        .await
        .context("outreach content request failed")?;
    transport
        .send_message(conversation, &reply.content, SendOptions::plain())
        .await
        .context("sending outreach message")?;
    info!(conversation = %conversation, "sent outreach message");
    Ok(())
}
