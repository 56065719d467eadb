//! Long-Term Memory Store
//!
//! One JSON file per user, `memory_<user>.json`, holding small durable
//! facts the model should keep across conversations. Three pieces work
//! together:
//!
//! - [`MemoryStore`]: file-backed records with similarity deduplication,
//!   importance-ordered listing, a digest for prompt injection, and
//!   forget operations.
//! - [`ConversationTracker`]: in-memory turn counting and rolling history
//!   per conversation; reports when a summarization pass is due.
//! - [`summarize_history`]: asks the backend (non-streaming) to distill
//!   recent history into `{"memories": [...]}` entries and merges them
//!   into the store.
//!
//! Nothing here blocks a live turn. Summarization runs as its own task
//! and every failure degrades to "no new memories".

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::traits::{ChatPrompt, HistoryEntry, ModelBackend, Role};
use crate::chat::{ConversationId, UserId};
use crate::render::envelope::first_json_object;

/// Records in a digest, and the importance floor for inclusion
const DIGEST_MAX: usize = 5;
const DIGEST_MIN_IMPORTANCE: u8 = 2;

/// Existing records shown to the summarizer for dedup context
const SUMMARY_EXISTING_MAX: usize = 30;

/// Rolling history entries kept per conversation
const HISTORY_CAP: usize = 20;

/// Errors from the file-backed store
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Failed to read a memory file
    #[error("Failed to read memory file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to write a memory file
    #[error("Failed to write memory file at {path}: {source}")]
    WriteError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse a memory file
    #[error("Failed to parse memory file: {0}")]
    ParseError(#[from] serde_json::Error),

    /// No record with the requested id
    #[error("no memory with id {0}")]
    NotFound(u64),
}

/// Where a memory record came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    /// Extracted from ordinary conversation flow
    Conversation,
    /// Explicitly requested by the user
    UserExplicit,
    /// Produced by a history summarization pass
    ConversationSummary,
}

/// One durable fact about a user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Stable id within the user's file
    pub id: u64,
    /// The fact itself
    pub content: String,
    /// Importance from 1 (background) to 5 (essential)
    pub importance: u8,
    /// When the record was first written
    pub created_at: String,
    /// When the record was last written or matched
    pub updated_at: String,
    /// How many times the record was re-encountered
    pub access_count: u32,
    /// Where the record came from
    pub source: MemorySource,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct MemoryFile {
    memories: Vec<MemoryRecord>,
    last_updated: Option<String>,
}

/// What [`MemoryStore::remember`] did with the new content
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RememberOutcome {
    /// A new record was created
    Added(u64),
    /// An existing similar record was refreshed instead
    Merged(u64),
}

/// Per-id results of a batch forget
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ForgetReport {
    /// Ids that were removed
    pub removed: Vec<u64>,
    /// Ids that had no record
    pub missing: Vec<u64>,
}

/// Word-set Jaccard similarity between two texts.
///
/// Case-insensitive, whitespace-tokenized. Either side empty scores 0.
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    let words_a = word_set(a);
    let words_b = word_set(b);
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn now_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn clamp_importance(raw: i64) -> u8 {
    raw.clamp(1, 5) as u8
}

/// File-backed memory records, one file per user
#[derive(Clone, Debug)]
pub struct MemoryStore {
    dir: PathBuf,
    dedup_threshold: f64,
}

impl MemoryStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>, dedup_threshold: f64) -> Result<Self, MemoryError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| MemoryError::WriteError {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self {
            dir,
            dedup_threshold,
        })
    }

    fn user_file(&self, user: UserId) -> PathBuf {
        self.dir.join(format!("memory_{user}.json"))
    }

    fn load(&self, user: UserId) -> Result<MemoryFile, MemoryError> {
        let path = self.user_file(user);
        if !path.exists() {
            return Ok(MemoryFile::default());
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| MemoryError::ReadError {
            path: path.clone(),
            source: e,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, user: UserId, file: &MemoryFile) -> Result<(), MemoryError> {
        let path = self.user_file(user);
        let serialized = serde_json::to_string_pretty(file)?;
        std::fs::write(&path, serialized).map_err(|e| MemoryError::WriteError {
            path,
            source: e,
        })
    }

    /// Store `content` for `user`, deduplicating against existing records.
    ///
    /// A record whose similarity to the new content exceeds the configured
    /// threshold is refreshed instead: its importance rises to the max of
    /// the two, its timestamp and access count are bumped, and its text is
    /// kept. Importance is clamped to 1..=5.
    ///
    /// # Errors
    ///
    /// Returns an error when the user's file cannot be read or written.
    pub fn remember(
        &self,
        user: UserId,
        content: &str,
        importance: u8,
        source: MemorySource,
    ) -> Result<RememberOutcome, MemoryError> {
        let importance = importance.clamp(1, 5);
        let stamp = now_stamp();
        let mut file = self.load(user)?;

        for record in &mut file.memories {
            if similarity(content, &record.content) > self.dedup_threshold {
                record.updated_at = stamp.clone();
                record.importance = record.importance.max(importance);
                record.access_count += 1;
                let id = record.id;
                file.last_updated = Some(stamp);
                self.save(user, &file)?;
                debug!(user = %user, id, "refreshed similar memory");
                return Ok(RememberOutcome::Merged(id));
            }
        }

        let id = file.memories.iter().map(|m| m.id).max().unwrap_or(0) + 1;
        file.memories.push(MemoryRecord {
            id,
            content: content.to_string(),
            importance,
            created_at: stamp.clone(),
            updated_at: stamp.clone(),
            access_count: 1,
            source,
        });
        file.last_updated = Some(stamp);
        self.save(user, &file)?;
        debug!(user = %user, id, importance, "added memory");
        Ok(RememberOutcome::Added(id))
    }

    /// Records for `user`, most important and most recent first
    ///
    /// # Errors
    ///
    /// Returns an error when the user's file cannot be read.
    pub fn list(
        &self,
        user: UserId,
        max_count: usize,
        min_importance: u8,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let file = self.load(user)?;
        let mut records: Vec<MemoryRecord> = file
            .memories
            .into_iter()
            .filter(|m| m.importance >= min_importance)
            .collect();
        records.sort_by(|a, b| {
            (b.importance, b.updated_at.as_str()).cmp(&(a.importance, a.updated_at.as_str()))
        });
        records.truncate(max_count);
        Ok(records)
    }

    /// Prompt-injectable digest of the user's top records.
    ///
    /// `None` when the user has no records of digest-worthy importance.
    ///
    /// # Errors
    ///
    /// Returns an error when the user's file cannot be read.
    pub fn digest(&self, user: UserId) -> Result<Option<String>, MemoryError> {
        let records = self.list(user, DIGEST_MAX, DIGEST_MIN_IMPORTANCE)?;
        if records.is_empty() {
            return Ok(None);
        }
        let mut text =
            String::from("Things known about this user from earlier conversations:\n\n");
        for (idx, record) in records.iter().enumerate() {
            text.push_str(&format!("{}. {}\n", idx + 1, record.content));
        }
        text.push_str(
            "\nKeep these in mind during the conversation, but do not mention \
             that you are keeping notes.",
        );
        Ok(Some(text))
    }

    /// Remove one record by id
    ///
    /// # Errors
    ///
    /// `NotFound` when no record carries `id`; IO errors otherwise.
    pub fn forget(&self, user: UserId, id: u64) -> Result<(), MemoryError> {
        let mut file = self.load(user)?;
        let before = file.memories.len();
        file.memories.retain(|m| m.id != id);
        if file.memories.len() == before {
            return Err(MemoryError::NotFound(id));
        }
        file.last_updated = Some(now_stamp());
        self.save(user, &file)?;
        Ok(())
    }

    /// Remove several records, reporting per-id outcomes.
    ///
    /// The file is loaded and written once regardless of how many ids
    /// are given.
    ///
    /// # Errors
    ///
    /// Returns an error when the user's file cannot be read or written.
    pub fn forget_many(&self, user: UserId, ids: &[u64]) -> Result<ForgetReport, MemoryError> {
        let mut file = self.load(user)?;
        let mut report = ForgetReport::default();
        for &id in ids {
            let before = file.memories.len();
            file.memories.retain(|m| m.id != id);
            if file.memories.len() < before {
                report.removed.push(id);
            } else {
                report.missing.push(id);
            }
        }
        if !report.removed.is_empty() {
            file.last_updated = Some(now_stamp());
            self.save(user, &file)?;
        }
        Ok(report)
    }
}

// =============================================================================
// Turn tracking
// =============================================================================

#[derive(Default)]
struct TrackedConversation {
    history: Vec<HistoryEntry>,
    turns_since_summary: usize,
}

/// In-memory turn counter and rolling history per conversation.
///
/// Counts user turns only; every `summary_interval`-th one resets the
/// counter and reports that a summarization pass is due.
pub struct ConversationTracker {
    summary_interval: usize,
    state: DashMap<String, TrackedConversation>,
}

impl ConversationTracker {
    /// Tracker that reports a due summarization every `summary_interval`
    /// user turns
    #[must_use]
    pub fn new(summary_interval: usize) -> Self {
        Self {
            summary_interval: summary_interval.max(1),
            state: DashMap::new(),
        }
    }

    /// Record a user message. Returns true when a summarization is due.
    pub fn record_user(&self, conversation: &ConversationId, text: &str) -> bool {
        let mut entry = self.state.entry(conversation.to_string()).or_default();
        entry.history.push(HistoryEntry::user(text));
        trim_history(&mut entry.history);
        entry.turns_since_summary += 1;
        if entry.turns_since_summary >= self.summary_interval {
            entry.turns_since_summary = 0;
            return true;
        }
        false
    }

    /// Record the model's reply for a conversation
    pub fn record_assistant(&self, conversation: &ConversationId, text: &str) {
        let mut entry = self.state.entry(conversation.to_string()).or_default();
        entry.history.push(HistoryEntry::assistant(text));
        trim_history(&mut entry.history);
    }

    /// Snapshot of the rolling history, oldest first
    #[must_use]
    pub fn history(&self, conversation: &ConversationId) -> Vec<HistoryEntry> {
        self.state
            .get(conversation.as_str())
            .map(|entry| entry.history.clone())
            .unwrap_or_default()
    }

    /// Drop all tracked state for a conversation
    pub fn clear(&self, conversation: &ConversationId) {
        self.state.remove(conversation.as_str());
    }
}

fn trim_history(history: &mut Vec<HistoryEntry>) {
    if history.len() > HISTORY_CAP {
        let excess = history.len() - HISTORY_CAP;
        history.drain(..excess);
    }
}

// =============================================================================
// Summarization
// =============================================================================

#[derive(Debug, Deserialize)]
struct SummaryReply {
    memories: Vec<SummaryEntry>,
}

#[derive(Debug, Deserialize)]
struct SummaryEntry {
    content: String,
    #[serde(default)]
    importance: Option<i64>,
}

/// Parse the summarizer's `{"memories": [...]}` reply.
///
/// Tolerates fences and chatter around the object. `None` when no
/// parsable object is present; entries with blank content are dropped
/// and missing importance defaults to 3.
#[must_use]
pub fn parse_memory_reply(text: &str) -> Option<Vec<(String, u8)>> {
    let object = first_json_object(text)?;
    let reply: SummaryReply = serde_json::from_str(object).ok()?;
    Some(
        reply
            .memories
            .into_iter()
            .filter(|entry| !entry.content.trim().is_empty())
            .map(|entry| (entry.content, clamp_importance(entry.importance.unwrap_or(3))))
            .collect(),
    )
}

fn build_summary_prompt(conversation_text: &str, existing: &[MemoryRecord]) -> String {
    let mut existing_text = String::new();
    if !existing.is_empty() {
        existing_text.push_str("Already stored memories:\n");
        for (idx, record) in existing.iter().enumerate() {
            existing_text.push_str(&format!(
                "{}. {} (importance: {})\n",
                idx + 1,
                record.content,
                record.importance
            ));
        }
    }

    format!(
        "Review the recent conversation below and extract new information worth \
         remembering about the user.\n\n\
         Conversation:\n{conversation_text}\n\
         {existing_text}\n\
         Extract only:\n\
         1. newly mentioned preferences and dislikes\n\
         2. newly mentioned personal facts\n\
         3. important dates and events\n\
         4. things the user explicitly asked to have remembered\n\
         5. topics the conversation kept returning to\n\n\
         Skip anything that repeats or closely resembles an already stored \
         memory. Describe each item in the third person.\n\n\
         Reply with exactly this JSON structure:\n\
         {{\"memories\": [{{\"content\": \"the fact\", \"importance\": 1-5}}]}}\n\n\
         Importance scale: 5 essential (birthdays, close relationships, explicit \
         requests), 4 strong preferences and major events, 3 clearly stated \
         likes, 2 mentioned interests, 1 possibly useful background.\n\
         If nothing new is worth remembering, return an empty list."
    )
}

/// Distill `history` into memory records via a non-streaming backend call.
///
/// Returns the number of records merged into the store. An unparsable
/// reply counts as zero, not an error; only IO and backend failures
/// propagate.
///
/// # Errors
///
/// Returns an error when the backend call or the store write fails.
pub async fn summarize_history(
    backend: &dyn ModelBackend,
    model: &str,
    store: &MemoryStore,
    user: UserId,
    history: &[HistoryEntry],
) -> Result<usize> {
    if history.is_empty() {
        return Ok(0);
    }

    let mut conversation_text = String::new();
    for entry in history {
        let label = match entry.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        conversation_text.push_str(&format!("{label}: {}\n\n", entry.content));
    }

    let existing = store
        .list(user, SUMMARY_EXISTING_MAX, 1)
        .context("listing existing memories for summarization")?;
    let prompt = build_summary_prompt(&conversation_text, &existing);
    let request = ChatPrompt::new(prompt, model);
    let reply = backend
        .send(&request)
        .await
        .context("memory summarization request failed")?;

    let Some(entries) = parse_memory_reply(&reply.content) else {
        warn!(user = %user, "summarizer reply had no parsable memories object");
        return Ok(0);
    };

    let mut merged = 0;
    for (content, importance) in entries {
        store
            .remember(user, &content, importance, MemorySource::ConversationSummary)
            .context("storing summarized memory")?;
        merged += 1;
    }
    if merged > 0 {
        info!(user = %user, merged, "summarization added memories");
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &tempfile::TempDir) -> MemoryStore {
        MemoryStore::open(dir.path(), 0.8).unwrap()
    }

    #[test]
    fn test_similarity_extremes() {
        assert!((similarity("a b c", "a b c") - 1.0).abs() < 1e-9);
        assert!((similarity("a b", "c d") - 0.0).abs() < 1e-9);
        assert!((similarity("", "anything") - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_similarity_case_insensitive() {
        assert!((similarity("Likes Coffee", "likes coffee") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_remember_and_list() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let user = UserId(1);

        let outcome = store
            .remember(user, "prefers dark roast coffee", 3, MemorySource::Conversation)
            .unwrap();
        assert_eq!(outcome, RememberOutcome::Added(1));

        let records = store.list(user, 10, 1).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "prefers dark roast coffee");
        assert_eq!(records[0].importance, 3);
        assert_eq!(records[0].access_count, 1);
    }

    #[test]
    fn test_duplicate_merges_and_bumps() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let user = UserId(1);

        store
            .remember(user, "enjoys hiking in the mountains", 2, MemorySource::Conversation)
            .unwrap();
        let outcome = store
            .remember(
                user,
                "enjoys hiking in the mountains",
                4,
                MemorySource::ConversationSummary,
            )
            .unwrap();
        assert_eq!(outcome, RememberOutcome::Merged(1));

        let records = store.list(user, 10, 1).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].importance, 4);
        assert_eq!(records[0].access_count, 2);
        // The original record's source and text are kept
        assert_eq!(records[0].source, MemorySource::Conversation);
    }

    #[test]
    fn test_dissimilar_content_adds_new_record() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let user = UserId(1);

        store
            .remember(user, "works as an electrician", 2, MemorySource::Conversation)
            .unwrap();
        let outcome = store
            .remember(user, "allergic to peanuts", 5, MemorySource::UserExplicit)
            .unwrap();
        assert_eq!(outcome, RememberOutcome::Added(2));
        assert_eq!(store.list(user, 10, 1).unwrap().len(), 2);
    }

    #[test]
    fn test_list_orders_by_importance_then_recency() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let user = UserId(1);

        store
            .remember(user, "background detail one", 1, MemorySource::Conversation)
            .unwrap();
        store
            .remember(user, "crucial fact here", 5, MemorySource::UserExplicit)
            .unwrap();
        store
            .remember(user, "moderately interesting thing", 3, MemorySource::Conversation)
            .unwrap();

        let records = store.list(user, 10, 1).unwrap();
        let importances: Vec<u8> = records.iter().map(|r| r.importance).collect();
        assert_eq!(importances, vec![5, 3, 1]);
    }

    #[test]
    fn test_list_min_importance_filter() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let user = UserId(1);

        store
            .remember(user, "minor background detail", 1, MemorySource::Conversation)
            .unwrap();
        store
            .remember(user, "major life event noted", 4, MemorySource::Conversation)
            .unwrap();

        let records = store.list(user, 10, 2).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].importance, 4);
    }

    #[test]
    fn test_digest_numbered_and_bounded() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let user = UserId(1);

        for i in 0..7 {
            store
                .remember(
                    user,
                    &format!("distinct remembered item number {i}"),
                    3,
                    MemorySource::Conversation,
                )
                .unwrap();
        }

        let digest = store.digest(user).unwrap().unwrap();
        assert!(digest.contains("1. "));
        assert!(digest.contains("5. "));
        assert!(!digest.contains("6. "));
    }

    #[test]
    fn test_digest_none_when_unimportant() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let user = UserId(1);

        store
            .remember(user, "background only thing", 1, MemorySource::Conversation)
            .unwrap();
        assert_eq!(store.digest(user).unwrap(), None);
        assert_eq!(store.digest(UserId(99)).unwrap(), None);
    }

    #[test]
    fn test_forget_and_not_found() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let user = UserId(1);

        store
            .remember(user, "temporary note to drop", 2, MemorySource::Conversation)
            .unwrap();
        store.forget(user, 1).unwrap();
        assert!(store.list(user, 10, 1).unwrap().is_empty());

        let err = store.forget(user, 1).unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(1)));
    }

    #[test]
    fn test_ids_not_reused_after_forget() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let user = UserId(1);

        store
            .remember(user, "first distinct entry", 2, MemorySource::Conversation)
            .unwrap();
        store
            .remember(user, "second unrelated thing", 2, MemorySource::Conversation)
            .unwrap();
        store.forget(user, 1).unwrap();

        let outcome = store
            .remember(user, "third completely different", 2, MemorySource::Conversation)
            .unwrap();
        assert_eq!(outcome, RememberOutcome::Added(3));
    }

    #[test]
    fn test_forget_many_reports_per_id() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let user = UserId(1);

        store
            .remember(user, "first distinct entry", 2, MemorySource::Conversation)
            .unwrap();
        store
            .remember(user, "second unrelated thing", 2, MemorySource::Conversation)
            .unwrap();

        let report = store.forget_many(user, &[1, 7, 2]).unwrap();
        assert_eq!(report.removed, vec![1, 2]);
        assert_eq!(report.missing, vec![7]);
        assert!(store.list(user, 10, 1).unwrap().is_empty());
    }

    #[test]
    fn test_users_are_isolated() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store
            .remember(UserId(1), "fact for the first user", 3, MemorySource::Conversation)
            .unwrap();
        assert!(store.list(UserId(2), 10, 1).unwrap().is_empty());
    }

    #[test]
    fn test_importance_clamped() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let user = UserId(1);

        store
            .remember(user, "over-eager importance", 200, MemorySource::Conversation)
            .unwrap();
        store
            .remember(user, "under-eager importance", 0, MemorySource::Conversation)
            .unwrap();

        let records = store.list(user, 10, 1).unwrap();
        assert_eq!(records[0].importance, 5);
        assert_eq!(records[1].importance, 1);
    }

    #[test]
    fn test_tracker_due_every_interval() {
        let tracker = ConversationTracker::new(3);
        let conversation = ConversationId::new("c");

        assert!(!tracker.record_user(&conversation, "one"));
        assert!(!tracker.record_user(&conversation, "two"));
        assert!(tracker.record_user(&conversation, "three"));
        assert!(!tracker.record_user(&conversation, "four"));
    }

    #[test]
    fn test_tracker_assistant_does_not_count() {
        let tracker = ConversationTracker::new(2);
        let conversation = ConversationId::new("c");

        assert!(!tracker.record_user(&conversation, "one"));
        tracker.record_assistant(&conversation, "reply");
        tracker.record_assistant(&conversation, "reply");
        assert!(tracker.record_user(&conversation, "two"));
    }

    #[test]
    fn test_tracker_history_capped() {
        let tracker = ConversationTracker::new(100);
        let conversation = ConversationId::new("c");

        for i in 0..15 {
            tracker.record_user(&conversation, &format!("u{i}"));
            tracker.record_assistant(&conversation, &format!("a{i}"));
        }

        let history = tracker.history(&conversation);
        assert_eq!(history.len(), HISTORY_CAP);
        // Oldest entries were dropped
        assert_eq!(history[0].content, "u5");
        assert_eq!(history.last().unwrap().content, "a14");
    }

    #[test]
    fn test_tracker_clear() {
        let tracker = ConversationTracker::new(2);
        let conversation = ConversationId::new("c");

        tracker.record_user(&conversation, "one");
        tracker.clear(&conversation);
        assert!(tracker.history(&conversation).is_empty());
        // Counter restarts too
        assert!(!tracker.record_user(&conversation, "again"));
    }

    #[test]
    fn test_parse_memory_reply_fenced() {
        let reply = "```json\n{\"memories\": [{\"content\": \"likes jazz\", \"importance\": 4}]}\n```";
        let entries = parse_memory_reply(reply).unwrap();
        assert_eq!(entries, vec![("likes jazz".to_string(), 4)]);
    }

    #[test]
    fn test_parse_memory_reply_defaults_and_filters() {
        let reply = r#"{"memories": [{"content": "plays chess"}, {"content": "   "}]}"#;
        let entries = parse_memory_reply(reply).unwrap();
        assert_eq!(entries, vec![("plays chess".to_string(), 3)]);
    }

    #[test]
    fn test_parse_memory_reply_clamps_importance() {
        let reply = r#"{"memories": [{"content": "a fact", "importance": 99}]}"#;
        let entries = parse_memory_reply(reply).unwrap();
        assert_eq!(entries[0].1, 5);
    }

    #[test]
    fn test_parse_memory_reply_garbage() {
        assert_eq!(parse_memory_reply("no json here"), None);
        assert_eq!(parse_memory_reply(r#"{"other": true}"#), None);
    }

    #[test]
    fn test_summary_prompt_includes_history_and_existing() {
        let existing = vec![MemoryRecord {
            id: 1,
            content: "already known fact".to_string(),
            importance: 3,
            created_at: "2025-01-01 00:00:00".to_string(),
            updated_at: "2025-01-01 00:00:00".to_string(),
            access_count: 1,
            source: MemorySource::Conversation,
        }];
        let prompt = build_summary_prompt("User: hello\n\n", &existing);
        assert!(prompt.contains("User: hello"));
        assert!(prompt.contains("already known fact"));
        assert!(prompt.contains("\"memories\""));
    }
}
