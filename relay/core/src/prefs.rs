//! Per-Conversation Preferences
//!
//! Small per-chat switches that survive restarts: a model override, the
//! title header, reply-to-trigger threading, and long-message splitting.
//! Anything unset falls through to the global [`crate::config::RelayConfig`]
//! value, so a fresh conversation carries no entry at all.
//!
//! The whole store is one JSON file, loaded eagerly at startup and written
//! back on every change. `Arc<RwLock<>>` keeps lookups cheap on the turn
//! path while updates stay rare.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::chat::ConversationId;

/// Errors from loading or persisting the preferences file
#[derive(Debug, Error)]
pub enum PrefsError {
    /// Failed to read the preferences file
    #[error("Failed to read preferences at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to write the preferences file
    #[error("Failed to write preferences at {path}: {source}")]
    WriteError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse the preferences file
    #[error("Failed to parse preferences: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Per-conversation switches; `None` defers to the global config
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatPrefs {
    /// Model override for this conversation
    pub model: Option<String>,

    /// Show the model-name title on the first message of a turn
    pub show_title: Option<bool>,

    /// Thread the first reply of a turn to the triggering message
    pub reply_to_trigger: Option<bool>,

    /// Split over-budget replies into multiple messages
    pub split_enabled: Option<bool>,
}

impl ChatPrefs {
    /// True when every field defers to the global config
    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// JSON-file-backed store of [`ChatPrefs`] keyed by conversation id
#[derive(Clone, Debug)]
pub struct PrefsStore {
    path: PathBuf,
    entries: Arc<RwLock<HashMap<String, ChatPrefs>>>,
}

impl PrefsStore {
    /// Open the store at `path`, loading any existing file.
    ///
    /// A missing file is an empty store, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PrefsError> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| PrefsError::ReadError {
                path: path.clone(),
                source: e,
            })?;
            serde_json::from_str(&raw)?
        } else {
            HashMap::new()
        };
        debug!(path = %path.display(), "Loaded chat preferences");
        Ok(Self {
            path,
            entries: Arc::new(RwLock::new(entries)),
        })
    }

    /// Preferences for `conversation`, defaults when none are stored
    #[must_use]
    pub fn get(&self, conversation: &ConversationId) -> ChatPrefs {
        self.entries
            .read()
            .get(conversation.as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// Mutate the preferences for `conversation` and persist the store.
    ///
    /// An entry that ends up fully default is dropped from the file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written; the in-memory
    /// state keeps the change regardless.
    pub fn update(
        &self,
        conversation: &ConversationId,
        mutate: impl FnOnce(&mut ChatPrefs),
    ) -> Result<(), PrefsError> {
        {
            let mut entries = self.entries.write();
            let prefs = entries.entry(conversation.to_string()).or_default();
            mutate(prefs);
            if prefs.is_default() {
                entries.remove(conversation.as_str());
            }
        }
        self.persist()
    }

    /// Drop any stored preferences for `conversation`
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn clear(&self, conversation: &ConversationId) -> Result<(), PrefsError> {
        let removed = self.entries.write().remove(conversation.as_str()).is_some();
        if removed {
            self.persist()?;
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), PrefsError> {
        let serialized = {
            let entries = self.entries.read();
            serde_json::to_string_pretty(&*entries)?
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| PrefsError::WriteError {
                    path: self.path.clone(),
                    source: e,
                })?;
            }
        }
        std::fs::write(&self.path, serialized).map_err(|e| PrefsError::WriteError {
            path: self.path.clone(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &tempfile::TempDir) -> PrefsStore {
        PrefsStore::open(dir.path().join("prefs.json")).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let conversation = ConversationId::new("42");
        assert_eq!(store.get(&conversation), ChatPrefs::default());
    }

    #[test]
    fn test_update_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let conversation = ConversationId::new("42");

        let store = PrefsStore::open(&path).unwrap();
        store
            .update(&conversation, |p| {
                p.model = Some("local-model".to_string());
                p.show_title = Some(false);
            })
            .unwrap();

        let reloaded = PrefsStore::open(&path).unwrap();
        let prefs = reloaded.get(&conversation);
        assert_eq!(prefs.model.as_deref(), Some("local-model"));
        assert_eq!(prefs.show_title, Some(false));
        assert_eq!(prefs.reply_to_trigger, None);
    }

    #[test]
    fn test_default_entry_dropped_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let conversation = ConversationId::new("7");

        let store = PrefsStore::open(&path).unwrap();
        store
            .update(&conversation, |p| p.split_enabled = Some(false))
            .unwrap();
        store
            .update(&conversation, |p| p.split_enabled = None)
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: HashMap<String, ChatPrefs> = serde_json::from_str(&raw).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_clear_removes_entry() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let conversation = ConversationId::new("9");

        store
            .update(&conversation, |p| p.model = Some("m".to_string()))
            .unwrap();
        store.clear(&conversation).unwrap();
        assert_eq!(store.get(&conversation), ChatPrefs::default());
    }

    #[test]
    fn test_conversations_are_independent() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let a = ConversationId::new("a");
        let b = ConversationId::new("b");

        store
            .update(&a, |p| p.reply_to_trigger = Some(true))
            .unwrap();
        assert_eq!(store.get(&a).reply_to_trigger, Some(true));
        assert_eq!(store.get(&b).reply_to_trigger, None);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{not json").unwrap();

        let result = PrefsStore::open(&path);
        assert!(matches!(result, Err(PrefsError::ParseError(_))));
    }

    #[test]
    fn test_unknown_fields_tolerated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(
            &path,
            r#"{"5": {"model": "m", "legacy_flag": true}}"#,
        )
        .unwrap();

        let store = PrefsStore::open(&path).unwrap();
        let prefs = store.get(&ConversationId::new("5"));
        assert_eq!(prefs.model.as_deref(), Some("m"));
    }
}
