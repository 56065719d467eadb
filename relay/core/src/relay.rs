//! Turn Orchestration
//!
//! [`Relay`] ties the subsystems together for one conversational turn:
//! authorization, per-conversation preferences, the memory digest, the
//! model stream, and the renderer that keeps the transport in sync.
//!
//! Each turn claims a fresh serial on the conversation's watch channel.
//! A later turn (or an explicit [`Relay::reset`]) bumps the serial, and
//! the in-flight renderer observes the staleness between chunks and
//! abandons its output instead of racing the newer turn.

use std::sync::Arc;

use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::authz::{AccessPolicy, AuthzError};
use crate::backend::traits::{ChatPrompt, ModelBackend};
use crate::chat::{ChatContext, ConversationId, MessageHandle, UserId};
use crate::config::RelayConfig;
use crate::memory::{summarize_history, ConversationTracker, MemoryError, MemoryStore};
use crate::prefs::{PrefsError, PrefsStore};
use crate::render::renderer::{StreamRenderer, TurnOutcome};
use crate::render::session::{StreamSession, TurnToken};
use crate::render::ENVELOPE_SYSTEM_INSTRUCTION;
use crate::transport::traits::{ChatTransport, TransportError};

/// Errors surfaced by the relay for one turn
#[derive(Debug, Error)]
pub enum RelayError {
    /// The user or conversation failed the allowlist check
    #[error("turn refused: {0}")]
    NotAuthorized(#[from] AuthzError),

    /// Preference store failure
    #[error(transparent)]
    Prefs(#[from] PrefsError),

    /// Memory store failure
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Transport failure while rendering
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Backend failure starting the model stream
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// One inbound user message for the relay to answer
#[derive(Clone, Debug)]
pub struct TurnRequest {
    /// Author of the message
    pub user: UserId,
    /// Conversation the message arrived in
    pub chat: ChatContext,
    /// Message text
    pub text: String,
    /// Transport handle of the triggering message, for reply threading
    pub trigger: Option<MessageHandle>,
}

impl TurnRequest {
    /// Request for a turn with no trigger handle
    pub fn new(user: UserId, chat: ChatContext, text: impl Into<String>) -> Self {
        Self {
            user,
            chat,
            text: text.into(),
            trigger: None,
        }
    }

    /// Attach the handle of the message that triggered this turn
    #[must_use]
    pub fn with_trigger(mut self, handle: MessageHandle) -> Self {
        self.trigger = Some(handle);
        self
    }
}

/// Drives complete turns from inbound message to rendered reply
///
/// Shared across tasks behind an `Arc`; all interior state is
/// thread-safe. One relay serves every conversation.
pub struct Relay<B, T> {
    backend: Arc<B>,
    transport: Arc<T>,
    config: RelayConfig,
    policy: AccessPolicy,
    prefs: PrefsStore,
    memory: MemoryStore,
    tracker: ConversationTracker,
    turn_serials: DashMap<String, watch::Sender<u64>>,
}

impl<B, T> Relay<B, T>
where
    B: ModelBackend + 'static,
    T: ChatTransport + 'static,
{
    /// Build a relay, opening the preference and memory stores under the
    /// configured state directory.
    ///
    /// # Errors
    ///
    /// Returns an error when either store cannot be opened.
    pub fn new(backend: Arc<B>, transport: Arc<T>, config: RelayConfig) -> Result<Self, RelayError> {
        let policy = config.access_policy();
        let prefs = PrefsStore::open(config.state_dir.join("prefs.json"))?;
        let memory = MemoryStore::open(config.state_dir.join("memory"), config.dedup_threshold)?;
        let tracker = ConversationTracker::new(config.summarize_after_turns);
        Ok(Self {
            backend,
            transport,
            config,
            policy,
            prefs,
            memory,
            tracker,
            turn_serials: DashMap::new(),
        })
    }

    /// The active configuration
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// The per-conversation preference store
    #[must_use]
    pub fn prefs(&self) -> &PrefsStore {
        &self.prefs
    }

    /// The long-term memory store
    #[must_use]
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Run one full turn: check access, stream the model reply, and keep
    /// the conversation's live message in sync until the stream ends.
    ///
    /// The returned outcome reports the delivered handles and final text.
    /// A turn superseded by a newer one (or by [`Relay::reset`]) returns
    /// normally with `superseded` set and nothing further dispatched.
    ///
    /// # Errors
    ///
    /// Returns an error when the user is not authorized, the backend
    /// refuses to start a stream, or the transport fails terminally
    /// mid-render.
    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnOutcome, RelayError> {
        self.policy.check(request.user, &request.chat)?;

        let conversation = request.chat.conversation.clone();
        let prefs = self.prefs.get(&conversation);
        let model = prefs
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());

        // Snapshot history before recording, so the prompt does not carry
        // the current message twice.
        let history = self.tracker.history(&conversation);
        let summary_due = self.tracker.record_user(&conversation, &request.text);
        if summary_due && self.config.memory_enabled {
            self.spawn_summarization(request.user, &conversation, &model);
        }

        let mut system_parts: Vec<String> = Vec::new();
        if let Some(base) = &self.config.system_prompt {
            system_parts.push(base.clone());
        }
        if self.config.memory_enabled {
            match self.memory.digest(request.user) {
                Ok(Some(digest)) => system_parts.push(digest),
                Ok(None) => {}
                Err(e) => warn!(user = %request.user, error = %e, "memory digest unavailable"),
            }
        }
        system_parts.push(ENVELOPE_SYSTEM_INSTRUCTION.to_string());

        let token = self.claim_turn(&conversation);
        debug!(
            conversation = %conversation,
            user = %request.user,
            model = %model,
            "starting turn"
        );

        let prompt = ChatPrompt::new(&request.text, &model)
            .with_system(system_parts.join("\n\n"))
            .with_history(history)
            .with_temperature(self.config.temperature);
        let chunks = self.backend.send_streaming(&prompt).await?;

        let title_prefix = match prefs.show_title {
            Some(false) => None,
            Some(true) => Some(format!("`{model}`\n\n")),
            None => self.config.title_prefix_for(&model),
        };
        let reply_anchor = if prefs.reply_to_trigger.unwrap_or(request.chat.kind.is_shared()) {
            request.trigger
        } else {
            None
        };
        let mut settings = self.config.render_settings();
        if let Some(split) = prefs.split_enabled {
            settings.split_enabled = split;
        }

        let session = StreamSession::new(
            conversation.clone(),
            request.chat.kind,
            &model,
            &self.config.cadence,
            title_prefix,
            reply_anchor,
        );
        let renderer = StreamRenderer::new(self.transport.as_ref(), settings);
        let mut rng = StdRng::from_entropy();
        let outcome = renderer.drive(session, chunks, &token, &mut rng).await?;

        if outcome.superseded {
            debug!(conversation = %conversation, "turn superseded before completion");
        } else if !outcome.final_text.is_empty() {
            self.tracker.record_assistant(&conversation, &outcome.final_text);
        }
        if let Some(error) = &outcome.model_error {
            warn!(conversation = %conversation, error = %error, "model stream reported an error");
        }
        debug!(
            conversation = %conversation,
            segments = outcome.segments.len(),
            superseded = outcome.superseded,
            "turn finished"
        );
        Ok(outcome)
    }

    /// Abandon the in-flight turn for `conversation` and drop its rolling
    /// history. Already-dispatched messages stay where they are.
    pub fn reset(&self, conversation: &ConversationId) {
        if let Some(sender) = self.turn_serials.get(conversation.as_str()) {
            let next = sender.borrow().wrapping_add(1);
            sender.send_replace(next);
        }
        self.tracker.clear(conversation);
        info!(conversation = %conversation, "conversation reset");
    }

    /// Bump the conversation's turn serial and build a token carrying it
    fn claim_turn(&self, conversation: &ConversationId) -> TurnToken {
        let sender = self
            .turn_serials
            .entry(conversation.as_str().to_string())
            .or_insert_with(|| watch::channel(0).0);
        let serial = sender.borrow().wrapping_add(1);
        sender.send_replace(serial);
        TurnToken::new(serial, sender.subscribe())
    }

    fn spawn_summarization(&self, user: UserId, conversation: &ConversationId, model: &str) {
        let backend = Arc::clone(&self.backend);
        let store = self.memory.clone();
        let model = model.to_string();
        let history = self.tracker.history(conversation);
        tokio::spawn(async move {
            match summarize_history(backend.as_ref(), &model, &store, user, &history).await {
                Ok(count) if count > 0 => {
                    debug!(user = %user, count, "conversation summarized into memory");
                }
                Ok(_) => {}
                Err(e) => warn!(user = %user, error = %e, "conversation summarization failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::{mpsc, Notify};

    use crate::backend::traits::{ChatReply, Role, StreamingChunk};
    use crate::memory::MemorySource;
    use crate::transport::in_process::{ChatEvent, InProcessTransport};

    /// Streams a fixed script of tokens and records every prompt it sees
    struct ScriptedBackend {
        script: Vec<String>,
        reply: String,
        stream_prompts: Mutex<Vec<ChatPrompt>>,
        send_prompts: Mutex<Vec<ChatPrompt>>,
    }

    impl ScriptedBackend {
        fn new(pieces: &[&str]) -> Self {
            Self {
                script: pieces.iter().map(|s| (*s).to_string()).collect(),
                reply: r#"{"memories": []}"#.to_string(),
                stream_prompts: Mutex::new(Vec::new()),
                send_prompts: Mutex::new(Vec::new()),
            }
        }

        fn with_reply(mut self, reply: &str) -> Self {
            self.reply = reply.to_string();
            self
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn send_streaming(
            &self,
            prompt: &ChatPrompt,
        ) -> anyhow::Result<mpsc::Receiver<StreamingChunk>> {
            self.stream_prompts.lock().push(prompt.clone());
            let (tx, rx) = mpsc::channel(self.script.len() + 1);
            for piece in &self.script {
                tx.send(StreamingChunk::Token(piece.clone())).await?;
            }
            tx.send(StreamingChunk::Complete {
                message: self.script.concat(),
            })
            .await?;
            Ok(rx)
        }

        async fn send(&self, prompt: &ChatPrompt) -> anyhow::Result<ChatReply> {
            self.send_prompts.lock().push(prompt.clone());
            Ok(ChatReply {
                content: self.reply.clone(),
                model: prompt.model.clone(),
                tokens_used: None,
                duration_ms: None,
            })
        }

        async fn list_models(&self) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }
    }

    /// Hands out a stream the test feeds by hand, signalling when asked
    struct HeldBackend {
        stream: Mutex<Option<mpsc::Receiver<StreamingChunk>>>,
        started: Notify,
    }

    #[async_trait]
    impl ModelBackend for HeldBackend {
        fn name(&self) -> &str {
            "held"
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn send_streaming(
            &self,
            _prompt: &ChatPrompt,
        ) -> anyhow::Result<mpsc::Receiver<StreamingChunk>> {
            let stream = self.stream.lock().take();
            self.started.notify_one();
            stream.ok_or_else(|| anyhow::anyhow!("stream already taken"))
        }

        async fn send(&self, _prompt: &ChatPrompt) -> anyhow::Result<ChatReply> {
            anyhow::bail!("not used")
        }

        async fn list_models(&self) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }
    }

    fn test_config(dir: &TempDir) -> RelayConfig {
        RelayConfig {
            state_dir: dir.path().to_path_buf(),
            ..RelayConfig::default()
        }
    }

    fn build_relay(
        backend: ScriptedBackend,
        config: RelayConfig,
    ) -> (
        Relay<ScriptedBackend, InProcessTransport>,
        Arc<ScriptedBackend>,
        mpsc::Receiver<ChatEvent>,
    ) {
        let backend = Arc::new(backend);
        let (transport, events) = InProcessTransport::new_pair();
        let relay = Relay::new(Arc::clone(&backend), Arc::new(transport), config).unwrap();
        (relay, backend, events)
    }

    #[tokio::test]
    async fn test_turn_streams_and_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let (relay, _backend, mut events) =
            build_relay(ScriptedBackend::new(&["Hello ", "world"]), test_config(&dir));

        let request = TurnRequest::new(UserId(7), ChatContext::direct(UserId(7)), "hi");
        let outcome = relay.handle_turn(request).await.unwrap();

        assert_eq!(outcome.final_text, "Hello world");
        assert!(!outcome.superseded);
        assert_eq!(outcome.handles.len(), 1);

        match events.try_recv().unwrap() {
            ChatEvent::Sent { text, reply_to, .. } => {
                assert_eq!(text, "`gpt-4o`\n\nHello world");
                assert_eq!(reply_to, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_user_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.allowed_users = vec![7];
        let (relay, _backend, _events) = build_relay(ScriptedBackend::new(&["hi"]), config);

        let request = TurnRequest::new(UserId(9), ChatContext::direct(UserId(9)), "hello?");
        let err = relay.handle_turn(request).await.unwrap_err();
        assert!(matches!(err, RelayError::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn test_prefs_model_override_applies() {
        let dir = tempfile::tempdir().unwrap();
        let (relay, backend, _events) =
            build_relay(ScriptedBackend::new(&["ok"]), test_config(&dir));

        let chat = ChatContext::direct(UserId(7));
        relay
            .prefs()
            .update(&chat.conversation, |p| p.model = Some("llama3".to_string()))
            .unwrap();

        relay
            .handle_turn(TurnRequest::new(UserId(7), chat, "hi"))
            .await
            .unwrap();

        let prompts = backend.stream_prompts.lock();
        assert_eq!(prompts[0].model, "llama3");
    }

    #[tokio::test]
    async fn test_memory_digest_reaches_system_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let (relay, backend, _events) =
            build_relay(ScriptedBackend::new(&["ok"]), test_config(&dir));

        relay
            .memory()
            .remember(UserId(7), "Works night shifts", 4, MemorySource::UserExplicit)
            .unwrap();

        relay
            .handle_turn(TurnRequest::new(
                UserId(7),
                ChatContext::direct(UserId(7)),
                "hi",
            ))
            .await
            .unwrap();

        let prompts = backend.stream_prompts.lock();
        let system = prompts[0].system.as_deref().unwrap();
        assert!(system.contains("Works night shifts"));
        assert!(system.contains("\"messages\""));
    }

    #[tokio::test]
    async fn test_history_flows_into_next_turn() {
        let dir = tempfile::tempdir().unwrap();
        let (relay, backend, _events) =
            build_relay(ScriptedBackend::new(&["Hello ", "world"]), test_config(&dir));

        let chat = ChatContext::direct(UserId(7));
        relay
            .handle_turn(TurnRequest::new(UserId(7), chat.clone(), "one"))
            .await
            .unwrap();
        relay
            .handle_turn(TurnRequest::new(UserId(7), chat, "two"))
            .await
            .unwrap();

        let prompts = backend.stream_prompts.lock();
        assert!(prompts[0].history.is_empty());
        let second = &prompts[1].history;
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].role, Role::User);
        assert_eq!(second[0].content, "one");
        assert_eq!(second[1].role, Role::Assistant);
        assert_eq!(second[1].content, "Hello world");
    }

    #[tokio::test]
    async fn test_shared_chat_threads_to_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let (relay, _backend, mut events) =
            build_relay(ScriptedBackend::new(&["sure"]), test_config(&dir));

        let request = TurnRequest::new(UserId(7), ChatContext::group(-100), "bot, help")
            .with_trigger(MessageHandle(41));
        relay.handle_turn(request).await.unwrap();

        match events.try_recv().unwrap() {
            ChatEvent::Sent { reply_to, .. } => assert_eq!(reply_to, Some(MessageHandle(41))),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reset_supersedes_inflight_turn() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(4);
        let backend = Arc::new(HeldBackend {
            stream: Mutex::new(Some(rx)),
            started: Notify::new(),
        });
        let (transport, _events) = InProcessTransport::new_pair();
        let relay = Arc::new(
            Relay::new(Arc::clone(&backend), Arc::new(transport), test_config(&dir)).unwrap(),
        );

        let chat = ChatContext::direct(UserId(7));
        let conversation = chat.conversation.clone();
        let turn = tokio::spawn({
            let relay = Arc::clone(&relay);
            async move {
                relay
                    .handle_turn(TurnRequest::new(UserId(7), chat, "long question"))
                    .await
            }
        });

        backend.started.notified().await;
        relay.reset(&conversation);
        tx.send(StreamingChunk::Token("late".to_string()))
            .await
            .unwrap();
        drop(tx);

        let outcome = turn.await.unwrap().unwrap();
        assert!(outcome.superseded);
        assert!(outcome.handles.is_empty());
    }

    #[tokio::test]
    async fn test_summarization_runs_when_due() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.summarize_after_turns = 1;
        let backend = ScriptedBackend::new(&["noted"])
            .with_reply(r#"{"memories": [{"content": "Enjoys hiking", "importance": 2}]}"#);
        let (relay, backend, _events) = build_relay(backend, config);

        relay
            .handle_turn(TurnRequest::new(
                UserId(7),
                ChatContext::direct(UserId(7)),
                "I went hiking again",
            ))
            .await
            .unwrap();

        // The summarization task runs in the background
        let mut stored = Vec::new();
        for _ in 0..50 {
            stored = relay.memory().list(UserId(7), 10, 1).unwrap();
            if !stored.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "Enjoys hiking");

        let sends = backend.send_prompts.lock();
        assert!(sends[0].prompt.contains("User: I went hiking again"));
    }
}
