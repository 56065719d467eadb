//! Confab Core - Streaming Chat Relay
//!
//! This crate relays conversational turns between a chat surface and a
//! language-model backend, independent of any concrete chat service. It
//! can drive a console, a bot-API adapter, or run headless for testing.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Chat Surfaces                           │
//! │  ┌───────────┐   ┌───────────────┐   ┌─────────────────────────┐ │
//! │  │  Console  │   │  Bot Adapter  │   │   In-Process (tests)    │ │
//! │  └─────┬─────┘   └───────┬───────┘   └────────────┬────────────┘ │
//! │        │                 │                        │              │
//! │        └─────────────────┴────────────────────────┘              │
//! │                          │                                       │
//! │                 ChatTransport (send / edit)                      │
//! └──────────────────────────┼───────────────────────────────────────┘
//!                            │
//! ┌──────────────────────────┼───────────────────────────────────────┐
//! │                      RELAY CORE                                  │
//! │  ┌───────────────────────┴─────────────────────────────────────┐ │
//! │  │                         Relay                               │ │
//! │  │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌─────────────┐  │ │
//! │  │  │ Renderer │  │  Authz   │  │  Memory  │  │   Backend   │  │ │
//! │  │  │ + Split  │  │  Policy  │  │ + Prefs  │  │   (model)   │  │ │
//! │  │  └──────────┘  └──────────┘  └──────────┘  └─────────────┘  │ │
//! │  └─────────────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The renderer is the heart of the crate: it consumes an incremental
//! token stream, keeps one live chat message visually in sync under
//! Markdown fence constraints, splits over-budget replies at fence-safe
//! boundaries, and dispatches structured multi-message envelopes with
//! human-like pacing once a stream completes.
//!
//! # Key Types
//!
//! - [`Relay`]: drives complete turns from inbound message to rendered reply
//! - [`StreamRenderer`]: keeps the transport in sync with a token stream
//! - [`ChatTransport`]: the chat-service seam; [`InProcessTransport`] for tests
//! - [`ModelBackend`]: the model seam; [`OpenAiBackend`] for OpenAI-compatible APIs
//! - [`RelayConfig`]: TOML + environment + CLI configuration
//! - [`MemoryStore`]: long-term per-user memory with summarization
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use confab_core::{
//!     backend::OpenAiBackend,
//!     chat::{ChatContext, UserId},
//!     load_config,
//!     transport::InProcessTransport,
//!     Relay, TurnRequest,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let backend = Arc::new(OpenAiBackend::new(&config.api_url, &config.api_key));
//!     let (transport, mut events) = InProcessTransport::new_pair();
//!     let relay = Relay::new(backend, Arc::new(transport), config)?;
//!
//!     // Render transport traffic as it happens
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{event:?}");
//!         }
//!     });
//!
//!     let user = UserId(1);
//!     let request = TurnRequest::new(user, ChatContext::direct(user), "hello");
//!     let outcome = relay.handle_turn(request).await?;
//!     println!("{}", outcome.final_text);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`authz`]: allowlist access policy (users, groups, admins)
//! - [`backend`]: model backend abstraction and the OpenAI-compatible client
//! - [`chat`]: conversation, user, and message identifiers
//! - [`config`]: layered configuration with provenance tracking
//! - [`memory`]: per-user long-term memory store and conversation summarization
//! - [`outreach`]: proactive daily outreach planning and delivery
//! - [`prefs`]: per-conversation preference store
//! - [`relay`]: turn orchestration tying the pieces together
//! - [`render`]: fence balancing, payload detection, segmentation, splitting
//! - [`transport`]: chat transport abstraction and the in-process implementation
//!
//! # No Service Bindings
//!
//! This crate has **zero** dependencies on any concrete chat-service SDK.
//! The transport is a trait; everything above it is pure relay logic.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod authz;
pub mod backend;
pub mod chat;
pub mod config;
pub mod memory;
pub mod outreach;
pub mod prefs;
pub mod relay;
pub mod render;
pub mod transport;

// Re-exports for convenience
pub use chat::{ChatContext, ChatKind, ConversationId, MessageHandle, TurnId, UserId};
pub use relay::{Relay, RelayError, TurnRequest};
pub use render::{
    dispatch_messages, extract_envelope, plan_split, reply_probability, safe_render,
    CadencePolicy, DispatchPacing, PayloadKind, RenderSettings, Segment, SplitPlan,
    StreamRenderer, StreamSession, TurnOutcome, TurnToken, ENVELOPE_SYSTEM_INSTRUCTION,
};

// Backend exports
pub use backend::{
    ChatPrompt, ChatReply, HistoryEntry, ModelBackend, OpenAiBackend, Role, StreamingChunk,
};

// Transport exports
pub use transport::{
    ChatEvent, ChatTransport, InProcessTransport, SendOptions, TextMode, TransportError,
};

// Authorization exports
pub use authz::{AccessPolicy, AuthzError};

// Memory exports
pub use memory::{
    similarity, summarize_history, ConversationTracker, ForgetReport, MemoryError, MemoryRecord,
    MemorySource, MemoryStore, RememberOutcome,
};

// Preference exports
pub use prefs::{ChatPrefs, PrefsError, PrefsStore};

// Outreach exports
pub use outreach::{OutreachError, OutreachPlanner, PlannedSlot, OUTREACH_SYSTEM_INSTRUCTION};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfabToml, ConfigError,
    ConfigOverrides, ConfigSource, RelayConfig,
};
