//! Model Backend Layer
//!
//! Connects the relay to conversational model providers. All backends
//! expose the same [`ModelBackend`] trait, so the rendering pipeline never
//! cares which provider produced the token stream.

pub mod openai;
pub mod traits;

pub use openai::OpenAiBackend;
pub use traits::{ChatPrompt, ChatReply, HistoryEntry, ModelBackend, Role, StreamingChunk};
