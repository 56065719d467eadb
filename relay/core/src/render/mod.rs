//! Streaming Render Pipeline
//!
//! Everything between a raw model token stream and the messages a chat
//! user actually sees:
//!
//! - [`fence`]: balance markdown code fences in partial text
//! - [`detect`]: classify a reply as prose or a structured candidate
//! - [`segment`]: split over-budget replies at natural boundaries
//! - [`envelope`]: extract multi-message JSON envelopes
//! - [`splitter`]: dispatch envelope messages with human-like pacing
//! - [`session`]: per-turn state and edit cadence
//! - [`renderer`]: the drive loop tying it all together

pub mod detect;
pub mod envelope;
pub mod fence;
pub mod renderer;
pub mod segment;
pub mod session;
pub mod splitter;

pub use detect::PayloadKind;
pub use envelope::{extract_envelope, first_json_object, ENVELOPE_SYSTEM_INSTRUCTION};
pub use fence::safe_render;
pub use renderer::{RenderSettings, StreamRenderer, TurnOutcome};
pub use segment::{plan_split, Segment, SplitPlan};
pub use session::{CadencePolicy, StreamSession, TurnToken};
pub use splitter::{dispatch_messages, reply_probability, DispatchPacing};
