//! Chat Transport Layer
//!
//! Abstraction over the chat service the relay delivers into. The renderer
//! talks to a [`ChatTransport`] and never to a concrete service, so turns
//! can be rendered into tests, a console, or a real chat backend unchanged.

pub mod in_process;
pub mod traits;

pub use in_process::{ChatEvent, InProcessTransport};
pub use traits::{ChatTransport, SendOptions, TextMode, TransportError};
