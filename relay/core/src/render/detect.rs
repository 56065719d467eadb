//! Payload Kind Detection
//!
//! A response stream is rendered live only when it is prose. When the model
//! answers with a structured envelope (see [`crate::render::envelope`]), the
//! raw JSON must never flash on screen, so the decision has to be made from
//! the earliest bytes of the stream, long before the payload can be parsed.
//!
//! Envelopes are a model-side convention that always starts the response in
//! one of three shapes: a bare `{`, a fenced block, or the literal token
//! `json`. A prefix check is therefore enough. The check deliberately waits
//! while the accumulated text is still an ambiguous fragment of one of those
//! markers, so the outcome never depends on where the producer happened to
//! cut its chunks.

/// How the eventual payload of a stream will be handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PayloadKind {
    /// Not enough input yet to decide
    #[default]
    Unknown,
    /// Ordinary text, rendered incrementally
    Prose,
    /// Looks like a structured envelope; rendering is deferred to stream end
    PossiblyStructured,
}

impl PayloadKind {
    /// Whether the classification has been made
    #[must_use]
    pub fn is_decided(self) -> bool {
        self != Self::Unknown
    }
}

/// True when `text` begins with `marker`, ignoring ASCII case.
pub(crate) fn starts_with_ignore_case(text: &str, marker: &str) -> bool {
    let mut chars = text.chars();
    marker
        .chars()
        .all(|m| matches!(chars.next(), Some(t) if m.eq_ignore_ascii_case(&t)))
}

/// True when `text` is a strict, still-growable prefix of `marker`.
fn is_marker_fragment(text: &str, marker: &str) -> bool {
    text.chars().count() < marker.chars().count() && starts_with_ignore_case(marker, text)
}

/// Classify the accumulated stream prefix.
///
/// Returns [`PayloadKind::Unknown`] while the trimmed prefix could still
/// grow into one of the structured markers; callers keep feeding chunks
/// until the result is decided or the stream ends.
#[must_use]
pub fn classify_prefix(text: &str) -> PayloadKind {
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return PayloadKind::Unknown;
    }
    if trimmed.starts_with('{')
        || trimmed.starts_with("```")
        || starts_with_ignore_case(trimmed, "json")
    {
        return PayloadKind::PossiblyStructured;
    }
    if is_marker_fragment(trimmed, "```") || is_marker_fragment(trimmed, "json") {
        return PayloadKind::Unknown;
    }
    PayloadKind::Prose
}

/// Final classification once the stream has ended.
///
/// A stream that ended while still undecided (empty, whitespace only, or a
/// bare marker fragment) is prose; there is nothing structured to defer for.
#[must_use]
pub fn classify_at_end(text: &str) -> PayloadKind {
    match classify_prefix(text) {
        PayloadKind::Unknown => PayloadKind::Prose,
        decided => decided,
    }
}
