//! Structured Envelope Extraction
//!
//! The model can ask for multi-message dispatch by answering with a JSON
//! envelope, `{"messages": [{"content": "..."}, ...]}`, instead of prose.
//! Models wrap that envelope inconsistently: inside a ```json fence, bare,
//! inside an untagged fence, or prefixed with a stray `json` token. The
//! extractor tries those shapes from most to least specific and accepts a
//! result only when nothing but whitespace remains outside the matched
//! region; a payload that mixes an envelope with other text is ambiguous
//! and is rendered as prose instead.
//!
//! Extraction failure is never an error. The caller falls back to the
//! ordinary prose path with the complete buffer.

use serde::Deserialize;
use tracing::debug;

use crate::render::detect::starts_with_ignore_case;

/// System instruction that teaches the model the envelope convention.
///
/// Callers that want multi-message dispatch append this to their system
/// prompt; the splitter understands the reply format it describes.
pub const ENVELOPE_SYSTEM_INSTRUCTION: &str = "\
When a reply would feel more natural as several separate chat messages, \
respond with exactly this JSON structure instead of prose:\n\
{\"messages\": [{\"content\": \"first message\"}, {\"content\": \"second message\"}]}\n\
Rules: use 1 to 5 messages; keep each message short and conversational, \
the way a person types; the messages are delivered in order with natural \
pauses between them. For a single ordinary reply, answer in plain text \
and do not use this structure.";

#[derive(Debug, Deserialize)]
struct Envelope {
    messages: Vec<EnvelopeMessage>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeMessage {
    content: String,
}

/// A successfully parsed envelope and the byte span it occupied.
struct ParsedSpan {
    messages: Vec<String>,
    start: usize,
    end: usize,
}

/// Find the end (exclusive) of the brace-balanced object starting at
/// `start`, tracking JSON string state so braces inside values don't count.
fn balanced_object_end(text: &str, start: usize) -> Option<usize> {
    if !text[start..].starts_with('{') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_messages(json: &str) -> Option<Vec<String>> {
    let envelope: Envelope = serde_json::from_str(json).ok()?;
    Some(envelope.messages.into_iter().map(|m| m.content).collect())
}

/// Position of the first non-whitespace character at or after `from`.
fn next_non_ws(text: &str, from: usize) -> Option<usize> {
    text[from..]
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map(|(i, _)| from + i)
}

/// Form (a): envelope fenced as ```json ... ```.
fn fenced_json(text: &str) -> Option<ParsedSpan> {
    for (pos, _) in text.match_indices("```json") {
        let after = pos + "```json".len();
        let Some(obj_start) = next_non_ws(text, after) else {
            continue;
        };
        if !text[obj_start..].starts_with('{') {
            continue;
        }
        let Some(obj_end) = balanced_object_end(text, obj_start) else {
            continue;
        };
        let Some(close) = next_non_ws(text, obj_end) else {
            continue;
        };
        if !text[close..].starts_with("```") {
            continue;
        }
        if let Some(messages) = parse_messages(&text[obj_start..obj_end]) {
            return Some(ParsedSpan {
                messages,
                start: pos,
                end: close + 3,
            });
        }
    }
    None
}

/// Form (b): the entire trimmed buffer is one JSON object.
fn whole_object(text: &str) -> Option<ParsedSpan> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return None;
    }
    let messages = parse_messages(trimmed)?;
    Some(ParsedSpan {
        messages,
        start: 0,
        end: text.len(),
    })
}

/// Form (c): envelope inside an arbitrary fenced block. The object must
/// follow the opener's same-line info string, separated by whitespace only.
fn any_fenced(text: &str) -> Option<ParsedSpan> {
    for (pos, _) in text.match_indices("```") {
        let after = pos + 3;
        let Some(obj_rel) = text[after..].find('{') else {
            continue;
        };
        let obj_start = after + obj_rel;
        let between = &text[after..obj_start];
        if let Some(nl) = between.find('\n') {
            if !between[nl..].chars().all(char::is_whitespace) {
                continue;
            }
        }
        let Some(obj_end) = balanced_object_end(text, obj_start) else {
            continue;
        };
        let Some(close) = next_non_ws(text, obj_end) else {
            continue;
        };
        if !text[close..].starts_with("```") {
            continue;
        }
        if let Some(messages) = parse_messages(&text[obj_start..obj_end]) {
            return Some(ParsedSpan {
                messages,
                start: pos,
                end: close + 3,
            });
        }
    }
    None
}

/// Form (d): bare `json` token, then whitespace, then the object.
fn json_prefixed(text: &str) -> Option<ParsedSpan> {
    let token_start = next_non_ws(text, 0)?;
    if !starts_with_ignore_case(&text[token_start..], "json") {
        return None;
    }
    let obj_start = next_non_ws(text, token_start + 4)?;
    if !text[obj_start..].starts_with('{') {
        return None;
    }
    let obj_end = balanced_object_end(text, obj_start)?;
    let messages = parse_messages(&text[obj_start..obj_end])?;
    Some(ParsedSpan {
        messages,
        start: token_start,
        end: obj_end,
    })
}

/// Form (e): last resort, any brace-balanced substring that carries the
/// `"messages"` key.
fn balanced_substring(text: &str) -> Option<ParsedSpan> {
    for (pos, _) in text.match_indices('{') {
        let Some(end) = balanced_object_end(text, pos) else {
            continue;
        };
        let candidate = &text[pos..end];
        if !candidate.contains("\"messages\"") {
            continue;
        }
        if let Some(messages) = parse_messages(candidate) {
            return Some(ParsedSpan {
                messages,
                start: pos,
                end,
            });
        }
    }
    None
}

fn outside_is_whitespace(text: &str, start: usize, end: usize) -> bool {
    text[..start].chars().all(char::is_whitespace)
        && text[end..].chars().all(char::is_whitespace)
}

/// Find the first brace-balanced JSON object anywhere in `text`.
///
/// Collaborators that ask the model for small JSON replies (memory
/// summaries, outreach plans) use this to tolerate fences and chatter
/// around the object. The slice is not validated as JSON; callers parse
/// it and fall back on failure.
#[must_use]
pub fn first_json_object(text: &str) -> Option<&str> {
    for (pos, _) in text.match_indices('{') {
        if let Some(end) = balanced_object_end(text, pos) {
            return Some(&text[pos..end]);
        }
    }
    None
}

/// Extract the ordered message bodies of a structured envelope.
///
/// Returns `None` whenever the buffer should be treated as prose: no
/// envelope found, an empty `messages` list, or non-whitespace text left
/// outside the matched envelope.
#[must_use]
pub fn extract_envelope(text: &str) -> Option<Vec<String>> {
    let parsed = fenced_json(text)
        .or_else(|| whole_object(text))
        .or_else(|| any_fenced(text))
        .or_else(|| json_prefixed(text))
        .or_else(|| balanced_substring(text))?;

    if !outside_is_whitespace(text, parsed.start, parsed.end) {
        debug!(
            span_start = parsed.start,
            span_end = parsed.end,
            "envelope surrounded by extra text, falling back to prose"
        );
        return None;
    }
    if parsed.messages.is_empty() {
        debug!("envelope has an empty messages list, falling back to prose");
        return None;
    }
    debug!(count = parsed.messages.len(), "extracted structured envelope");
    Some(parsed.messages)
}
