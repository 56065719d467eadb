//! Markdown Fence Balancing
//!
//! A streaming model emits Markdown incrementally, so at almost every prefix
//! point the buffer contains half-open formatting: an opened code fence whose
//! closing ``` has not arrived yet, or an inline `code` span missing its
//! second backtick. Rendering such a prefix verbatim makes the chat surface
//! display the rest of the message inside a code block.
//!
//! [`safe_render`] computes the minimal suffix that closes everything, so the
//! live message is valid Markdown after every single chunk. The input is
//! never modified, only appended to, which keeps the operation idempotent.

use std::borrow::Cow;

/// Whether a line opens or closes a triple-backtick code fence.
///
/// Matches lines whose first non-whitespace characters are ```` ``` ````,
/// the same rule real Markdown renderers use for fence delimiters.
#[must_use]
pub fn is_fence_line(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

/// Count of fence-delimiter lines in the text.
#[must_use]
pub fn fence_line_count(text: &str) -> usize {
    text.lines().filter(|line| is_fence_line(line)).count()
}

/// Count single backticks on a line, excluding those in triple-backtick runs.
fn standalone_backticks(line: &str) -> usize {
    line.replace("```", "").matches('`').count()
}

/// Return a rendering of `text` with all fences and inline spans balanced.
///
/// Two independent checks, both append-only:
/// - if the final line has an odd number of standalone backticks, one
///   backtick is appended to close the inline span;
/// - if the number of fence-delimiter lines is odd, a closing fence is
///   appended on its own line.
///
/// An empty buffer is already balanced and returned as-is. Applying the
/// function to its own output changes nothing.
#[must_use]
pub fn safe_render(text: &str) -> Cow<'_, str> {
    if text.is_empty() {
        return Cow::Borrowed(text);
    }

    let last_line = text.rsplit('\n').next().unwrap_or(text);
    let dangling_inline = standalone_backticks(last_line) % 2 != 0;
    let dangling_fence = fence_line_count(text) % 2 != 0;

    match (dangling_inline, dangling_fence) {
        (false, false) => Cow::Borrowed(text),
        (true, false) => Cow::Owned(format!("{text}`")),
        (false, true) => Cow::Owned(format!("{text}\n```")),
        (true, true) => Cow::Owned(format!("{text}`\n```")),
    }
}
