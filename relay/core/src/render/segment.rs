//! Long Message Segmentation
//!
//! Chat transports cap message length, so a live-edited message cannot grow
//! forever. When the buffer passes the configured budget, the front of it is
//! frozen into a finalized segment and the remainder carries on as the new
//! live buffer.
//!
//! The split point is chosen so formatting survives: the buffer is scanned
//! into alternating fenced and plain spans, plain spans are further divided
//! at paragraph boundaries, and whole spans are accumulated under the
//! budget. A complete fenced block is never cut; if one alone exceeds the
//! budget it is shipped oversized instead. The only fence that may be cut is
//! the unterminated one still being streamed into, and that cut closes the
//! head synthetically and re-opens the same fence (language tag included) at
//! the start of the tail, so highlighting continues seamlessly in the next
//! message.

use crate::render::fence::is_fence_line;

/// An immutable unit of delivered output.
///
/// Produced both by size-based segmentation and by structured splitting.
/// `preceding_fence` records a synthetic fence re-opened at the start of the
/// content (the continuation of a fence cut by the previous segment);
/// `is_final` marks the last segment of the turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    /// Exact text dispatched to the transport
    pub content: String,
    /// Fence opener synthetically re-opened at the start, e.g. ```` ```python ````
    pub preceding_fence: Option<String>,
    /// Whether this is the last segment of the turn
    pub is_final: bool,
}

impl Segment {
    /// A standalone segment with no fence continuation
    #[must_use]
    pub fn new(content: impl Into<String>, is_final: bool) -> Self {
        Self {
            content: content.into(),
            preceding_fence: None,
            is_final,
        }
    }
}

/// Outcome of planning a split of an over-budget buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitPlan {
    /// Front portion to finalize; synthetic close already appended when
    /// `carry` is set
    pub head: String,
    /// Remainder that becomes the new live buffer; synthetic re-open already
    /// prepended when `carry` is set
    pub tail: String,
    /// Fence opener carried across the boundary, when the split cut an
    /// unterminated fence
    pub carry: Option<String>,
}

/// One scanned span of the buffer: a fenced block or a plain paragraph.
#[derive(Debug)]
struct Span {
    text: String,
    fence: Option<FenceSpan>,
}

#[derive(Debug)]
struct FenceSpan {
    /// Opener line without its newline, language tag included
    opener: String,
    /// Whether the closing delimiter has arrived
    terminated: bool,
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn flush_plain(spans: &mut Vec<Span>, plain: &mut String) {
    if plain.is_empty() {
        return;
    }
    for piece in plain.split_inclusive("\n\n") {
        spans.push(Span {
            text: piece.to_string(),
            fence: None,
        });
    }
    plain.clear();
}

/// Scan the buffer into spans whose concatenation reproduces it exactly.
fn scan_spans(buffer: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut plain = String::new();
    let mut open: Option<(String, String)> = None;

    for line in buffer.split_inclusive('\n') {
        match open.take() {
            None => {
                if is_fence_line(line) {
                    flush_plain(&mut spans, &mut plain);
                    let opener = line.trim_end_matches('\n').to_string();
                    open = Some((opener, line.to_string()));
                } else {
                    plain.push_str(line);
                }
            }
            Some((opener, mut acc)) => {
                acc.push_str(line);
                if is_fence_line(line) {
                    spans.push(Span {
                        text: acc,
                        fence: Some(FenceSpan {
                            opener,
                            terminated: true,
                        }),
                    });
                } else {
                    open = Some((opener, acc));
                }
            }
        }
    }

    if let Some((opener, acc)) = open {
        spans.push(Span {
            text: acc,
            fence: Some(FenceSpan {
                opener,
                terminated: false,
            }),
        });
    } else {
        flush_plain(&mut spans, &mut plain);
    }
    spans
}

fn concat(spans: &[Span]) -> String {
    spans.iter().map(|s| s.text.as_str()).collect()
}

/// Cut an unterminated fence at a line boundary under the budget.
///
/// The head gets a synthetic closing fence; the tail re-opens the same
/// fence so the stream keeps writing into an identically-tagged block.
fn split_inside_fence(text: &str, opener: &str, budget: usize) -> Option<SplitPlan> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    if lines.len() < 2 {
        return None;
    }

    let mut head = String::from(lines[0]);
    // Reserve room for the closing delimiter appended below.
    let mut used = char_len(lines[0]) + 3;
    let mut idx = 1;
    while idx < lines.len() {
        let len = char_len(lines[idx]);
        if used + len > budget {
            break;
        }
        head.push_str(lines[idx]);
        used += len;
        idx += 1;
    }
    if idx == 1 || idx == lines.len() {
        return None;
    }

    head.push_str("```");
    let mut tail = format!("{opener}\n");
    for line in &lines[idx..] {
        tail.push_str(line);
    }
    Some(SplitPlan {
        head,
        tail,
        carry: Some(opener.to_string()),
    })
}

/// Cut a plain span that alone exceeds the budget at an exact character
/// boundary. No fence bookkeeping is involved.
fn split_inside_plain(spans: &[Span], budget: usize) -> Option<SplitPlan> {
    let text = &spans[0].text;
    let cut = text.char_indices().nth(budget).map(|(i, _)| i)?;
    let mut tail = text[cut..].to_string();
    for span in &spans[1..] {
        tail.push_str(&span.text);
    }
    Some(SplitPlan {
        head: text[..cut].to_string(),
        tail,
        carry: None,
    })
}

/// Plan a split of `buffer` so the head stays within `budget` characters.
///
/// Returns `None` when the buffer already fits, or when no split would
/// improve matters (a single complete fenced block is left oversized rather
/// than cut). The head is always fence-balanced; `head + tail` reproduces
/// the buffer exactly except for the synthetic close/re-open pair recorded
/// in `carry`.
#[must_use]
pub fn plan_split(buffer: &str, budget: usize) -> Option<SplitPlan> {
    if budget == 0 || buffer.is_empty() {
        return None;
    }
    let spans = scan_spans(buffer);
    let lens: Vec<usize> = spans.iter().map(|s| char_len(&s.text)).collect();
    if lens.iter().sum::<usize>() <= budget {
        return None;
    }

    let mut k = 0;
    let mut head_len = 0;
    while k < spans.len() && head_len + lens[k] <= budget {
        head_len += lens[k];
        k += 1;
    }

    if k == 0 {
        // The very first span busts the budget on its own.
        match &spans[0].fence {
            Some(f) if !f.terminated => {
                return split_inside_fence(&spans[0].text, &f.opener, budget)
            }
            Some(_) => {
                // Complete fenced block: ship it whole, oversized.
                if spans.len() == 1 {
                    return None;
                }
                k = 1;
            }
            None => return split_inside_plain(&spans, budget),
        }
    }

    Some(SplitPlan {
        head: concat(&spans[..k]),
        tail: concat(&spans[k..]),
        carry: None,
    })
}
