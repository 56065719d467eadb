//! Streaming Turn Renderer
//!
//! Drives one model turn from token stream to delivered chat messages.
//! Prose replies are rendered into a live message that is edited in place
//! as text accumulates, segmented when they outgrow the per-message
//! budget. Replies that look like a structured envelope are held back
//! entirely and dispatched as separate messages once the stream ends.
//!
//! Error policy: throttled live edits are best effort (a failed edit is
//! logged and the next tick tries again), but sends and edits that change
//! message structure propagate their errors. Markup rejections get one
//! literal-text retry before anything else happens.

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::StreamingChunk;
use crate::chat::MessageHandle;
use crate::render::detect::PayloadKind;
use crate::render::envelope::extract_envelope;
use crate::render::fence::safe_render;
use crate::render::segment::{plan_split, Segment};
use crate::render::session::{StreamSession, TurnToken};
use crate::render::splitter::{dispatch_messages, DispatchPacing};
use crate::transport::{ChatTransport, SendOptions, TextMode, TransportError};

/// Tuning for the renderer
#[derive(Clone, Debug)]
pub struct RenderSettings {
    /// Character budget for one chat message
    pub segment_budget: usize,
    /// Whether over-budget replies are segmented at all
    pub split_enabled: bool,
    /// Pacing for structured dispatch
    pub pacing: DispatchPacing,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            segment_budget: 3500,
            split_enabled: true,
            pacing: DispatchPacing::default(),
        }
    }
}

/// What a finished turn produced
#[derive(Debug, Default)]
pub struct TurnOutcome {
    /// Complete reply text as the model produced it
    pub final_text: String,
    /// Delivered segments, in order
    pub segments: Vec<Segment>,
    /// Handles of all messages created, in order
    pub handles: Vec<MessageHandle>,
    /// Final payload classification
    pub kind: PayloadKind,
    /// True when a newer turn superseded this one mid-stream
    pub superseded: bool,
    /// Error reported by the model stream, if any
    pub model_error: Option<String>,
}

/// Renders streamed turns into a chat transport
pub struct StreamRenderer<'a, T: ChatTransport + ?Sized> {
    transport: &'a T,
    settings: RenderSettings,
}

impl<'a, T: ChatTransport + ?Sized> StreamRenderer<'a, T> {
    /// Create a renderer over `transport`
    pub fn new(transport: &'a T, settings: RenderSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Drive one turn to completion
    ///
    /// Consumes the session and the chunk stream. Returns the outcome,
    /// or the transport error that ended the turn. Between chunks the
    /// turn token is checked; a superseded turn stops sending and
    /// returns with `superseded` set, leaving delivered content as is.
    pub async fn drive<R>(
        &self,
        mut session: StreamSession,
        mut chunks: mpsc::Receiver<StreamingChunk>,
        token: &TurnToken,
        rng: &mut R,
    ) -> Result<TurnOutcome, TransportError>
    where
        R: Rng + ?Sized,
    {
        let mut outcome = TurnOutcome::default();
        let mut full_reply = String::new();

        while let Some(event) = chunks.recv().await {
            let text = match event {
                StreamingChunk::Token(text) => text,
                StreamingChunk::Complete { .. } => break,
                StreamingChunk::Error(message) => {
                    warn!(%message, "model stream reported an error");
                    outcome.model_error = Some(message);
                    break;
                }
            };

            if token.is_stale() {
                debug!(turn = %session.turn(), "turn superseded mid-stream, abandoning");
                outcome.superseded = true;
                outcome.kind = session.payload_kind();
                outcome.final_text = full_reply;
                return Ok(outcome);
            }

            session.push_chunk(&text);
            full_reply.push_str(&text);

            // Structured candidates render nothing until the stream ends,
            // and an undecided prefix is too short to be worth showing.
            if session.payload_kind() != PayloadKind::Prose {
                continue;
            }

            self.enforce_budget(&mut session, &mut outcome).await?;

            if session.is_edit_tick() {
                let candidate = session.render_candidate();
                if session.differs_from_rendered(&candidate) {
                    match self.render_live(&mut session, &mut outcome, candidate).await {
                        Ok(()) => {}
                        Err(TransportError::Failed(message)) => {
                            warn!(%message, "live edit failed, continuing");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        session.finish_classification();
        outcome.kind = session.payload_kind();

        if token.is_stale() {
            debug!(turn = %session.turn(), "turn superseded at end of stream");
            outcome.superseded = true;
            outcome.final_text = full_reply;
            return Ok(outcome);
        }

        if outcome.kind == PayloadKind::PossiblyStructured {
            if let Some(messages) = extract_envelope(session.buffer()) {
                self.dispatch_structured(&session, &mut outcome, &messages, rng)
                    .await?;
                outcome.final_text = full_reply;
                return Ok(outcome);
            }
            debug!("structured candidate did not parse, rendering as prose");
        }

        self.finalize_prose(&mut session, &mut outcome).await?;
        outcome.final_text = full_reply;
        Ok(outcome)
    }

    /// Send the parsed envelope as independent messages
    async fn dispatch_structured<R>(
        &self,
        session: &StreamSession,
        outcome: &mut TurnOutcome,
        messages: &[String],
        rng: &mut R,
    ) -> Result<(), TransportError>
    where
        R: Rng + ?Sized,
    {
        if let [single] = messages {
            // One-element envelopes collapse to an ordinary reply
            let display = safe_render(single);
            let handle = self
                .send_new(session, &display, session.reply_anchor())
                .await?;
            outcome.handles.push(handle);
            outcome.segments.push(Segment::new(single.clone(), true));
            return Ok(());
        }

        debug!(count = messages.len(), "dispatching structured messages");
        let handles = dispatch_messages(
            self.transport,
            session.conversation(),
            messages,
            session.reply_anchor(),
            &self.settings.pacing,
            rng,
        )
        .await?;
        outcome.handles.extend(handles);
        for (index, message) in messages.iter().enumerate() {
            outcome
                .segments
                .push(Segment::new(message.clone(), index + 1 == messages.len()));
        }
        Ok(())
    }

    /// Force the final render and record the closing segment
    async fn finalize_prose(
        &self,
        session: &mut StreamSession,
        outcome: &mut TurnOutcome,
    ) -> Result<(), TransportError> {
        if session.buffer().is_empty() {
            return Ok(());
        }

        self.enforce_budget(session, outcome).await?;

        let candidate = session.render_candidate();
        match session.live_handle() {
            Some(handle) => {
                if session.differs_from_rendered(&candidate) {
                    self.edit_balanced(handle, &candidate).await?;
                }
            }
            None => {
                let reply_to = first_send_anchor(session, outcome);
                let handle = self.send_new(session, &candidate, reply_to).await?;
                outcome.handles.push(handle);
            }
        }

        outcome.segments.push(Segment {
            content: session.buffer().to_string(),
            preceding_fence: session.take_carry(),
            is_final: true,
        });
        Ok(())
    }

    /// Split the buffer until it fits the per-message budget
    ///
    /// Each round retires the current live message to the head content
    /// (or sends the head fresh when no live message exists yet) and
    /// records it as a finalized segment. After the last round the tail
    /// is sent as the new live message.
    async fn enforce_budget(
        &self,
        session: &mut StreamSession,
        outcome: &mut TurnOutcome,
    ) -> Result<(), TransportError> {
        if !self.settings.split_enabled {
            return Ok(());
        }

        let mut did_split = false;
        loop {
            let effective = self
                .settings
                .segment_budget
                .saturating_sub(session.title_chars());
            let Some(plan) = plan_split(session.buffer(), effective) else {
                break;
            };

            debug!(
                head_chars = plan.head.chars().count(),
                carried_fence = plan.carry.is_some(),
                "finalizing over-budget head"
            );

            let carry_in = session.take_carry();
            let display = session.compose_render(&plan.head);
            match session.live_handle() {
                Some(handle) => self.edit_balanced(handle, &display).await?,
                None => {
                    let reply_to = first_send_anchor(session, outcome);
                    let handle = self.send_new(session, &display, reply_to).await?;
                    outcome.handles.push(handle);
                }
            }
            outcome.segments.push(Segment {
                content: plan.head.clone(),
                preceding_fence: carry_in,
                is_final: false,
            });

            session.apply_split(plan);
            did_split = true;
        }

        if did_split {
            let candidate = session.render_candidate();
            let handle = self.send_new(session, &candidate, None).await?;
            outcome.handles.push(handle);
            session.mark_rendered(candidate, handle);
        }
        Ok(())
    }

    /// Edit the live message, or create it if this turn has none yet
    async fn render_live(
        &self,
        session: &mut StreamSession,
        outcome: &mut TurnOutcome,
        candidate: String,
    ) -> Result<(), TransportError> {
        match session.live_handle() {
            Some(handle) => {
                self.edit_balanced(handle, &candidate).await?;
                session.mark_rendered(candidate, handle);
            }
            None => {
                let reply_to = first_send_anchor(session, outcome);
                let handle = self.send_new(session, &candidate, reply_to).await?;
                outcome.handles.push(handle);
                session.mark_rendered(candidate, handle);
            }
        }
        Ok(())
    }

    /// Send formatted, retrying once as literal text on markup rejection
    async fn send_new(
        &self,
        session: &StreamSession,
        text: &str,
        reply_to: Option<MessageHandle>,
    ) -> Result<MessageHandle, TransportError> {
        let options = SendOptions {
            reply_to,
            mode: TextMode::Markdown,
        };
        match self
            .transport
            .send_message(session.conversation(), text, options)
            .await
        {
            Err(e) if e.is_markup_rejection() => {
                warn!("markup rejected on send, retrying as literal text");
                self.transport
                    .send_message(
                        session.conversation(),
                        text,
                        SendOptions {
                            reply_to,
                            mode: TextMode::Plain,
                        },
                    )
                    .await
            }
            other => other,
        }
    }

    /// Edit formatted, retrying once as literal text on markup rejection
    async fn edit_balanced(
        &self,
        handle: MessageHandle,
        text: &str,
    ) -> Result<(), TransportError> {
        match self
            .transport
            .edit_message(handle, text, TextMode::Markdown)
            .await
        {
            Err(e) if e.is_markup_rejection() => {
                warn!("markup rejected on edit, retrying as literal text");
                self.transport
                    .edit_message(handle, text, TextMode::Plain)
                    .await
            }
            other => other,
        }
    }
}

/// Reply anchor for a send: only the first message of a turn threads
/// under the triggering message
fn first_send_anchor(session: &StreamSession, outcome: &TurnOutcome) -> Option<MessageHandle> {
    if outcome.handles.is_empty() {
        session.reply_anchor()
    } else {
        None
    }
}
