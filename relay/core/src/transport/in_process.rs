//! In-Process Transport
//!
//! Channel-backed [`ChatTransport`] for tests and the console daemon.
//! Every operation is forwarded as a [`ChatEvent`] to the paired receiver,
//! so callers can observe exactly what the renderer did and in what order.
//!
//! Failure injection hooks mirror real chat-service behavior: markup
//! rejection of formatted text, and a disconnected service.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::chat::{ConversationId, MessageHandle};
use crate::transport::traits::{ChatTransport, SendOptions, TextMode, TransportError};

/// Channel capacity for the event stream
const EVENT_BUFFER_SIZE: usize = 256;

/// One observed transport operation
#[derive(Clone, Debug)]
pub enum ChatEvent {
    /// A new message was sent
    Sent {
        /// Handle allocated for the new message
        handle: MessageHandle,
        /// Conversation the message went to
        conversation: ConversationId,
        /// Full message text
        text: String,
        /// Markup mode the text was sent with
        mode: TextMode,
        /// Message this one threads under, if any
        reply_to: Option<MessageHandle>,
    },
    /// An existing message was replaced
    Edited {
        /// Handle of the edited message
        handle: MessageHandle,
        /// New full text
        text: String,
        /// Markup mode for the new text
        mode: TextMode,
    },
    /// A message was deleted
    Deleted {
        /// Handle of the deleted message
        handle: MessageHandle,
    },
}

/// In-process chat transport
///
/// Allocates monotonically increasing message handles and forwards every
/// operation to the paired [`ChatEvent`] receiver.
pub struct InProcessTransport {
    events: mpsc::Sender<ChatEvent>,
    next_handle: AtomicI64,
    connected: AtomicBool,
    reject_markdown: AtomicBool,
    fail_edits: AtomicU32,
}

impl InProcessTransport {
    /// Create a transport and the receiver observing its operations
    #[must_use]
    pub fn new_pair() -> (Self, mpsc::Receiver<ChatEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let transport = Self {
            events: tx,
            next_handle: AtomicI64::new(1),
            connected: AtomicBool::new(true),
            reject_markdown: AtomicBool::new(false),
            fail_edits: AtomicU32::new(0),
        };
        (transport, rx)
    }

    /// Simulate the chat service going up or down
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// When set, any markdown-mode operation is rejected as unparseable.
    /// Plain-mode operations still succeed.
    pub fn set_reject_markdown(&self, reject: bool) {
        self.reject_markdown.store(reject, Ordering::SeqCst);
    }

    /// Make the next `count` edit operations fail with `TransportError::Failed`
    pub fn fail_next_edits(&self, count: u32) {
        self.fail_edits.store(count, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Unavailable(
                "in-process transport disconnected".to_string(),
            ))
        }
    }

    fn check_markup(&self, mode: TextMode) -> Result<(), TransportError> {
        if mode == TextMode::Markdown && self.reject_markdown.load(Ordering::SeqCst) {
            Err(TransportError::Rejected(
                "can't parse entities".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn check_handle(&self, handle: MessageHandle) -> Result<(), TransportError> {
        let next = self.next_handle.load(Ordering::SeqCst);
        if handle.0 >= 1 && handle.0 < next {
            Ok(())
        } else {
            Err(TransportError::Failed(format!(
                "unknown message handle {}",
                handle.0
            )))
        }
    }

    async fn publish(&self, event: ChatEvent) -> Result<(), TransportError> {
        self.events
            .send(event)
            .await
            .map_err(|_| TransportError::Unavailable("event receiver dropped".to_string()))
    }
}

#[async_trait]
impl ChatTransport for InProcessTransport {
    async fn send_message(
        &self,
        conversation: &ConversationId,
        text: &str,
        options: SendOptions,
    ) -> Result<MessageHandle, TransportError> {
        self.check_available()?;
        self.check_markup(options.mode)?;

        let handle = MessageHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.publish(ChatEvent::Sent {
            handle,
            conversation: conversation.clone(),
            text: text.to_string(),
            mode: options.mode,
            reply_to: options.reply_to,
        })
        .await?;
        Ok(handle)
    }

    async fn edit_message(
        &self,
        handle: MessageHandle,
        text: &str,
        mode: TextMode,
    ) -> Result<(), TransportError> {
        self.check_available()?;
        if self.fail_edits.load(Ordering::SeqCst) > 0 {
            self.fail_edits.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::Failed("injected edit failure".to_string()));
        }
        self.check_markup(mode)?;
        self.check_handle(handle)?;

        self.publish(ChatEvent::Edited {
            handle,
            text: text.to_string(),
            mode,
        })
        .await
    }

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), TransportError> {
        self.check_available()?;
        self.check_handle(handle)?;
        self.publish(ChatEvent::Deleted { handle }).await
    }
}
