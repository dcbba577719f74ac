//! Streaming message assembly.
//!
//! A streaming message moves through `start -> update* -> complete`. Only
//! in-flight streams live in the assembler; completing a stream evicts it,
//! so memory is bounded by the number of unfinished streams and a completed
//! id behaves exactly like an unknown one.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parley_protocol::{Attachment, ChatMessage, MessageId};
use tracing::debug;

use crate::error::{ChatError, NotFound};
use crate::ids;

/// Active streams keyed by message id.
#[derive(Debug)]
pub struct StreamAssembler {
    active: DashMap<MessageId, ChatMessage>,
    max_content_length: usize,
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::with_content_limit(usize::MAX)
    }
}

impl StreamAssembler {
    /// Create an empty assembler without a content limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty assembler rejecting content longer than
    /// `max_content_length` bytes.
    #[must_use]
    pub fn with_content_limit(max_content_length: usize) -> Self {
        Self {
            active: DashMap::new(),
            max_content_length,
        }
    }

    /// Number of in-flight streams.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Snapshot of an in-flight stream.
    #[must_use]
    pub fn get(&self, message_id: &str) -> Option<ChatMessage> {
        self.active.get(message_id).map(|m| m.clone())
    }

    /// Open a new stream with empty content.
    pub fn start(&self, room_id: &str, sender_id: &str, sender_name: &str) -> ChatMessage {
        let message = ChatMessage::streaming(ids::message_id(), sender_id, sender_name, room_id);
        self.active
            .insert(message.message_id.clone(), message.clone());

        debug!(
            message = %message.message_id,
            room = %room_id,
            sender = %sender_id,
            "Stream started"
        );
        message
    }

    /// Replace the content of a stream.
    ///
    /// # Errors
    ///
    /// `NotFound` if no active stream has this id, `Forbidden` if the caller
    /// is not the sender, `ContentTooLarge` over the content limit. The
    /// checks run in that order.
    pub fn update(
        &self,
        message_id: &str,
        caller_id: &str,
        content: String,
    ) -> Result<ChatMessage, ChatError> {
        let max = self.max_content_length;
        self.mutate(message_id, caller_id, |message| {
            if content.len() > max {
                return Err(ChatError::ContentTooLarge {
                    size: content.len(),
                    max,
                });
            }
            message.content = content;
            Ok(())
        })
    }

    /// Append an attachment to a stream.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Forbidden`, as for [`StreamAssembler::update`].
    pub fn add_attachment(
        &self,
        message_id: &str,
        caller_id: &str,
        attachment: Attachment,
    ) -> Result<ChatMessage, ChatError> {
        self.mutate(message_id, caller_id, |message| {
            message.attachments.push(attachment);
            Ok(())
        })
    }

    /// Finalize a stream and evict it.
    ///
    /// # Errors
    ///
    /// Same as [`StreamAssembler::update`].
    pub fn complete(&self, message_id: &str, caller_id: &str) -> Result<ChatMessage, ChatError> {
        match self.active.entry(message_id.to_string()) {
            Entry::Vacant(_) => Err(NotFound::Message(message_id.to_string()).into()),
            Entry::Occupied(entry) => {
                if entry.get().sender_id != caller_id {
                    return Err(ChatError::Forbidden {
                        message_id: message_id.to_string(),
                    });
                }
                let mut message = entry.remove();
                message.finish();
                debug!(message = %message_id, "Stream completed");
                Ok(message)
            }
        }
    }

    /// Finalize and evict every stream opened by `sender_id`.
    ///
    /// Used when the sender disconnects: nobody else may complete its
    /// streams, so they would otherwise stay in flight forever.
    pub fn abandon_sender(&self, sender_id: &str) -> Vec<ChatMessage> {
        let ids: Vec<MessageId> = self
            .active
            .iter()
            .filter(|m| m.sender_id == sender_id)
            .map(|m| m.key().clone())
            .collect();

        ids.iter()
            .filter_map(|id| self.complete(id, sender_id).ok())
            .collect()
    }

    fn mutate(
        &self,
        message_id: &str,
        caller_id: &str,
        apply: impl FnOnce(&mut ChatMessage) -> Result<(), ChatError>,
    ) -> Result<ChatMessage, ChatError> {
        let mut message = self
            .active
            .get_mut(message_id)
            .ok_or_else(|| NotFound::Message(message_id.to_string()))?;

        if message.sender_id != caller_id {
            return Err(ChatError::Forbidden {
                message_id: message_id.to_string(),
            });
        }

        apply(&mut message)?;
        Ok(message.clone())
    }
}
