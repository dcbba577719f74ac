//! Data models shared by actions, events and replies.
//!
//! Every model serializes with camelCase field names; existing consumers
//! match on these names, so they must not drift.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier assigned by the host to an open link.
pub type ConnectionId = String;

/// Room identifier.
pub type RoomId = String;

/// Streaming or finalized message identifier.
pub type MessageId = String;

/// Current wall-clock time as Unix epoch milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// Presence record for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    /// The connection this identity is bound to.
    pub user_id: ConnectionId,
    /// Display name chosen at join time. Not unique.
    pub user_name: String,
    pub is_online: bool,
    /// Last activity, epoch milliseconds.
    pub last_activity: u64,
}

/// Room metadata snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub room_name: String,
    /// Current members, in no particular order.
    pub member_ids: Vec<ConnectionId>,
    /// Creation time, epoch milliseconds.
    pub created_at: u64,
}

impl RoomInfo {
    /// Number of members in the snapshot.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.member_ids.len()
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub attachment_id: String,
    pub file_name: String,
    pub file_url: String,
    pub content_type: String,
    /// Size in bytes.
    pub file_size: u64,
    pub uploaded_at: u64,
}

/// Client-supplied attachment description.
///
/// The coordinator stamps the identifier and upload time when it turns an
/// upload into an [`Attachment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentUpload {
    pub file_name: String,
    pub file_url: String,
    pub content_type: String,
    pub file_size: u64,
}

impl AttachmentUpload {
    /// Build an upload description.
    #[must_use]
    pub fn new(
        file_name: impl Into<String>,
        file_url: impl Into<String>,
        content_type: impl Into<String>,
        file_size: u64,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_url: file_url.into(),
            content_type: content_type.into(),
            file_size,
        }
    }

    /// Turn the upload into an immutable attachment.
    #[must_use]
    pub fn into_attachment(self, attachment_id: impl Into<String>, uploaded_at: u64) -> Attachment {
        Attachment {
            attachment_id: attachment_id.into(),
            file_name: self.file_name,
            file_url: self.file_url,
            content_type: self.content_type,
            file_size: self.file_size,
            uploaded_at,
        }
    }
}

/// A chat message, either finalized or still streaming.
///
/// `is_streaming` and `is_complete` are never both true: a stream starts as
/// `(true, false)` and ends as `(false, true)`. Single-shot messages are
/// created as `(false, true)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message_id: MessageId,
    pub sender_id: ConnectionId,
    pub sender_name: String,
    pub room_id: RoomId,
    /// Full content. Streaming updates replace it, they do not append.
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub is_streaming: bool,
    pub is_complete: bool,
    pub timestamp: u64,
}

impl ChatMessage {
    /// Create a finalized message.
    #[must_use]
    pub fn finalized(
        message_id: impl Into<MessageId>,
        sender_id: impl Into<ConnectionId>,
        sender_name: impl Into<String>,
        room_id: impl Into<RoomId>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            room_id: room_id.into(),
            content: content.into(),
            attachments: Vec::new(),
            is_streaming: false,
            is_complete: true,
            timestamp: now_millis(),
        }
    }

    /// Create the empty opening frame of a stream.
    #[must_use]
    pub fn streaming(
        message_id: impl Into<MessageId>,
        sender_id: impl Into<ConnectionId>,
        sender_name: impl Into<String>,
        room_id: impl Into<RoomId>,
    ) -> Self {
        Self {
            is_streaming: true,
            is_complete: false,
            ..Self::finalized(message_id, sender_id, sender_name, room_id, String::new())
        }
    }

    /// Attach files, in order.
    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Mark the message as finished.
    pub fn finish(&mut self) {
        self.is_streaming = false;
        self.is_complete = true;
    }
}
