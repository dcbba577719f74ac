//! Server-to-client events.
//!
//! Events are serialized adjacently tagged: `event` carries the event name
//! and `payload` its fields, e.g.
//!
//! ```json
//! {"event":"UserJoined","payload":{"userId":"conn_1","userName":"Alice","roomId":"r1","timestamp":0}}
//! ```

use crate::models::{Attachment, ChatMessage, ConnectionId, MessageId, RoomId, UserStatus};
use serde::{Deserialize, Serialize};

/// An event pushed by the coordinator to one or more connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ServerEvent {
    /// Sent to a caller after it joined a room.
    #[serde(rename_all = "camelCase")]
    RoomJoined {
        room_id: RoomId,
        participant_count: usize,
        timestamp: u64,
    },

    /// Membership count of a room changed.
    #[serde(rename_all = "camelCase")]
    RoomUpdated {
        room_id: RoomId,
        participant_count: usize,
        timestamp: u64,
    },

    /// A room was created explicitly. Sent to every connection.
    #[serde(rename_all = "camelCase")]
    RoomCreated {
        room_id: RoomId,
        room_name: String,
        timestamp: u64,
    },

    #[serde(rename_all = "camelCase")]
    UserJoined {
        user_id: ConnectionId,
        user_name: String,
        room_id: RoomId,
        timestamp: u64,
    },

    #[serde(rename_all = "camelCase")]
    UserLeft {
        user_id: ConnectionId,
        user_name: String,
        room_id: RoomId,
        timestamp: u64,
    },

    #[serde(rename_all = "camelCase")]
    UserStatusChanged {
        user_id: ConnectionId,
        user_name: String,
        is_online: bool,
        timestamp: u64,
    },

    #[serde(rename_all = "camelCase")]
    UserDisconnected {
        user_id: ConnectionId,
        user_name: String,
        timestamp: u64,
    },

    /// Online members of a room, sent to a caller that just joined.
    #[serde(rename_all = "camelCase")]
    UserListUpdated {
        room_id: RoomId,
        users: Vec<UserStatus>,
    },

    /// A finalized message.
    ReceiveMessage { message: ChatMessage },

    #[serde(rename_all = "camelCase")]
    TypingIndicatorChanged {
        user_id: ConnectionId,
        user_name: String,
        room_id: RoomId,
        is_typing: bool,
    },

    /// One frame of a streaming message (opening, update or final).
    ReceiveStreamingMessage { message: ChatMessage },

    #[serde(rename_all = "camelCase")]
    ReceiveAttachment {
        message_id: MessageId,
        attachment: Attachment,
    },
}

impl ServerEvent {
    /// The wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::RoomJoined { .. } => "RoomJoined",
            ServerEvent::RoomUpdated { .. } => "RoomUpdated",
            ServerEvent::RoomCreated { .. } => "RoomCreated",
            ServerEvent::UserJoined { .. } => "UserJoined",
            ServerEvent::UserLeft { .. } => "UserLeft",
            ServerEvent::UserStatusChanged { .. } => "UserStatusChanged",
            ServerEvent::UserDisconnected { .. } => "UserDisconnected",
            ServerEvent::UserListUpdated { .. } => "UserListUpdated",
            ServerEvent::ReceiveMessage { .. } => "ReceiveMessage",
            ServerEvent::TypingIndicatorChanged { .. } => "TypingIndicatorChanged",
            ServerEvent::ReceiveStreamingMessage { .. } => "ReceiveStreamingMessage",
            ServerEvent::ReceiveAttachment { .. } => "ReceiveAttachment",
        }
    }

    /// The message carried by `ReceiveMessage` / `ReceiveStreamingMessage`.
    #[must_use]
    pub fn message(&self) -> Option<&ChatMessage> {
        match self {
            ServerEvent::ReceiveMessage { message }
            | ServerEvent::ReceiveStreamingMessage { message } => Some(message),
            _ => None,
        }
    }
}
