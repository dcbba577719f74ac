//! Frame types for the Parley protocol.
//!
//! Frames are the unit exchanged over a link. A client invokes actions with
//! [`Frame::Invoke`] and gets exactly one [`Frame::Completion`] or
//! [`Frame::Error`] back with the same request id. Events pushed by the
//! coordinator arrive as [`Frame::Event`].

use crate::events::ServerEvent;
use crate::models::{AttachmentUpload, ChatMessage, MessageId, RoomId, RoomInfo};
use serde::{Deserialize, Serialize};

/// Protocol version announced in the `Connected` frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Error codes carried by [`Frame::Error`].
pub mod codes {
    /// Undecodable or unexpected frame.
    pub const PROTOCOL: u16 = 1001;
    /// Invalid room identifier or name.
    pub const INVALID_ROOM: u16 = 4000;
    /// The action requires a prior join.
    pub const UNAUTHORIZED: u16 = 4010;
    /// The caller does not own the streaming message.
    pub const FORBIDDEN: u16 = 4030;
    /// Unknown room, user or message.
    pub const NOT_FOUND: u16 = 4040;
    /// Content exceeds the configured limit.
    pub const PAYLOAD_TOO_LARGE: u16 = 4130;
}

/// A client action, dispatched by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "args")]
pub enum ClientAction {
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: RoomId, user_name: String },

    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: RoomId },

    #[serde(rename_all = "camelCase")]
    SendMessage { room_id: RoomId, message: String },

    #[serde(rename_all = "camelCase")]
    SendTypingIndicator { room_id: RoomId, is_typing: bool },

    #[serde(rename_all = "camelCase")]
    UpdateUserStatus { is_online: bool },

    GetAvailableRooms,

    #[serde(rename_all = "camelCase")]
    CreateRoom { room_name: String },

    #[serde(rename_all = "camelCase")]
    StartStreamingMessage { room_id: RoomId },

    #[serde(rename_all = "camelCase")]
    UpdateStreamingMessage { message_id: MessageId, content: String },

    #[serde(rename_all = "camelCase")]
    CompleteStreamingMessage { message_id: MessageId },

    #[serde(rename_all = "camelCase")]
    SendMessageWithAttachments {
        room_id: RoomId,
        message: String,
        attachments: Vec<AttachmentUpload>,
    },

    #[serde(rename_all = "camelCase")]
    AddAttachmentToMessage {
        message_id: MessageId,
        attachment: AttachmentUpload,
    },
}

impl ClientAction {
    /// The wire name of the action.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientAction::JoinRoom { .. } => "JoinRoom",
            ClientAction::LeaveRoom { .. } => "LeaveRoom",
            ClientAction::SendMessage { .. } => "SendMessage",
            ClientAction::SendTypingIndicator { .. } => "SendTypingIndicator",
            ClientAction::UpdateUserStatus { .. } => "UpdateUserStatus",
            ClientAction::GetAvailableRooms => "GetAvailableRooms",
            ClientAction::CreateRoom { .. } => "CreateRoom",
            ClientAction::StartStreamingMessage { .. } => "StartStreamingMessage",
            ClientAction::UpdateStreamingMessage { .. } => "UpdateStreamingMessage",
            ClientAction::CompleteStreamingMessage { .. } => "CompleteStreamingMessage",
            ClientAction::SendMessageWithAttachments { .. } => "SendMessageWithAttachments",
            ClientAction::AddAttachmentToMessage { .. } => "AddAttachmentToMessage",
        }
    }
}

/// The value returned to the invoking client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ActionResult {
    /// The action completed with nothing to return.
    Done,
    /// Snapshot of the room registry.
    Rooms(Vec<RoomInfo>),
    /// A newly created room.
    Room(RoomInfo),
    /// The message produced by the action (streams return their id here).
    Message(ChatMessage),
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Invoke an action.
    #[serde(rename = "invoke")]
    Invoke {
        /// Request ID, echoed in the reply.
        id: u64,
        action: ClientAction,
    },

    /// Successful reply to an invocation.
    #[serde(rename = "completion")]
    Completion {
        /// ID of the invocation.
        id: u64,
        result: ActionResult,
    },

    /// Rejected invocation or protocol error.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Event pushed by the server.
    #[serde(rename = "event")]
    Event {
        /// Per-room delivery sequence, absent for direct sends.
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        event: ServerEvent,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Connection established.
    #[serde(rename = "connected")]
    Connected {
        /// Identifier the server assigned to this link.
        connection_id: String,
        /// Protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },
}

impl Frame {
    /// Create an Invoke frame.
    #[must_use]
    pub fn invoke(id: u64, action: ClientAction) -> Self {
        Frame::Invoke { id, action }
    }

    /// Create a Completion frame.
    #[must_use]
    pub fn completion(id: u64, result: ActionResult) -> Self {
        Frame::Completion { id, result }
    }

    /// Create an Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create an Event frame.
    #[must_use]
    pub fn event(seq: Option<u64>, event: ServerEvent) -> Self {
        Frame::Event { seq, event }
    }

    /// Create a Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version: PROTOCOL_VERSION,
            heartbeat,
        }
    }
}
