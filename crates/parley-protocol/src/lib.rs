//! # parley-protocol
//!
//! Wire contract for the Parley chat coordinator.
//!
//! - [`ClientAction`] - the actions a client can invoke
//! - [`ServerEvent`] - the events the coordinator fans out
//! - [`models`] - messages, attachments, presence and room snapshots
//! - [`Frame`] / [`codec`] - the request/response envelope and its
//!   length-prefixed MessagePack encoding
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, ClientAction, Frame};
//!
//! let frame = Frame::invoke(1, ClientAction::JoinRoom {
//!     room_id: "lobby".into(),
//!     user_name: "Alice".into(),
//! });
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod events;
pub mod frames;
pub mod models;

pub use codec::{decode, encode, ProtocolError};
pub use events::ServerEvent;
pub use frames::{codes, ActionResult, ClientAction, Frame, PROTOCOL_VERSION};
pub use models::{
    now_millis, Attachment, AttachmentUpload, ChatMessage, ConnectionId, MessageId, RoomId,
    RoomInfo, UserStatus,
};
