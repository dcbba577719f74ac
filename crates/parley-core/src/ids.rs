//! Identifier generation.
//!
//! All identifiers are random v4 UUIDs, so they stay unique across
//! restarts and never collide with caller-supplied room ids in practice.

use parley_protocol::{ConnectionId, MessageId, RoomId};
use uuid::Uuid;

/// Generate an identifier for a new link.
#[must_use]
pub fn connection_id() -> ConnectionId {
    format!("conn_{}", Uuid::new_v4().simple())
}

/// Generate an identifier for an explicitly created room.
#[must_use]
pub fn room_id() -> RoomId {
    Uuid::new_v4().to_string()
}

/// Generate a message identifier.
#[must_use]
pub fn message_id() -> MessageId {
    Uuid::new_v4().to_string()
}

/// Generate an attachment identifier.
#[must_use]
pub fn attachment_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_ids() {
        assert_ne!(message_id(), message_id());
        assert_ne!(room_id(), room_id());
    }

    #[test]
    fn test_connection_id_prefix() {
        let id = connection_id();
        assert!(id.starts_with("conn_"));
        assert_eq!(id.len(), "conn_".len() + 32);
    }
}
