//! Errors surfaced to the invoking client.
//!
//! None of these are fatal and none of them produce a broadcast. An
//! operation that fails leaves every registry untouched.

use parley_protocol::codes;
use thiserror::Error;

/// What could not be found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFound {
    /// The connection never joined anything.
    #[error("User not found: {0}")]
    User(String),

    #[error("Room not found: {0}")]
    Room(String),

    /// No active stream with this id, including streams already completed.
    #[error("Message not found: {0}")]
    Message(String),
}

/// Coordinator errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// The action requires a presence record and the caller has none.
    #[error("User not found. Please join the chat first.")]
    Unauthorized,

    /// The caller does not own the streaming message.
    #[error("Not the owner of message {message_id}")]
    Forbidden { message_id: String },

    #[error(transparent)]
    NotFound(#[from] NotFound),

    /// Invalid room identifier or name.
    #[error("Invalid room: {0}")]
    InvalidRoom(&'static str),

    /// Message content exceeds the configured limit.
    #[error("Content of {size} bytes exceeds limit of {max} bytes")]
    ContentTooLarge { size: usize, max: usize },
}

impl ChatError {
    /// Wire error code for this error.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            ChatError::Unauthorized => codes::UNAUTHORIZED,
            ChatError::Forbidden { .. } => codes::FORBIDDEN,
            ChatError::NotFound(_) => codes::NOT_FOUND,
            ChatError::InvalidRoom(_) => codes::INVALID_ROOM,
            ChatError::ContentTooLarge { .. } => codes::PAYLOAD_TOO_LARGE,
        }
    }

    /// Short label, used for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::Unauthorized => "unauthorized",
            ChatError::Forbidden { .. } => "forbidden",
            ChatError::NotFound(_) => "not_found",
            ChatError::InvalidRoom(_) => "invalid_room",
            ChatError::ContentTooLarge { .. } => "content_too_large",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ChatError::Unauthorized.code(), 4010);
        assert_eq!(
            ChatError::Forbidden {
                message_id: "m".into()
            }
            .code(),
            4030
        );
        assert_eq!(ChatError::from(NotFound::Message("m".into())).code(), 4040);
    }

    #[test]
    fn test_not_found_message() {
        let err = ChatError::from(NotFound::Message("m-1".into()));
        assert_eq!(err.to_string(), "Message not found: m-1");
        assert_eq!(err.kind(), "not_found");
    }
}
