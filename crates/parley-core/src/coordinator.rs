//! The chat coordinator.
//!
//! The coordinator owns the presence registry and the stream assembler,
//! shares the room registry with whatever implements [`Outbound`], and turns
//! client actions into registry mutations followed by fan-out. Registry
//! calls return owned snapshots, so no lock is ever held while an event is
//! handed to the outbound side.

use dashmap::DashSet;
use parley_protocol::{
    now_millis, ActionResult, AttachmentUpload, ChatMessage, ClientAction, ConnectionId,
    ServerEvent, UserStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ChatError;
use crate::hub::Outbound;
use crate::ids;
use crate::presence::PresenceRegistry;
use crate::room::{validate_room_id, RoomRegistry};
use crate::stream::StreamAssembler;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Broadcast `UserJoined` again when a connection rejoins a room it is
    /// already in.
    pub renotify_on_rejoin: bool,
    /// Maximum message / stream content length in bytes.
    pub max_content_length: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            renotify_on_rejoin: false,
            max_content_length: 64 * 1024,
        }
    }
}

/// Coordinator statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Open connections.
    pub connections: usize,
    /// Users currently marked online.
    pub users_online: usize,
    pub rooms: usize,
    /// In-flight streaming messages.
    pub active_streams: usize,
}

/// Room, presence and streaming coordinator.
pub struct Coordinator {
    config: CoordinatorConfig,
    connections: DashSet<ConnectionId>,
    presence: PresenceRegistry,
    rooms: Arc<RoomRegistry>,
    streams: StreamAssembler,
    outbound: Arc<dyn Outbound>,
}

impl Coordinator {
    /// Create a coordinator.
    ///
    /// `rooms` is shared so that the outbound side can resolve room
    /// membership when it fans out.
    #[must_use]
    pub fn new(
        config: CoordinatorConfig,
        rooms: Arc<RoomRegistry>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        info!("Creating coordinator with config: {:?}", config);
        Self {
            streams: StreamAssembler::with_content_limit(config.max_content_length),
            config,
            connections: DashSet::new(),
            presence: PresenceRegistry::new(),
            rooms,
            outbound,
        }
    }

    /// The presence registry.
    #[must_use]
    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// The room registry.
    #[must_use]
    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// The stream assembler.
    #[must_use]
    pub fn streams(&self) -> &StreamAssembler {
        &self.streams
    }

    /// Get coordinator statistics.
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            connections: self.connections.len(),
            users_online: self.presence.online_count(),
            rooms: self.rooms.room_count(),
            active_streams: self.streams.active_count(),
        }
    }

    /// A link was opened.
    pub fn on_connect(&self, connection_id: &str) {
        self.connections.insert(connection_id.to_string());
        debug!(connection = %connection_id, "Connection opened");
    }

    /// Dispatch a client action.
    ///
    /// # Errors
    ///
    /// Returns the rejection for the invoking client. A rejected action
    /// changes no state and broadcasts nothing.
    pub fn handle(
        &self,
        connection_id: &str,
        action: ClientAction,
    ) -> Result<ActionResult, ChatError> {
        let name = action.name();
        let result = match action {
            ClientAction::JoinRoom { room_id, user_name } => {
                self.join_room(connection_id, &room_id, &user_name)
            }
            ClientAction::LeaveRoom { room_id } => self.leave_room(connection_id, &room_id),
            ClientAction::SendMessage { room_id, message } => {
                self.send_message(connection_id, &room_id, message)
            }
            ClientAction::SendTypingIndicator { room_id, is_typing } => {
                self.send_typing_indicator(connection_id, &room_id, is_typing)
            }
            ClientAction::UpdateUserStatus { is_online } => {
                self.update_user_status(connection_id, is_online)
            }
            ClientAction::GetAvailableRooms => Ok(self.available_rooms()),
            ClientAction::CreateRoom { room_name } => self.create_room(&room_name),
            ClientAction::StartStreamingMessage { room_id } => {
                self.start_streaming_message(connection_id, &room_id)
            }
            ClientAction::UpdateStreamingMessage {
                message_id,
                content,
            } => self.update_streaming_message(connection_id, &message_id, content),
            ClientAction::CompleteStreamingMessage { message_id } => {
                self.complete_streaming_message(connection_id, &message_id)
            }
            ClientAction::SendMessageWithAttachments {
                room_id,
                message,
                attachments,
            } => self.send_message_with_attachments(connection_id, &room_id, message, attachments),
            ClientAction::AddAttachmentToMessage {
                message_id,
                attachment,
            } => self.add_attachment_to_message(connection_id, &message_id, attachment),
        };

        if let Err(e) = &result {
            debug!(connection = %connection_id, action = name, error = %e, "Action rejected");
        }
        result
    }

    /// Join a room, creating it on first reference.
    ///
    /// `UserJoined` goes to the room on a first join, on a rejoin under a
    /// different name, and on every rejoin when `renotify_on_rejoin` is set.
    ///
    /// # Errors
    ///
    /// [`ChatError::InvalidRoom`] for an invalid room id.
    pub fn join_room(
        &self,
        connection_id: &str,
        room_id: &str,
        user_name: &str,
    ) -> Result<ActionResult, ChatError> {
        validate_room_id(room_id).map_err(ChatError::InvalidRoom)?;

        self.connections.insert(connection_id.to_string());
        let renamed = self
            .presence
            .get_user(connection_id)
            .is_ok_and(|previous| previous.user_name != user_name);
        let user = self.presence.upsert_user(connection_id, user_name);
        let joined = self.rooms.join(room_id, connection_id)?;

        // A rejoin under a new name is announced so members see the rename.
        if joined.newly_joined || renamed || self.config.renotify_on_rejoin {
            self.outbound.broadcast(
                room_id,
                ServerEvent::UserJoined {
                    user_id: user.user_id.clone(),
                    user_name: user.user_name.clone(),
                    room_id: room_id.to_string(),
                    timestamp: now_millis(),
                },
            );
        } else {
            debug!(room = %room_id, connection = %connection_id, "Rejoin, UserJoined suppressed");
        }

        self.outbound.send(
            connection_id,
            ServerEvent::RoomJoined {
                room_id: room_id.to_string(),
                participant_count: joined.member_count,
                timestamp: now_millis(),
            },
        );

        let users: Vec<UserStatus> = self
            .presence
            .users(&joined.room.member_ids)
            .into_iter()
            .filter(|u| u.is_online)
            .collect();
        self.outbound.send(
            connection_id,
            ServerEvent::UserListUpdated {
                room_id: room_id.to_string(),
                users,
            },
        );

        Ok(ActionResult::Done)
    }

    /// Leave a room. Leaving a room the caller is not in is a no-op.
    ///
    /// # Errors
    ///
    /// [`ChatError::Unauthorized`] if the caller never joined anything.
    pub fn leave_room(&self, connection_id: &str, room_id: &str) -> Result<ActionResult, ChatError> {
        let user = self.require_user(connection_id)?;

        if self.rooms.leave(room_id, connection_id).is_none() {
            debug!(room = %room_id, connection = %connection_id, "Leave ignored, not a member");
            return Ok(ActionResult::Done);
        }

        let now = now_millis();
        self.outbound.broadcast(
            room_id,
            ServerEvent::UserLeft {
                user_id: user.user_id,
                user_name: user.user_name,
                room_id: room_id.to_string(),
                timestamp: now,
            },
        );
        self.broadcast_room_updated(room_id);

        Ok(ActionResult::Done)
    }

    /// Send a finalized message to a room.
    ///
    /// # Errors
    ///
    /// [`ChatError::Unauthorized`] without a presence record,
    /// [`ChatError::ContentTooLarge`] over the content limit.
    pub fn send_message(
        &self,
        connection_id: &str,
        room_id: &str,
        text: String,
    ) -> Result<ActionResult, ChatError> {
        self.send_message_with_attachments(connection_id, room_id, text, Vec::new())
    }

    /// Send a finalized message with attachments to a room.
    ///
    /// # Errors
    ///
    /// Same as [`Coordinator::send_message`].
    pub fn send_message_with_attachments(
        &self,
        connection_id: &str,
        room_id: &str,
        text: String,
        uploads: Vec<AttachmentUpload>,
    ) -> Result<ActionResult, ChatError> {
        let user = self.require_user(connection_id)?;
        self.check_content(&text)?;

        let now = now_millis();
        let attachments = uploads
            .into_iter()
            .map(|upload| upload.into_attachment(ids::attachment_id(), now))
            .collect();
        let message = ChatMessage::finalized(
            ids::message_id(),
            connection_id,
            user.user_name,
            room_id,
            text,
        )
        .with_attachments(attachments);

        self.outbound.broadcast(
            room_id,
            ServerEvent::ReceiveMessage {
                message: message.clone(),
            },
        );
        self.presence.touch(connection_id);

        Ok(ActionResult::Message(message))
    }

    /// Tell the other members of a room whether the caller is typing.
    ///
    /// Callers without a presence record are ignored.
    ///
    /// # Errors
    ///
    /// Never fails; the signature matches the other actions.
    pub fn send_typing_indicator(
        &self,
        connection_id: &str,
        room_id: &str,
        is_typing: bool,
    ) -> Result<ActionResult, ChatError> {
        let Ok(user) = self.presence.get_user(connection_id) else {
            return Ok(ActionResult::Done);
        };

        self.outbound.broadcast_except(
            room_id,
            connection_id,
            ServerEvent::TypingIndicatorChanged {
                user_id: user.user_id,
                user_name: user.user_name,
                room_id: room_id.to_string(),
                is_typing,
            },
        );

        Ok(ActionResult::Done)
    }

    /// Change the caller's online flag and tell every room it is in.
    ///
    /// Callers without a presence record are ignored.
    ///
    /// # Errors
    ///
    /// Never fails; the signature matches the other actions.
    pub fn update_user_status(
        &self,
        connection_id: &str,
        is_online: bool,
    ) -> Result<ActionResult, ChatError> {
        let Ok(user) = self.presence.set_status(connection_id, is_online) else {
            return Ok(ActionResult::Done);
        };

        for room_id in self.rooms.rooms_containing(connection_id) {
            self.outbound.broadcast(
                &room_id,
                ServerEvent::UserStatusChanged {
                    user_id: user.user_id.clone(),
                    user_name: user.user_name.clone(),
                    is_online,
                    timestamp: user.last_activity,
                },
            );
        }

        Ok(ActionResult::Done)
    }

    /// Snapshot of every room.
    #[must_use]
    pub fn available_rooms(&self) -> ActionResult {
        ActionResult::Rooms(self.rooms.list_rooms())
    }

    /// Create a room and announce it to every connection.
    ///
    /// # Errors
    ///
    /// [`ChatError::InvalidRoom`] for an invalid name.
    pub fn create_room(&self, room_name: &str) -> Result<ActionResult, ChatError> {
        let room = self.rooms.create_explicit(room_name)?;

        self.outbound.broadcast_all(ServerEvent::RoomCreated {
            room_id: room.room_id.clone(),
            room_name: room.room_name.clone(),
            timestamp: room.created_at,
        });

        Ok(ActionResult::Room(room))
    }

    /// Open a streaming message in a room.
    ///
    /// The opening frame is returned so the caller learns the message id.
    ///
    /// # Errors
    ///
    /// [`ChatError::Unauthorized`] without a presence record.
    pub fn start_streaming_message(
        &self,
        connection_id: &str,
        room_id: &str,
    ) -> Result<ActionResult, ChatError> {
        let user = self.require_user(connection_id)?;
        let message = self.streams.start(room_id, connection_id, &user.user_name);
        Ok(self.emit_stream_frame(message))
    }

    /// Replace the content of the caller's stream.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or completed streams, then `Forbidden` for
    /// streams opened by someone else, then `ContentTooLarge` over the
    /// content limit.
    pub fn update_streaming_message(
        &self,
        connection_id: &str,
        message_id: &str,
        content: String,
    ) -> Result<ActionResult, ChatError> {
        let message = self.streams.update(message_id, connection_id, content)?;
        Ok(self.emit_stream_frame(message))
    }

    /// Finalize the caller's stream.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Forbidden`, as for updates.
    pub fn complete_streaming_message(
        &self,
        connection_id: &str,
        message_id: &str,
    ) -> Result<ActionResult, ChatError> {
        let message = self.streams.complete(message_id, connection_id)?;
        Ok(self.emit_stream_frame(message))
    }

    /// Attach a file to the caller's active stream.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Forbidden`, as for updates.
    pub fn add_attachment_to_message(
        &self,
        connection_id: &str,
        message_id: &str,
        upload: AttachmentUpload,
    ) -> Result<ActionResult, ChatError> {
        let attachment = upload.into_attachment(ids::attachment_id(), now_millis());
        let message = self
            .streams
            .add_attachment(message_id, connection_id, attachment.clone())?;

        self.outbound.broadcast(
            &message.room_id,
            ServerEvent::ReceiveAttachment {
                message_id: message.message_id.clone(),
                attachment,
            },
        );
        Ok(self.emit_stream_frame(message))
    }

    /// A link was closed.
    ///
    /// Streams the connection left open are finalized, its presence is
    /// marked offline and it is removed from every room it was in, with
    /// `UserDisconnected` and `RoomUpdated` sent to each of those rooms.
    pub fn on_disconnect(&self, connection_id: &str, reason: Option<&str>) {
        self.connections.remove(connection_id);
        debug!(connection = %connection_id, reason = reason.unwrap_or("closed"), "Connection closed");

        for message in self.streams.abandon_sender(connection_id) {
            debug!(message = %message.message_id, "Finalizing abandoned stream");
            self.emit_stream_frame(message);
        }

        let rooms = self.rooms.take_rooms(connection_id);
        let Ok(user) = self.presence.set_status(connection_id, false) else {
            for room_id in &rooms {
                self.rooms.leave(room_id, connection_id);
            }
            return;
        };

        for room_id in rooms {
            self.outbound.broadcast(
                &room_id,
                ServerEvent::UserDisconnected {
                    user_id: user.user_id.clone(),
                    user_name: user.user_name.clone(),
                    timestamp: now_millis(),
                },
            );

            if self.rooms.leave(&room_id, connection_id).is_some() {
                self.broadcast_room_updated(&room_id);
            }
        }
    }

    /// Drop offline presence records of closed connections idle for longer
    /// than `retention`. Returns how many were removed.
    pub fn prune_presence(&self, retention: Duration) -> usize {
        self.presence
            .prune_offline(retention, |id| self.connections.contains(id))
            .len()
    }

    fn require_user(&self, connection_id: &str) -> Result<UserStatus, ChatError> {
        self.presence
            .get_user(connection_id)
            .map_err(|_| ChatError::Unauthorized)
    }

    fn check_content(&self, content: &str) -> Result<(), ChatError> {
        let max = self.config.max_content_length;
        if content.len() > max {
            return Err(ChatError::ContentTooLarge {
                size: content.len(),
                max,
            });
        }
        Ok(())
    }

    /// The count is taken at delivery time, so concurrent leaves cannot
    /// leave members with a stale count.
    fn broadcast_room_updated(&self, room_id: &str) {
        let timestamp = now_millis();
        self.outbound.broadcast_counted(room_id, &|participant_count| {
            ServerEvent::RoomUpdated {
                room_id: room_id.to_string(),
                participant_count,
                timestamp,
            }
        });
    }

    fn emit_stream_frame(&self, message: ChatMessage) -> ActionResult {
        self.outbound.broadcast(
            &message.room_id,
            ServerEvent::ReceiveStreamingMessage {
                message: message.clone(),
            },
        );
        ActionResult::Message(message)
    }
}
