//! Room registry for Parley.
//!
//! Rooms are named groups of connections. The registry keeps the room map
//! and a reverse index (connection -> rooms) in step on every join and
//! leave, so disconnect cleanup only touches the rooms a connection was
//! actually in. The registry is pure state; broadcasting is left to the
//! coordinator.
//!
//! Lock order is always room entry first, then reverse-index entry.

use dashmap::{DashMap, DashSet};
use parley_protocol::{now_millis, ConnectionId, RoomId, RoomInfo};
use std::collections::HashSet;
use tracing::debug;

use crate::error::ChatError;
use crate::ids;

/// Maximum room id / room name length.
pub const MAX_ROOM_ID_LENGTH: usize = 256;

/// Validate a room id or explicit room name.
///
/// # Errors
///
/// Returns an error message if the value is empty, too long or contains
/// control characters.
pub fn validate_room_id(room_id: &str) -> Result<(), &'static str> {
    if room_id.is_empty() {
        return Err("Room id cannot be empty");
    }
    if room_id.len() > MAX_ROOM_ID_LENGTH {
        return Err("Room id too long");
    }
    if room_id.chars().any(char::is_control) {
        return Err("Room id contains control characters");
    }
    Ok(())
}

#[derive(Debug)]
struct Room {
    id: RoomId,
    name: String,
    members: HashSet<ConnectionId>,
    created_at: u64,
}

impl Room {
    fn new(id: impl Into<RoomId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            members: HashSet::new(),
            created_at: now_millis(),
        }
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.id.clone(),
            room_name: self.name.clone(),
            member_ids: self.members.iter().cloned().collect(),
            created_at: self.created_at,
        }
    }
}

/// Result of a join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Room snapshot taken right after the join.
    pub room: RoomInfo,
    pub member_count: usize,
    /// `false` when the connection was already a member.
    pub newly_joined: bool,
}

/// Result of a leave that changed membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub member_count: usize,
    /// The room dropped to zero members and was evicted.
    pub evicted: bool,
}

/// The room registry.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Room>,
    /// Reverse index: connection -> rooms it belongs to.
    memberships: DashMap<ConnectionId, DashSet<RoomId>>,
    evict_empty_rooms: bool,
}

impl RoomRegistry {
    /// Create a registry that keeps empty rooms.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that evicts rooms whose membership drops to zero.
    #[must_use]
    pub fn with_eviction(evict_empty_rooms: bool) -> Self {
        Self {
            evict_empty_rooms,
            ..Self::default()
        }
    }

    /// Number of rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Add a connection to a room, creating the room on first reference.
    ///
    /// Joining a room twice leaves membership unchanged and reports
    /// `newly_joined == false`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidRoom`] if the room id is invalid.
    pub fn join(&self, room_id: &str, connection_id: &str) -> Result<JoinOutcome, ChatError> {
        validate_room_id(room_id).map_err(ChatError::InvalidRoom)?;

        let mut room = self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            debug!(room = %room_id, "Creating room on first join");
            Room::new(room_id, room_id)
        });

        let newly_joined = room.members.insert(connection_id.to_string());
        self.memberships
            .entry(connection_id.to_string())
            .or_default()
            .insert(room_id.to_string());

        debug!(
            room = %room_id,
            connection = %connection_id,
            members = room.members.len(),
            newly_joined,
            "Joined room"
        );

        Ok(JoinOutcome {
            room: room.info(),
            member_count: room.members.len(),
            newly_joined,
        })
    }

    /// Remove a connection from a room.
    ///
    /// Returns `None` if the room does not exist or the connection was not a
    /// member.
    pub fn leave(&self, room_id: &str, connection_id: &str) -> Option<LeaveOutcome> {
        let member_count = {
            let mut room = self.rooms.get_mut(room_id)?;
            if !room.members.remove(connection_id) {
                return None;
            }
            if let Some(rooms) = self.memberships.get(connection_id) {
                rooms.remove(room_id);
            }
            room.members.len()
        };

        self.memberships
            .remove_if(connection_id, |_, rooms| rooms.is_empty());

        let evicted = self.evict_empty_rooms
            && member_count == 0
            && self
                .rooms
                .remove_if(room_id, |_, room| room.members.is_empty())
                .is_some();

        debug!(
            room = %room_id,
            connection = %connection_id,
            members = member_count,
            evicted,
            "Left room"
        );

        Some(LeaveOutcome {
            member_count,
            evicted,
        })
    }

    /// Create a room with a fresh id and no members.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidRoom`] if the name is invalid.
    pub fn create_explicit(&self, room_name: &str) -> Result<RoomInfo, ChatError> {
        validate_room_id(room_name).map_err(ChatError::InvalidRoom)?;

        let room = Room::new(ids::room_id(), room_name);
        let info = room.info();
        self.rooms.insert(info.room_id.clone(), room);

        debug!(room = %info.room_id, name = %room_name, "Created room");
        Ok(info)
    }

    /// Snapshot of every room.
    #[must_use]
    pub fn list_rooms(&self) -> Vec<RoomInfo> {
        self.rooms.iter().map(|r| r.info()).collect()
    }

    /// Snapshot of one room.
    #[must_use]
    pub fn get(&self, room_id: &str) -> Option<RoomInfo> {
        self.rooms.get(room_id).map(|r| r.info())
    }

    /// Current members of a room (empty if the room is unknown).
    #[must_use]
    pub fn members_of(&self, room_id: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room_id)
            .map(|r| r.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Member count of a room (0 if the room is unknown).
    #[must_use]
    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |r| r.members.len())
    }

    /// Whether a connection is a member of a room.
    #[must_use]
    pub fn is_member(&self, room_id: &str, connection_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|r| r.members.contains(connection_id))
    }

    /// Rooms a connection currently belongs to.
    #[must_use]
    pub fn rooms_containing(&self, connection_id: &str) -> Vec<RoomId> {
        self.memberships
            .get(connection_id)
            .map(|rooms| rooms.iter().map(|r| r.clone()).collect())
            .unwrap_or_default()
    }

    /// Remove and return the reverse-index entry for a connection.
    ///
    /// Membership in the rooms themselves is untouched; callers follow up
    /// with [`RoomRegistry::leave`] for each returned room.
    pub fn take_rooms(&self, connection_id: &str) -> Vec<RoomId> {
        self.memberships
            .remove(connection_id)
            .map(|(_, rooms)| rooms.into_iter().collect())
            .unwrap_or_default()
    }
}
