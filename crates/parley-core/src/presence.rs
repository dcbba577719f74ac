//! Presence tracking for Parley.
//!
//! The presence registry maps a connection to the identity it joined with
//! and its online/offline state. Records are marked offline on disconnect
//! rather than removed; [`PresenceRegistry::prune_offline`] reclaims them.

use dashmap::DashMap;
use parley_protocol::{now_millis, ConnectionId, UserStatus};
use std::time::Duration;
use tracing::debug;

use crate::error::NotFound;

/// Presence registry keyed by connection.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    users: DashMap<ConnectionId, UserStatus>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of presence records, online or not.
    #[must_use]
    pub fn count(&self) -> usize {
        self.users.len()
    }

    /// Number of online users.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.users.iter().filter(|u| u.is_online).count()
    }

    /// Whether the connection has a presence record.
    #[must_use]
    pub fn contains(&self, connection_id: &str) -> bool {
        self.users.contains_key(connection_id)
    }

    /// Create or overwrite the record for a connection and mark it online.
    ///
    /// Display names are not checked for collisions.
    pub fn upsert_user(&self, connection_id: &str, user_name: &str) -> UserStatus {
        let status = UserStatus {
            user_id: connection_id.to_string(),
            user_name: user_name.to_string(),
            is_online: true,
            last_activity: now_millis(),
        };

        if self
            .users
            .insert(connection_id.to_string(), status.clone())
            .is_none()
        {
            debug!(connection = %connection_id, user = %user_name, "Presence: user registered");
        }

        status
    }

    /// Update the online flag and activity time.
    ///
    /// # Errors
    ///
    /// Returns [`NotFound::User`] if the connection never joined anything.
    pub fn set_status(&self, connection_id: &str, is_online: bool) -> Result<UserStatus, NotFound> {
        let mut user = self
            .users
            .get_mut(connection_id)
            .ok_or_else(|| NotFound::User(connection_id.to_string()))?;

        user.is_online = is_online;
        user.last_activity = now_millis();
        debug!(connection = %connection_id, online = is_online, "Presence: status changed");

        Ok(user.clone())
    }

    /// Refresh the activity time, returning the updated record.
    pub fn touch(&self, connection_id: &str) -> Option<UserStatus> {
        self.users.get_mut(connection_id).map(|mut user| {
            user.last_activity = now_millis();
            user.clone()
        })
    }

    /// Get the record for a connection.
    ///
    /// # Errors
    ///
    /// Returns [`NotFound::User`] if there is no record.
    pub fn get_user(&self, connection_id: &str) -> Result<UserStatus, NotFound> {
        self.users
            .get(connection_id)
            .map(|u| u.clone())
            .ok_or_else(|| NotFound::User(connection_id.to_string()))
    }

    /// Delete the record for a connection.
    pub fn remove(&self, connection_id: &str) -> Option<UserStatus> {
        let removed = self.users.remove(connection_id).map(|(_, user)| user);
        if removed.is_some() {
            debug!(connection = %connection_id, "Presence: user removed");
        }
        removed
    }

    /// Snapshot the records of the given connections, skipping unknown ids.
    #[must_use]
    pub fn users<'a>(&self, ids: impl IntoIterator<Item = &'a ConnectionId>) -> Vec<UserStatus> {
        ids.into_iter()
            .filter_map(|id| self.users.get(id.as_str()).map(|u| u.clone()))
            .collect()
    }

    /// Remove offline records idle for longer than `retention`.
    ///
    /// Online records and records whose connection is still live are never
    /// pruned. Returns the removed connection ids.
    pub fn prune_offline(
        &self,
        retention: Duration,
        is_live: impl Fn(&str) -> bool,
    ) -> Vec<ConnectionId> {
        let cutoff = now_millis().saturating_sub(retention.as_millis() as u64);
        let mut pruned = Vec::new();

        self.users.retain(|id, user| {
            let stale = !user.is_online && user.last_activity < cutoff && !is_live(id);
            if stale {
                pruned.push(id.clone());
            }
            !stale
        });

        for id in &pruned {
            debug!(connection = %id, "Presence: pruned offline user");
        }

        pruned
    }
}
