//! Outbound fan-out.
//!
//! [`Outbound`] is the capability the coordinator uses to reach clients.
//! [`LocalHub`] implements it in-process: every connection owns a bounded
//! queue, room broadcasts resolve membership from the [`RoomRegistry`] at
//! delivery time, and a full queue drops the event for that recipient only.

use dashmap::DashMap;
use parley_protocol::{ConnectionId, RoomId, ServerEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use crate::room::RoomRegistry;

/// Default per-connection queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Delivery capability provided by the transport layer.
///
/// All methods are fire-and-forget and must not block.
pub trait Outbound: Send + Sync {
    /// Deliver to every current member of a room.
    fn broadcast(&self, room_id: &str, event: ServerEvent);

    /// Deliver to every current member of a room except one connection.
    fn broadcast_except(&self, room_id: &str, except: &str, event: ServerEvent);

    /// Deliver to every current member of a room an event built from the
    /// member count seen by this delivery, so that the last count a member
    /// receives matches the room's final membership.
    fn broadcast_counted(&self, room_id: &str, build: &dyn Fn(usize) -> ServerEvent);

    /// Deliver to a single connection.
    fn send(&self, connection_id: &str, event: ServerEvent);

    /// Deliver to every connected client.
    fn broadcast_all(&self, event: ServerEvent);
}

/// An event queued for one connection.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Room the event was broadcast to, if any.
    pub room_id: Option<RoomId>,
    /// Per-room sequence number of a room broadcast.
    pub seq: Option<u64>,
    /// The event, shared between all recipients of one fan-out.
    pub event: Arc<ServerEvent>,
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub connections: usize,
    /// Rooms with a live sequence counter.
    pub sequenced_rooms: usize,
    pub delivered: u64,
    pub dropped: u64,
}

/// In-process implementation of [`Outbound`].
pub struct LocalHub {
    rooms: Arc<RoomRegistry>,
    connections: DashMap<ConnectionId, mpsc::Sender<Delivery>>,
    /// Last sequence number issued per room. Holding a room's entry
    /// serializes its fan-outs, which gives every member the same order.
    /// Only rooms with members have an entry; a room's sequence restarts
    /// after it empties.
    sequences: DashMap<RoomId, u64>,
    capacity: usize,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl LocalHub {
    /// Create a hub resolving room membership from `rooms`.
    #[must_use]
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self::with_capacity(rooms, DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a hub with a specific per-connection queue capacity.
    #[must_use]
    pub fn with_capacity(rooms: Arc<RoomRegistry>, capacity: usize) -> Self {
        Self {
            rooms,
            connections: DashMap::new(),
            sequences: DashMap::new(),
            capacity: capacity.max(1),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a connection and return its delivery queue.
    ///
    /// Registering an id again replaces the previous queue.
    pub fn register(&self, connection_id: &str) -> mpsc::Receiver<Delivery> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.connections.insert(connection_id.to_string(), tx);
        debug!(connection = %connection_id, "Registered with hub");
        rx
    }

    /// Drop a connection's queue. Returns `true` if it was registered.
    pub fn unregister(&self, connection_id: &str) -> bool {
        let removed = self.connections.remove(connection_id).is_some();
        if removed {
            debug!(connection = %connection_id, "Unregistered from hub");
        }
        removed
    }

    /// Whether a connection is registered.
    #[must_use]
    pub fn is_registered(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Delivery counters.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            sequenced_rooms: self.sequences.len(),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn deliver(&self, connection_id: &str, delivery: Delivery) {
        let Some(tx) = self.connections.get(connection_id) else {
            trace!(connection = %connection_id, "Skipping unregistered recipient");
            return;
        };

        match tx.try_send(delivery) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(delivery)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    connection = %connection_id,
                    event = delivery.event.name(),
                    "Delivery queue full, dropping event"
                );
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(connection = %connection_id, "Delivery queue closed");
            }
        }
    }

    fn fan_out(
        &self,
        room_id: &str,
        except: Option<&str>,
        build: impl FnOnce(usize) -> ServerEvent,
    ) {
        let mut seq = match self.sequences.get_mut(room_id) {
            Some(seq) => seq,
            None if self.rooms.member_count(room_id) == 0 => {
                trace!(room = %room_id, "Skipping fan-out to empty room");
                return;
            }
            None => self.sequences.entry(room_id.to_string()).or_insert(0),
        };

        let members = self.rooms.members_of(room_id);
        if members.is_empty() {
            drop(seq);
            self.sequences
                .remove_if(room_id, |_, _| self.rooms.member_count(room_id) == 0);
            trace!(room = %room_id, "Room emptied, sequence dropped");
            return;
        }

        *seq += 1;
        let event = Arc::new(build(members.len()));
        trace!(
            room = %room_id,
            event = event.name(),
            seq = *seq,
            recipients = members.len(),
            "Fan-out"
        );

        for member in members.iter().filter(|m| Some(m.as_str()) != except) {
            self.deliver(
                member,
                Delivery {
                    room_id: Some(room_id.to_string()),
                    seq: Some(*seq),
                    event: Arc::clone(&event),
                },
            );
        }
    }
}

impl Outbound for LocalHub {
    fn broadcast(&self, room_id: &str, event: ServerEvent) {
        self.fan_out(room_id, None, |_| event);
    }

    fn broadcast_except(&self, room_id: &str, except: &str, event: ServerEvent) {
        self.fan_out(room_id, Some(except), |_| event);
    }

    fn broadcast_counted(&self, room_id: &str, build: &dyn Fn(usize) -> ServerEvent) {
        self.fan_out(room_id, None, build);
    }

    fn send(&self, connection_id: &str, event: ServerEvent) {
        self.deliver(
            connection_id,
            Delivery {
                room_id: None,
                seq: None,
                event: Arc::new(event),
            },
        );
    }

    fn broadcast_all(&self, event: ServerEvent) {
        let event = Arc::new(event);
        let recipients: Vec<ConnectionId> =
            self.connections.iter().map(|c| c.key().clone()).collect();

        for connection_id in recipients {
            self.deliver(
                &connection_id,
                Delivery {
                    room_id: None,
                    seq: None,
                    event: Arc::clone(&event),
                },
            );
        }
    }
}
