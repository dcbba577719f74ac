//! Shared fixtures for the Parley benchmarks.

use parley_core::{Coordinator, CoordinatorConfig, Delivery, LocalHub, RoomRegistry};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A coordinator wired to an in-process hub.
pub struct Fixture {
    pub coordinator: Coordinator,
    pub hub: Arc<LocalHub>,
    pub inboxes: Vec<mpsc::Receiver<Delivery>>,
}

impl Fixture {
    /// Build a fixture with a queue large enough for `queue_capacity` events
    /// per connection.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        let rooms = Arc::new(RoomRegistry::new());
        let hub = Arc::new(LocalHub::with_capacity(Arc::clone(&rooms), queue_capacity));
        let coordinator = Coordinator::new(CoordinatorConfig::default(), rooms, hub.clone());
        Self {
            coordinator,
            hub,
            inboxes: Vec::new(),
        }
    }

    /// Connect `members` clients named `conn-0..` and join them all to `room_id`.
    #[must_use]
    pub fn with_room(room_id: &str, members: usize) -> Self {
        let mut fixture = Self::new(1024);
        for i in 0..members {
            let id = connection(i);
            fixture.connect(&id);
            // Room ids used by the benchmarks are always valid.
            let _ = fixture.coordinator.join_room(&id, room_id, &id);
        }
        fixture.drain();
        fixture
    }

    /// Register and connect one client.
    pub fn connect(&mut self, connection_id: &str) {
        self.inboxes.push(self.hub.register(connection_id));
        self.coordinator.on_connect(connection_id);
    }

    /// Empty every inbox, returning how many deliveries were pending.
    pub fn drain(&mut self) -> usize {
        self.inboxes
            .iter_mut()
            .map(|rx| std::iter::from_fn(|| rx.try_recv().ok()).count())
            .sum()
    }
}

/// Connection id of the `i`th benchmark client.
#[must_use]
pub fn connection(i: usize) -> String {
    format!("conn-{i}")
}
