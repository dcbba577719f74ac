//! # parley-core
//!
//! Room, presence and streaming-message coordination for Parley.
//!
//! - **Presence** - connection -> identity and online state
//! - **Rooms** - membership, metadata and the connection -> rooms index
//! - **Streams** - incrementally assembled messages
//! - **Coordinator** - dispatches client actions and disconnects
//! - **Hub** - the outbound capability and its in-process implementation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│ Coordinator │────▶│  Outbound   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                       │    │    │              │
//!              ┌────────┘    │    └──────┐       │ members_of
//!              ▼             ▼           ▼       ▼
//!       ┌──────────┐  ┌───────────┐  ┌──────────────┐
//!       │ Presence │  │  Streams  │  │    Rooms     │
//!       └──────────┘  └───────────┘  └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use parley_core::{Coordinator, CoordinatorConfig, LocalHub, RoomRegistry};
//! use std::sync::Arc;
//!
//! let rooms = Arc::new(RoomRegistry::new());
//! let hub = Arc::new(LocalHub::new(Arc::clone(&rooms)));
//! let coordinator = Coordinator::new(CoordinatorConfig::default(), rooms, hub.clone());
//!
//! let mut inbox = hub.register("conn-1");
//! coordinator.on_connect("conn-1");
//! coordinator.join_room("conn-1", "lobby", "Alice").unwrap();
//!
//! let first = inbox.try_recv().unwrap();
//! assert_eq!(first.event.name(), "UserJoined");
//! ```

pub mod coordinator;
pub mod error;
pub mod hub;
pub mod ids;
pub mod presence;
pub mod room;
pub mod stream;

pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorStats};
pub use error::{ChatError, NotFound};
pub use hub::{Delivery, HubStats, LocalHub, Outbound};
pub use presence::PresenceRegistry;
pub use room::{JoinOutcome, LeaveOutcome, RoomRegistry};
pub use stream::StreamAssembler;
