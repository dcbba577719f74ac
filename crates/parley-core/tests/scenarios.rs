use std::sync::Arc;

use parley_core::{
    ChatError, Coordinator, CoordinatorConfig, Delivery, LocalHub, NotFound, RoomRegistry,
};
use parley_protocol::{ActionResult, ClientAction, ServerEvent};
use tokio::sync::mpsc;

struct Harness {
    coordinator: Arc<Coordinator>,
    hub: Arc<LocalHub>,
}

impl Harness {
    fn new() -> Self {
        Self::with(CoordinatorConfig::default(), false)
    }

    fn with(config: CoordinatorConfig, evict_empty_rooms: bool) -> Self {
        let rooms = Arc::new(RoomRegistry::with_eviction(evict_empty_rooms));
        let hub = Arc::new(LocalHub::new(Arc::clone(&rooms)));
        let coordinator = Arc::new(Coordinator::new(config, rooms, hub.clone()));
        Self { coordinator, hub }
    }

    fn connect(&self, connection_id: &str) -> mpsc::Receiver<Delivery> {
        let rx = self.hub.register(connection_id);
        self.coordinator.on_connect(connection_id);
        rx
    }

    fn disconnect(&self, connection_id: &str) {
        self.coordinator.on_disconnect(connection_id, Some("test"));
        self.hub.unregister(connection_id);
    }

    fn join(&self, connection_id: &str, room_id: &str, name: &str) {
        self.coordinator
            .handle(
                connection_id,
                ClientAction::JoinRoom {
                    room_id: room_id.into(),
                    user_name: name.into(),
                },
            )
            .expect("join should succeed");
    }
}

fn drain(rx: &mut mpsc::Receiver<Delivery>) -> Vec<ServerEvent> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .map(|d| (*d.event).clone())
        .collect()
}

fn names(events: &[ServerEvent]) -> Vec<&'static str> {
    events.iter().map(ServerEvent::name).collect()
}

#[test]
fn first_join_notifies_room_and_caller() {
    let h = Harness::new();
    let mut c1 = h.connect("C1");

    h.join("C1", "r1", "Alice");

    let events = drain(&mut c1);
    assert_eq!(
        names(&events),
        vec!["UserJoined", "RoomJoined", "UserListUpdated"]
    );

    match &events[0] {
        ServerEvent::UserJoined {
            user_id,
            user_name,
            room_id,
            ..
        } => {
            assert_eq!(user_id, "C1");
            assert_eq!(user_name, "Alice");
            assert_eq!(room_id, "r1");
        }
        other => panic!("unexpected {other:?}"),
    }
    match &events[1] {
        ServerEvent::RoomJoined {
            room_id,
            participant_count,
            ..
        } => {
            assert_eq!(room_id, "r1");
            assert_eq!(*participant_count, 1);
        }
        other => panic!("unexpected {other:?}"),
    }
    match &events[2] {
        ServerEvent::UserListUpdated { room_id, users } => {
            assert_eq!(room_id, "r1");
            assert_eq!(users.len(), 1);
            assert!(users[0].is_online);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn second_member_sees_join_and_gets_full_roster() {
    let h = Harness::new();
    let mut c1 = h.connect("C1");
    let mut c2 = h.connect("C2");
    h.join("C1", "r1", "Alice");
    drain(&mut c1);

    h.join("C2", "r1", "Bob");

    assert_eq!(names(&drain(&mut c1)), vec!["UserJoined"]);
    let events = drain(&mut c2);
    assert!(matches!(
        events[1],
        ServerEvent::RoomJoined {
            participant_count: 2,
            ..
        }
    ));
    let ServerEvent::UserListUpdated { users, .. } = &events[2] else {
        panic!("expected roster");
    };
    let mut roster: Vec<_> = users.iter().map(|u| u.user_name.as_str()).collect();
    roster.sort_unstable();
    assert_eq!(roster, ["Alice", "Bob"]);
}

#[test]
fn rejoin_keeps_membership_and_skips_user_joined_by_default() {
    let h = Harness::new();
    let mut c1 = h.connect("C1");
    h.join("C1", "r1", "Alice");
    drain(&mut c1);

    h.join("C1", "r1", "Alice");

    assert_eq!(h.coordinator.rooms().member_count("r1"), 1);
    assert_eq!(
        names(&drain(&mut c1)),
        vec!["RoomJoined", "UserListUpdated"]
    );
}

#[test]
fn rejoin_renotifies_when_configured() {
    let config = CoordinatorConfig {
        renotify_on_rejoin: true,
        ..CoordinatorConfig::default()
    };
    let h = Harness::with(config, false);
    let mut c1 = h.connect("C1");
    h.join("C1", "r1", "Alice");
    drain(&mut c1);

    h.join("C1", "r1", "Alice");

    assert_eq!(h.coordinator.rooms().member_count("r1"), 1);
    assert_eq!(
        names(&drain(&mut c1)),
        vec!["UserJoined", "RoomJoined", "UserListUpdated"]
    );
}

#[test]
fn leave_broadcasts_user_left_then_room_updated() {
    let h = Harness::new();
    let mut c1 = h.connect("C1");
    let mut c2 = h.connect("C2");
    h.join("C1", "r1", "Alice");
    h.join("C2", "r1", "Bob");
    drain(&mut c1);
    drain(&mut c2);

    h.coordinator
        .handle("C1", ClientAction::LeaveRoom { room_id: "r1".into() })
        .unwrap();

    // The leaver is no longer a member and hears nothing.
    assert!(drain(&mut c1).is_empty());
    let events = drain(&mut c2);
    assert_eq!(names(&events), vec!["UserLeft", "RoomUpdated"]);
    assert!(matches!(
        events[1],
        ServerEvent::RoomUpdated {
            participant_count: 1,
            ..
        }
    ));

    // Leaving again is a silent no-op.
    assert_eq!(
        h.coordinator.leave_room("C1", "r1"),
        Ok(ActionResult::Done)
    );
    assert!(drain(&mut c2).is_empty());
}

#[test]
fn member_count_matches_membership_after_any_sequence() {
    let h = Harness::new();
    let ids = ["C1", "C2", "C3", "C4"];
    let _inboxes: Vec<_> = ids.iter().map(|id| h.connect(id)).collect();

    // A fixed pseudo-random walk of joins and leaves over two rooms.
    let mut state: u32 = 0x2545_f491;
    for _ in 0..200 {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;

        let who = ids[(state % 4) as usize];
        let room = if state & 0x10 == 0 { "a" } else { "b" };
        if state & 0x100 == 0 {
            h.join(who, room, who);
        } else {
            let _ = h.coordinator.leave_room(who, room);
        }

        for room in ["a", "b"] {
            let members = h.coordinator.rooms().members_of(room);
            assert_eq!(h.coordinator.rooms().member_count(room), members.len());
            for member in &members {
                assert!(h
                    .coordinator
                    .rooms()
                    .rooms_containing(member)
                    .contains(&room.to_string()));
            }
        }
    }
}

#[test]
fn empty_rooms_are_kept_by_default() {
    let h = Harness::new();
    let _c1 = h.connect("C1");
    h.join("C1", "r1", "Alice");
    h.coordinator.leave_room("C1", "r1").unwrap();

    let room = h.coordinator.rooms().get("r1").expect("room survives");
    assert_eq!(room.member_count(), 0);
}

#[test]
fn empty_rooms_are_evicted_when_configured() {
    let h = Harness::with(CoordinatorConfig::default(), true);
    let _c1 = h.connect("C1");
    h.join("C1", "r1", "Alice");
    h.coordinator.leave_room("C1", "r1").unwrap();

    assert!(h.coordinator.rooms().get("r1").is_none());
    assert_eq!(h.coordinator.stats().rooms, 0);
}

#[test]
fn streaming_frames_share_one_id_and_end_complete() {
    let h = Harness::new();
    let mut c1 = h.connect("C1");
    let mut observer = h.connect("C2");
    h.join("C1", "r1", "Alice");
    h.join("C2", "r1", "Bob");
    drain(&mut c1);
    drain(&mut observer);

    let ActionResult::Message(started) = h
        .coordinator
        .handle("C1", ClientAction::StartStreamingMessage { room_id: "r1".into() })
        .unwrap()
    else {
        panic!("start returns the opening frame");
    };
    let id = started.message_id.clone();

    h.coordinator
        .handle(
            "C1",
            ClientAction::UpdateStreamingMessage {
                message_id: id.clone(),
                content: "partial".into(),
            },
        )
        .unwrap();
    h.coordinator
        .handle(
            "C1",
            ClientAction::CompleteStreamingMessage {
                message_id: id.clone(),
            },
        )
        .unwrap();

    let frames: Vec<_> = drain(&mut observer)
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::ReceiveStreamingMessage { message } => Some(message),
            _ => None,
        })
        .collect();

    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|m| m.message_id == id));
    let streaming: Vec<_> = frames.iter().map(|m| m.is_streaming).collect();
    assert_eq!(streaming, [true, true, false]);
    assert_eq!(frames[1].content, "partial");
    assert!(frames[2].is_complete);
    assert!(frames.iter().all(|m| !(m.is_streaming && m.is_complete)));

    assert_eq!(
        h.coordinator.handle(
            "C1",
            ClientAction::UpdateStreamingMessage {
                message_id: id.clone(),
                content: "late".into(),
            },
        ),
        Err(ChatError::NotFound(NotFound::Message(id.clone())))
    );
    assert_eq!(
        h.coordinator.complete_streaming_message("C1", &id),
        Err(ChatError::NotFound(NotFound::Message(id)))
    );
    assert!(drain(&mut observer).is_empty());
}

#[test]
fn non_owner_cannot_touch_a_stream() {
    let h = Harness::new();
    let mut c1 = h.connect("C1");
    let mut c2 = h.connect("C2");
    h.join("C1", "r1", "Alice");
    h.join("C2", "r1", "Bob");

    let ActionResult::Message(started) = h.coordinator.start_streaming_message("C1", "r1").unwrap()
    else {
        panic!("expected message");
    };
    drain(&mut c1);
    drain(&mut c2);

    let id = started.message_id.clone();
    let forbidden = Err(ChatError::Forbidden {
        message_id: id.clone(),
    });
    assert_eq!(
        h.coordinator
            .update_streaming_message("C2", &id, "hijack".into()),
        forbidden
    );
    assert_eq!(h.coordinator.complete_streaming_message("C2", &id), forbidden);

    assert_eq!(h.coordinator.streams().get(&id), Some(started));
    assert!(drain(&mut c1).is_empty());
    assert!(drain(&mut c2).is_empty());
}

#[test]
fn typing_indicator_skips_the_typist() {
    let h = Harness::new();
    let mut c1 = h.connect("C1");
    let mut c2 = h.connect("C2");
    h.join("C1", "r1", "Alice");
    h.join("C2", "r1", "Bob");
    drain(&mut c1);
    drain(&mut c2);

    h.coordinator
        .handle(
            "C1",
            ClientAction::SendTypingIndicator {
                room_id: "r1".into(),
                is_typing: true,
            },
        )
        .unwrap();

    assert!(drain(&mut c1).is_empty());
    assert_eq!(
        drain(&mut c2),
        vec![ServerEvent::TypingIndicatorChanged {
            user_id: "C1".into(),
            user_name: "Alice".into(),
            room_id: "r1".into(),
            is_typing: true,
        }]
    );
}

#[test]
fn send_message_reaches_room_and_touches_presence() {
    let h = Harness::new();
    let mut c1 = h.connect("C1");
    let mut outsider = h.connect("C3");
    h.join("C1", "r1", "Alice");
    drain(&mut c1);
    let before = h.coordinator.presence().get_user("C1").unwrap().last_activity;

    let result = h
        .coordinator
        .handle(
            "C1",
            ClientAction::SendMessage {
                room_id: "r1".into(),
                message: "hello".into(),
            },
        )
        .unwrap();

    let events = drain(&mut c1);
    assert_eq!(names(&events), vec!["ReceiveMessage"]);
    let message = events[0].message().unwrap();
    assert_eq!(message.content, "hello");
    assert_eq!(message.sender_name, "Alice");
    assert!(message.is_complete && !message.is_streaming);
    assert_eq!(result, ActionResult::Message(message.clone()));
    assert!(drain(&mut outsider).is_empty());

    let after = h.coordinator.presence().get_user("C1").unwrap().last_activity;
    assert!(after >= before);
}

#[test]
fn disconnect_notifies_each_room_once_and_cleans_up() {
    let h = Harness::new();
    let _c1 = h.connect("C1");
    let mut a_only = h.connect("C2");
    let mut b_only = h.connect("C3");
    h.join("C1", "a", "Alice");
    h.join("C1", "b", "Alice");
    h.join("C2", "a", "Bob");
    h.join("C3", "b", "Carol");
    drain(&mut a_only);
    drain(&mut b_only);

    h.disconnect("C1");

    for (rx, room) in [(&mut a_only, "a"), (&mut b_only, "b")] {
        let events = drain(rx);
        assert_eq!(names(&events), vec!["UserDisconnected", "RoomUpdated"]);
        assert!(matches!(
            &events[0],
            ServerEvent::UserDisconnected { user_id, .. } if user_id == "C1"
        ));
        assert!(matches!(
            &events[1],
            ServerEvent::RoomUpdated { room_id, participant_count: 1, .. } if room_id == room
        ));
        assert!(!h.coordinator.rooms().is_member(room, "C1"));
    }

    assert!(h.coordinator.rooms().rooms_containing("C1").is_empty());
    let user = h.coordinator.presence().get_user("C1").unwrap();
    assert!(!user.is_online);
    assert_eq!(h.coordinator.stats().connections, 2);
}

#[test]
fn disconnect_finalizes_open_streams() {
    let h = Harness::new();
    let _c1 = h.connect("C1");
    let mut c2 = h.connect("C2");
    h.join("C1", "r1", "Alice");
    h.join("C2", "r1", "Bob");
    let ActionResult::Message(started) = h.coordinator.start_streaming_message("C1", "r1").unwrap()
    else {
        panic!("expected message");
    };
    drain(&mut c2);

    h.disconnect("C1");

    let events = drain(&mut c2);
    assert_eq!(
        names(&events),
        vec!["ReceiveStreamingMessage", "UserDisconnected", "RoomUpdated"]
    );
    let last = events[0].message().unwrap();
    assert_eq!(last.message_id, started.message_id);
    assert!(last.is_complete);
    assert_eq!(h.coordinator.streams().active_count(), 0);
}

#[test]
fn disconnect_without_join_is_silent() {
    let h = Harness::new();
    let mut c1 = h.connect("C1");
    h.disconnect("C1");

    assert!(drain(&mut c1).is_empty());
    assert_eq!(h.coordinator.stats().connections, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_keep_counts_exact() {
    let h = Harness::new();
    let _inboxes: Vec<_> = (0..64).map(|i| h.connect(&format!("C{i}"))).collect();

    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move {
                let id = format!("C{i}");
                let room = if i % 2 == 0 { "even" } else { "odd" };
                coordinator.join_room(&id, room, &id).unwrap();
                coordinator.join_room(&id, "all", &id).unwrap();
                if i % 4 == 0 {
                    coordinator.leave_room(&id, "all").unwrap();
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    let rooms = h.coordinator.rooms();
    assert_eq!(rooms.member_count("even"), 32);
    assert_eq!(rooms.member_count("odd"), 32);
    assert_eq!(rooms.member_count("all"), 48);
    assert_eq!(rooms.members_of("all").len(), 48);
    assert_eq!(rooms.rooms_containing("C0").len(), 1);
    assert_eq!(rooms.rooms_containing("C1").len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn room_members_observe_one_order() {
    let h = Harness::new();
    let mut inboxes: Vec<_> = (0..3).map(|i| h.connect(&format!("C{i}"))).collect();
    for i in 0..3 {
        h.join(&format!("C{i}"), "r1", "user");
    }
    for rx in &mut inboxes {
        drain(rx);
    }

    let tasks: Vec<_> = (0..3)
        .map(|i| {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move {
                for n in 0..20 {
                    coordinator
                        .send_message(&format!("C{i}"), "r1", format!("{i}-{n}"))
                        .unwrap();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let orders: Vec<Vec<(u64, String)>> = inboxes
        .iter_mut()
        .map(|rx| {
            std::iter::from_fn(|| rx.try_recv().ok())
                .map(|d| {
                    let content = d.event.message().map(|m| m.content.clone());
                    (d.seq.unwrap_or_default(), content.unwrap_or_default())
                })
                .collect()
        })
        .collect();

    assert_eq!(orders[0].len(), 60);
    assert!(orders.iter().all(|o| o == &orders[0]));
    assert!(orders[0].windows(2).all(|w| w[0].0 < w[1].0));
}

#[test]
fn oversized_update_reports_ownership_and_completion_first() {
    let config = CoordinatorConfig {
        max_content_length: 4,
        ..CoordinatorConfig::default()
    };
    let h = Harness::with(config, false);
    let _c1 = h.connect("C1");
    let mut c2 = h.connect("C2");
    h.join("C1", "r1", "Alice");
    h.join("C2", "r1", "Bob");
    let ActionResult::Message(started) = h.coordinator.start_streaming_message("C1", "r1").unwrap()
    else {
        panic!("expected message");
    };
    let id = started.message_id;
    drain(&mut c2);

    assert_eq!(
        h.coordinator
            .update_streaming_message("C2", &id, "too long".into()),
        Err(ChatError::Forbidden {
            message_id: id.clone()
        })
    );
    assert_eq!(
        h.coordinator
            .update_streaming_message("C1", &id, "too long".into()),
        Err(ChatError::ContentTooLarge { size: 8, max: 4 })
    );
    assert!(drain(&mut c2).is_empty());

    h.coordinator.complete_streaming_message("C1", &id).unwrap();
    assert_eq!(
        h.coordinator
            .update_streaming_message("C1", &id, "too long".into()),
        Err(ChatError::NotFound(NotFound::Message(id.clone())))
    );
    assert_eq!(
        h.coordinator
            .update_streaming_message("C2", &id, "too long".into()),
        Err(ChatError::NotFound(NotFound::Message(id)))
    );
}

#[test]
fn broadcasts_to_unknown_rooms_leave_no_hub_state() {
    let h = Harness::with(CoordinatorConfig::default(), true);
    let _c1 = h.connect("C1");
    h.join("C1", "home", "Alice");

    for i in 0..1000 {
        let room = format!("ghost-{i}");
        h.coordinator
            .send_message("C1", &room, "anyone?".into())
            .unwrap();
        h.coordinator
            .send_typing_indicator("C1", &room, true)
            .unwrap();
    }
    assert_eq!(h.hub.stats().sequenced_rooms, 1);

    h.coordinator.leave_room("C1", "home").unwrap();
    assert_eq!(h.coordinator.stats().rooms, 0);
    assert_eq!(h.hub.stats().sequenced_rooms, 0);
}

#[test]
fn rejoin_under_new_name_is_announced() {
    let h = Harness::new();
    let _c1 = h.connect("C1");
    let mut c2 = h.connect("C2");
    h.join("C1", "r1", "Alice");
    h.join("C2", "r1", "Bob");
    drain(&mut c2);

    h.join("C1", "r1", "Alicia");

    assert_eq!(h.coordinator.rooms().member_count("r1"), 2);
    let events = drain(&mut c2);
    assert_eq!(names(&events), vec!["UserJoined"]);
    assert!(matches!(
        &events[0],
        ServerEvent::UserJoined { user_id, user_name, .. }
            if user_id == "C1" && user_name == "Alicia"
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_room_update_matches_final_membership() {
    let h = Harness::new();
    let mut observer = h.connect("observer");
    h.join("observer", "r1", "Olive");
    let _inboxes: Vec<_> = (0..32)
        .map(|i| {
            let id = format!("C{i}");
            let rx = h.connect(&id);
            h.join(&id, "r1", &id);
            rx
        })
        .collect();
    drain(&mut observer);

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move {
                coordinator.leave_room(&format!("C{i}"), "r1").unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let counts: Vec<usize> = drain(&mut observer)
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::RoomUpdated {
                participant_count, ..
            } => Some(participant_count),
            _ => None,
        })
        .collect();
    assert_eq!(counts.len(), 32);
    assert_eq!(counts.last(), Some(&1));
    assert!(counts.windows(2).all(|w| w[0] >= w[1]));
}
