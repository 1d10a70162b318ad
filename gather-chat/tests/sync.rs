//! End-to-end synchronization tests: raw JSON frames through the classifier
//! into the reducer, plus REST-shaped history merges.
//!
//! Covers the properties the chat core guarantees:
//! - idempotent message insertion across live, history, and mixed paths
//! - aggregate unread always equals the sum of room unreads
//! - defensive no-ops for unknown rooms
//! - classifier priority (tagged before legacy)

use gather_chat::protocol::WireMessage;
use gather_chat::{ChatState, ServerEvent, classify};

fn apply_raw(state: &mut ChatState, raw: &str) {
    let event = classify(raw).expect("frame should parse as JSON");
    state.apply(event);
}

fn unread_sum(state: &ChatState) -> u64 {
    state.rooms().map(|r| r.unread).sum()
}

fn seed(state: &mut ChatState) {
    apply_raw(
        state,
        r#"{"type":"init","rooms":[
            {"id":"r1","title":"Climbing","unread":3},
            {"id":"r2","title":"Brunch","unread":2}]}"#,
    );
}

fn message_json(id: &str, room: &str, sender_id: &str, content: &str) -> String {
    format!(
        r#"{{"type":"message","room_id":"{room}","payload":{{
            "id":"{id}","room_id":"{room}",
            "sender":{{"id":"{sender_id}","name":"{sender_id}"}},
            "content":"{content}","created_at":"2025-06-01T10:00:00Z"}}}}"#
    )
}

fn history_batch(specs: &[(&str, &str, &str)], room: &str) -> Vec<WireMessage> {
    specs
        .iter()
        .map(|(id, sender, content)| {
            serde_json::from_value(serde_json::json!({
                "id": id,
                "room_id": room,
                "sender": { "id": sender, "name": sender },
                "content": content,
                "created_at": "2025-06-01T09:00:00Z",
            }))
            .unwrap()
        })
        .collect()
}

#[test]
fn badge_resets_room_and_aggregate() {
    // r1 unread=3, r2 unread=2, aggregate 5. Badge sets r1 to 0.
    let mut state = ChatState::new("me");
    seed(&mut state);
    assert_eq!(state.total_unread(), 5);

    apply_raw(&mut state, r#"{"type":"badge","room_id":"r1","unread":0}"#);
    assert_eq!(state.room("r1").unwrap().unread, 0);
    assert_eq!(state.total_unread(), 2);
    assert_eq!(unread_sum(&state), state.total_unread());
}

#[test]
fn incoming_message_bumps_unread_and_preview() {
    // r1 read (unread=0), aggregate 2. A message from someone else lands.
    let mut state = ChatState::new("me");
    seed(&mut state);
    apply_raw(&mut state, r#"{"type":"badge","room_id":"r1","unread":0}"#);
    assert_eq!(state.total_unread(), 2);

    apply_raw(&mut state, &message_json("m1", "r1", "u7", "anyone up for 7am?"));
    let r1 = state.room("r1").unwrap();
    assert_eq!(r1.unread, 1);
    assert_eq!(state.total_unread(), 3);
    assert_eq!(
        r1.last_message.as_ref().unwrap().content,
        "anyone up for 7am?"
    );
    assert_eq!(unread_sum(&state), state.total_unread());
}

#[test]
fn duplicate_delivery_across_live_and_history_is_idempotent() {
    let mut state = ChatState::new("me");
    seed(&mut state);

    // Live push first, then a history batch that includes the same id.
    apply_raw(&mut state, &message_json("m2", "r1", "u7", "see you there"));
    state.merge_history(
        "r1",
        history_batch(&[("m1", "u7", "earlier"), ("m2", "u7", "see you there")], "r1"),
    );
    // Replayed live push after a reconnect.
    apply_raw(&mut state, &message_json("m2", "r1", "u7", "see you there"));

    let ids: Vec<&str> = state.messages("r1").iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m2", "m1"], "first insertion position wins");
    // Exactly one unread from the one genuinely new live push.
    assert_eq!(state.room("r1").unwrap().unread, 4);
    assert_eq!(unread_sum(&state), state.total_unread());
}

#[test]
fn legacy_untagged_push_behaves_like_tagged() {
    let mut state = ChatState::new("me");
    seed(&mut state);

    apply_raw(
        &mut state,
        r#"{"id":"m9","room_id":"r2",
            "sender":{"id":"u3","name":"kay"},
            "content":"moved to 11","created_at":"2025-06-01T10:05:00Z"}"#,
    );
    assert_eq!(state.messages("r2").len(), 1);
    assert_eq!(state.room("r2").unwrap().unread, 3);
    assert_eq!(
        state.room("r2").unwrap().last_message.as_ref().unwrap().content,
        "moved to 11"
    );
}

#[test]
fn init_push_replaces_rooms_wholesale() {
    let mut state = ChatState::new("me");
    seed(&mut state);
    apply_raw(&mut state, &message_json("m1", "r1", "u7", "hi"));
    assert_eq!(state.total_unread(), 6);

    // Server re-inits with fresh counts; aggregate recomputes from scratch.
    apply_raw(
        &mut state,
        r#"{"type":"init","rooms":[
            {"id":"r1","title":"Climbing","unread":1},
            {"id":"r3","title":"Trivia","unread":0}]}"#,
    );
    assert_eq!(state.total_unread(), 1);
    assert!(state.room("r2").is_none());
    // Message logs survive the room replacement.
    assert_eq!(state.messages("r1").len(), 1);
    assert_eq!(unread_sum(&state), state.total_unread());
}

#[test]
fn typing_toggle_through_the_wire() {
    let mut state = ChatState::new("me");
    seed(&mut state);

    apply_raw(
        &mut state,
        r#"{"type":"typing","room_id":"r1","username":"alice","state":true}"#,
    );
    assert_eq!(state.typing("r1").collect::<Vec<_>>(), ["alice"]);

    apply_raw(
        &mut state,
        r#"{"type":"typing","room_id":"r1","username":"alice","state":false}"#,
    );
    assert_eq!(state.typing("r1").count(), 0);

    // Redundant stop is a no-op.
    apply_raw(
        &mut state,
        r#"{"type":"typing","room_id":"r1","username":"alice","state":false}"#,
    );
    assert_eq!(state.typing("r1").count(), 0);
}

#[test]
fn unrecognized_frames_leave_state_untouched() {
    let mut state = ChatState::new("me");
    seed(&mut state);

    state.apply(ServerEvent::Unrecognized);
    apply_raw(&mut state, r#"{"type":"presence","who":"ada"}"#);
    apply_raw(&mut state, r#"{"hello":"world"}"#);

    assert_eq!(state.total_unread(), 5);
    assert_eq!(state.rooms().count(), 2);
}

#[test]
fn aggregate_tracks_sum_across_mixed_sequence() {
    let mut state = ChatState::new("me");
    seed(&mut state);

    let steps: Vec<Box<dyn Fn(&mut ChatState)>> = vec![
        Box::new(|s| apply_raw(s, r#"{"type":"badge","room_id":"r1","unread":7}"#)),
        Box::new(|s| apply_raw(s, &message_json("ma", "r2", "u7", "one"))),
        Box::new(|s| apply_raw(s, &message_json("mb", "r2", "me", "mine"))),
        Box::new(|s| s.mark_read("r2")),
        Box::new(|s| apply_raw(s, r#"{"type":"badge","room_id":"ghost","unread":9}"#)),
        Box::new(|s| apply_raw(s, &message_json("ma", "r2", "u7", "one"))),
        Box::new(|s| apply_raw(s, r#"{"type":"badge","room_id":"r2","unread":1}"#)),
        Box::new(|s| s.mark_read("r1")),
    ];
    for step in steps {
        step(&mut state);
        assert_eq!(
            unread_sum(&state),
            state.total_unread(),
            "aggregate drifted from per-room sum"
        );
    }
    assert_eq!(state.total_unread(), 1);
}
