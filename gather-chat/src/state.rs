//! Client-side chat state and its transition rules.
//!
//! [`ChatState`] is the single owner of the room/message model. The transport
//! and classifier never touch it; they only produce [`ServerEvent`]s that get
//! funneled through [`ChatState::apply`], and the REST layer's snapshots come
//! in through [`ChatState::replace_rooms`] and [`ChatState::merge_history`].
//! All transitions run to completion on one task, so no locking is needed.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::protocol::{Preview, ReplyRef, RoomRecord, Sender, ServerEvent, WireMessage};

/// A message after client-side normalization.
///
/// `is_mine` is derived here by comparing canonicalized sender id against the
/// authenticated user's id; it is never taken from the live push as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub sender: Sender,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_mine: bool,
    pub reply_to: Option<ReplyRef>,
}

impl Message {
    fn from_wire(room_id: &str, wire: WireMessage, self_id: &str) -> Self {
        let is_mine = canonical_id(&wire.sender.id) == self_id;
        Self {
            id: wire.id,
            room_id: room_id.to_string(),
            sender: wire.sender,
            content: wire.content,
            created_at: wire.created_at,
            is_mine,
            reply_to: wire.reply_to,
        }
    }
}

/// Append-only message list with id-based de-duplication.
#[derive(Debug, Default)]
struct MessageLog {
    entries: Vec<Message>,
    seen: HashSet<String>,
}

impl MessageLog {
    fn push(&mut self, message: Message) {
        self.seen.insert(message.id.clone());
        self.entries.push(message);
    }
}

/// The whole per-session chat model: rooms, message logs, typing sets, and
/// the incrementally maintained aggregate unread count.
#[derive(Debug, Default)]
pub struct ChatState {
    /// Canonicalized id of the authenticated user.
    self_id: String,
    rooms: BTreeMap<String, RoomRecord>,
    /// Message logs live outside the room map: history can arrive for a room
    /// the server has not announced yet.
    logs: HashMap<String, MessageLog>,
    /// Same lazy rule for typing sets. Entries have no expiry; a lost
    /// stop-typing event leaves the name behind (matches server behavior).
    typing: HashMap<String, BTreeSet<String>>,
    total_unread: u64,
}

impl ChatState {
    pub fn new(self_id: impl AsRef<str>) -> Self {
        Self {
            self_id: canonical_id(self_id.as_ref()),
            ..Self::default()
        }
    }

    /// Feed one classified live event through the reducer.
    pub fn apply(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Init { rooms } => self.replace_rooms(rooms),
            ServerEvent::Badge { room_id, unread } => self.set_badge(&room_id, unread),
            ServerEvent::Typing {
                room_id,
                username,
                state,
            } => self.set_typing(&room_id, &username, state),
            ServerEvent::Message { room_id, payload } => self.push_live(&room_id, payload),
            ServerEvent::Pong | ServerEvent::Unrecognized => {}
        }
    }

    /// Wholesale room-map replacement (room-init push or REST list).
    /// The aggregate is recomputed as the sum; logs and typing sets survive.
    pub fn replace_rooms(&mut self, rooms: Vec<RoomRecord>) {
        self.rooms = rooms.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.total_unread = self.rooms.values().map(|r| r.unread).sum();
    }

    /// Set one room's unread count from a badge push.
    ///
    /// The aggregate is adjusted by delta, never recomputed here. An unknown
    /// room is a no-op.
    pub fn set_badge(&mut self, room_id: &str, unread: u64) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            tracing::debug!(room_id, "badge for unknown room, ignoring");
            return;
        };
        // Invariant: total_unread == sum of room unreads, so it is >= room.unread.
        self.total_unread = self.total_unread - room.unread + unread;
        room.unread = unread;
    }

    /// Merge a REST history batch into a room's log.
    ///
    /// Existing order is preserved; only genuinely new ids are appended, in
    /// the batch's own order. Unread counts and previews are untouched.
    pub fn merge_history(&mut self, room_id: &str, batch: Vec<WireMessage>) {
        let self_id = self.self_id.clone();
        let log = self.logs.entry(room_id.to_string()).or_default();
        for wire in batch {
            if log.seen.contains(&wire.id) {
                continue;
            }
            log.push(Message::from_wire(room_id, wire, &self_id));
        }
    }

    /// Apply one live message push.
    ///
    /// A duplicate id is a complete no-op, which makes reconnect replays
    /// harmless. A new message from someone else bumps the room unread and
    /// the aggregate by one; the preview always moves to the new message.
    pub fn push_live(&mut self, room_id: &str, wire: WireMessage) {
        let log = self.logs.entry(room_id.to_string()).or_default();
        if log.seen.contains(&wire.id) {
            return;
        }
        let message = Message::from_wire(room_id, wire, &self.self_id);
        let from_other = !message.is_mine;
        let preview = Preview {
            content: message.content.clone(),
            at: message.created_at,
        };
        log.push(message);

        if let Some(room) = self.rooms.get_mut(room_id) {
            if from_other {
                room.unread += 1;
                self.total_unread += 1;
            }
            room.last_message = Some(preview);
        }
    }

    /// Add or remove a typing username. The set is created lazily, so an
    /// unknown room never fails; removing an absent name is a no-op.
    pub fn set_typing(&mut self, room_id: &str, username: &str, state: bool) {
        let set = self.typing.entry(room_id.to_string()).or_default();
        if state {
            set.insert(username.to_string());
        } else {
            set.remove(username);
        }
    }

    /// Zero a room's unread count, subtracting it from the aggregate.
    /// Driven by the outbound mark-read flow, not by inbound events.
    pub fn mark_read(&mut self, room_id: &str) {
        if let Some(room) = self.rooms.get_mut(room_id) {
            self.total_unread -= room.unread;
            room.unread = 0;
        }
    }

    pub fn rooms(&self) -> impl Iterator<Item = &RoomRecord> {
        self.rooms.values()
    }

    pub fn room(&self, room_id: &str) -> Option<&RoomRecord> {
        self.rooms.get(room_id)
    }

    pub fn messages(&self, room_id: &str) -> &[Message] {
        self.logs
            .get(room_id)
            .map(|log| log.entries.as_slice())
            .unwrap_or(&[])
    }

    pub fn typing(&self, room_id: &str) -> impl Iterator<Item = &str> {
        self.typing
            .get(room_id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    pub fn total_unread(&self) -> u64 {
        self.total_unread
    }
}

/// Normalization boundary for user ids. Server-side sender ids have shown up
/// both as numbers and as padded strings; comparisons only ever happen on
/// this canonical form.
fn canonical_id(raw: &str) -> String {
    raw.trim().to_string()
}
