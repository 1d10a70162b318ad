//! Wire envelopes and inbound classification.
//!
//! Everything the socket exchanges is a JSON object. Outbound envelopes are
//! internally tagged with a `type` field. Inbound frames are classified into
//! [`ServerEvent`] in a fixed priority order: any object carrying a `type`
//! tag must decode as a tagged envelope (a malformed tagged envelope is never
//! retried as a legacy bare message); only tag-less objects fall through to
//! the legacy bare-message shape the older server still emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Who sent a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    /// User identifier. Older servers emit this as a JSON number, newer ones
    /// as a string; both normalize to a string here.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Snippet of the message a reply points back at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub id: String,
    pub sender: String,
    pub content: String,
}

/// A chat message as it appears on the wire (live pushes and REST history).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub room_id: String,
    pub sender: Sender,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyRef>,
}

/// Content/timestamp snippet of a room's latest message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    pub content: String,
    pub at: DateTime<Utc>,
}

/// A room record as the server describes it (room-init push or REST list).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub banner: Option<String>,
    #[serde(default)]
    pub unread: u64,
    #[serde(default)]
    pub last_message: Option<Preview>,
}

/// Outbound client→server envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Post a message to a room.
    Send { room_id: String, content: String },
    /// Typing indicator on/off.
    Typing { room_id: String, state: bool },
    /// Mark a room read up to a message.
    Read { room_id: String, last_msg_id: String },
    /// Liveness probe. Generated by the transport, never queued.
    Ping,
}

impl ClientEnvelope {
    pub fn is_ping(&self) -> bool {
        matches!(self, ClientEnvelope::Ping)
    }
}

/// Classified inbound server→client event.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Wholesale room-list replacement.
    Init { rooms: Vec<RoomRecord> },
    /// Authoritative unread count for one room.
    Badge { room_id: String, unread: u64 },
    /// A user started or stopped typing in a room.
    Typing {
        room_id: String,
        username: String,
        state: bool,
    },
    /// A message pushed live (tagged or legacy bare shape).
    Message {
        room_id: String,
        payload: WireMessage,
    },
    /// Liveness reply. Consumed by the transport, never fanned out.
    Pong,
    /// Parsed JSON that matches no recognized shape. Logged and dropped.
    Unrecognized,
}

/// Tagged inbound envelopes. Kept private; [`classify`] is the entry point.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TaggedEnvelope {
    Init {
        rooms: Vec<RoomRecord>,
    },
    Badge {
        room_id: String,
        unread: u64,
    },
    Typing {
        room_id: String,
        username: String,
        state: bool,
    },
    Message {
        room_id: String,
        payload: WireMessage,
    },
    Pong,
}

impl From<TaggedEnvelope> for ServerEvent {
    fn from(env: TaggedEnvelope) -> Self {
        match env {
            TaggedEnvelope::Init { rooms } => ServerEvent::Init { rooms },
            TaggedEnvelope::Badge { room_id, unread } => ServerEvent::Badge { room_id, unread },
            TaggedEnvelope::Typing {
                room_id,
                username,
                state,
            } => ServerEvent::Typing {
                room_id,
                username,
                state,
            },
            TaggedEnvelope::Message { room_id, payload } => {
                ServerEvent::Message { room_id, payload }
            }
            TaggedEnvelope::Pong => ServerEvent::Pong,
        }
    }
}

/// Classify a raw inbound frame.
///
/// `None` means the frame was not JSON at all; the transport drops those
/// silently. `Some(ServerEvent::Unrecognized)` means valid JSON that matches
/// no known shape; those are logged here and dropped by the consumer.
pub fn classify(raw: &str) -> Option<ServerEvent> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;

    let event = if value.get("type").is_some() {
        // Tag present: this frame is tagged or it is nothing. Falling through
        // to the legacy shape here would misclassify malformed tagged frames.
        match serde_json::from_value::<TaggedEnvelope>(value) {
            Ok(tagged) => tagged.into(),
            Err(error) => {
                tracing::warn!(%error, "dropping unrecognized tagged envelope");
                ServerEvent::Unrecognized
            }
        }
    } else {
        // Legacy servers push bare message objects with no tag.
        match serde_json::from_value::<WireMessage>(value) {
            Ok(payload) => ServerEvent::Message {
                room_id: payload.room_id.clone(),
                payload,
            },
            Err(error) => {
                tracing::warn!(%error, "dropping envelope matching no known shape");
                ServerEvent::Unrecognized
            }
        }
    };
    Some(event)
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}
