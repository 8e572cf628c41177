use serde_json::Value;

use crate::{
    content::{decode_content, EventContent},
    error::DecodeError,
};

/// Fields every decoded event carries.
#[derive(Debug, Clone, PartialEq)]
pub struct EventCore {
    /// User id of the sender.
    pub sender: String,
    /// Protocol type string, for example `m.room.message`.
    pub event_type: String,
    /// Decoded polymorphic content.
    pub content: EventContent,
}

/// Unsigned metadata attached to room-scoped events.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnsignedData {
    /// Time since the event was sent, in milliseconds.
    pub age: Option<u64>,
    /// Transaction id echoed for events this session sent itself.
    pub transaction_id: Option<String>,
    /// The redaction event that nullified this event, decoded recursively.
    pub redacted_because: Option<Box<TypedEvent>>,
}

/// Fields shared by all room-scoped event variants.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomEventMeta {
    /// Server-assigned event id.
    pub event_id: String,
    /// Origin server timestamp in milliseconds since the Unix epoch.
    pub origin_server_ts: u64,
    /// Unsigned metadata.
    pub unsigned: UnsignedData,
}

/// An immutable decoded event with a discriminated shape.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedEvent {
    /// Event without room scope (currently only presence).
    Plain { core: EventCore },
    /// Generic room-scoped event.
    Room { core: EventCore, meta: RoomEventMeta },
    /// Current-value register for a room, keyed by (type, state_key).
    State {
        core: EventCore,
        meta: RoomEventMeta,
        state_key: String,
        /// Previous register value, decoded with the same content rules.
        prev_content: Option<EventContent>,
    },
    /// Event whose content was retroactively nullified.
    Redaction {
        core: EventCore,
        meta: RoomEventMeta,
        /// Event id of the redacted event, when the server includes it.
        redacts: Option<String>,
    },
    /// Room message event.
    Message { core: EventCore, meta: RoomEventMeta },
}

impl TypedEvent {
    pub fn core(&self) -> &EventCore {
        match self {
            TypedEvent::Plain { core }
            | TypedEvent::Room { core, .. }
            | TypedEvent::State { core, .. }
            | TypedEvent::Redaction { core, .. }
            | TypedEvent::Message { core, .. } => core,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.core().event_type
    }

    pub fn sender(&self) -> &str {
        &self.core().sender
    }

    pub fn content(&self) -> &EventContent {
        &self.core().content
    }

    /// Event id for room-scoped variants; `None` for plain events.
    pub fn event_id(&self) -> Option<&str> {
        match self {
            TypedEvent::Plain { .. } => None,
            TypedEvent::Room { meta, .. }
            | TypedEvent::State { meta, .. }
            | TypedEvent::Redaction { meta, .. }
            | TypedEvent::Message { meta, .. } => Some(&meta.event_id),
        }
    }
}

/// Classify a raw decoded payload into a typed event.
///
/// Decision order: redacted marker, then state key, then the presence
/// marker type, then the message marker type, then generic room event.
/// Pure and total over well-formed input; malformed payloads fail closed.
pub fn classify(raw: &Value) -> Result<TypedEvent, DecodeError> {
    let event_type = required_str(raw, "type")?.to_owned();
    let sender = required_str(raw, "sender")?.to_owned();
    let content_value = raw.get("content").ok_or(DecodeError::MissingField("content"))?;
    let content = decode_content(&event_type, content_value)?;
    let core = EventCore {
        sender,
        event_type: event_type.clone(),
        content,
    };

    if raw.get("redacted").and_then(Value::as_bool) == Some(true) {
        return Ok(TypedEvent::Redaction {
            meta: room_meta(raw)?,
            redacts: raw
                .get("redacts")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
            core,
        });
    }

    if let Some(state_key) = raw.get("state_key").and_then(Value::as_str) {
        let prev_content = match raw.get("prev_content") {
            Some(prev) => Some(decode_content(&event_type, prev)?),
            None => None,
        };
        return Ok(TypedEvent::State {
            meta: room_meta(raw)?,
            state_key: state_key.to_owned(),
            prev_content,
            core,
        });
    }

    match event_type.as_str() {
        "m.presence" => Ok(TypedEvent::Plain { core }),
        "m.room.message" => Ok(TypedEvent::Message {
            meta: room_meta(raw)?,
            core,
        }),
        _ => Ok(TypedEvent::Room {
            meta: room_meta(raw)?,
            core,
        }),
    }
}

fn room_meta(raw: &Value) -> Result<RoomEventMeta, DecodeError> {
    let event_id = required_str(raw, "event_id")?.to_owned();
    let origin_server_ts = raw
        .get("origin_server_ts")
        .and_then(Value::as_u64)
        .ok_or(DecodeError::MissingField("origin_server_ts"))?;

    let unsigned = match raw.get("unsigned") {
        Some(unsigned) => UnsignedData {
            age: unsigned.get("age").and_then(Value::as_u64),
            transaction_id: unsigned
                .get("transaction_id")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
            redacted_because: match unsigned.get("redacted_because") {
                // Nested cause events decode through the same classifier;
                // depth is unbounded.
                Some(cause) => Some(Box::new(classify(cause)?)),
                None => None,
            },
        },
        None => UnsignedData::default(),
    };

    Ok(RoomEventMeta {
        event_id,
        origin_server_ts,
        unsigned,
    })
}

fn required_str<'a>(raw: &'a Value, field: &'static str) -> Result<&'a str, DecodeError> {
    raw.get(field)
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingField(field))
}
