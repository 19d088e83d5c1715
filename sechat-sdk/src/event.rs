//! Classification of raw room activity into typed events.
//!
//! The server delivers activity as JSON blobs keyed by `r<room_id>`, each
//! holding an ordered `e` list of raw event records. [`room_events`] turns
//! one blob into typed [`Event`]s, preserving record order and skipping
//! null or empty entries.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::ChatError;

/// Event type codes used by the chat service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum EventType {
    MessagePosted = 1,
    MessageEdited = 2,
    UserEntered = 3,
    UserLeft = 4,
    RoomNameChanged = 5,
    MessageStarred = 6,
    DebugMessage = 7,
    UserMentioned = 8,
    MessageFlagged = 9,
    MessageDeleted = 10,
    FileAdded = 11,
    ModeratorFlag = 12,
    UserSettingsChanged = 13,
    GlobalNotification = 14,
    AccessLevelChanged = 15,
    UserNotification = 16,
    Invitation = 17,
    MessageReply = 18,
    MessageMovedOut = 19,
    MessageMovedIn = 20,
    TimeBreak = 21,
    FeedTicker = 22,
    UserSuspended = 29,
    UserMerged = 30,
}

impl EventType {
    /// Look up a numeric event code.
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            1 => Self::MessagePosted,
            2 => Self::MessageEdited,
            3 => Self::UserEntered,
            4 => Self::UserLeft,
            5 => Self::RoomNameChanged,
            6 => Self::MessageStarred,
            7 => Self::DebugMessage,
            8 => Self::UserMentioned,
            9 => Self::MessageFlagged,
            10 => Self::MessageDeleted,
            11 => Self::FileAdded,
            12 => Self::ModeratorFlag,
            13 => Self::UserSettingsChanged,
            14 => Self::GlobalNotification,
            15 => Self::AccessLevelChanged,
            16 => Self::UserNotification,
            17 => Self::Invitation,
            18 => Self::MessageReply,
            19 => Self::MessageMovedOut,
            20 => Self::MessageMovedIn,
            21 => Self::TimeBreak,
            22 => Self::FeedTicker,
            29 => Self::UserSuspended,
            30 => Self::UserMerged,
            _ => return None,
        })
    }
}

/// A resolved event type.
///
/// The server occasionally ships codes this SDK does not know about yet;
/// those are carried as `Unrecognized` rather than dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Known(EventType),
    Unrecognized(i64),
}

impl EventKind {
    /// The raw numeric code, known or not.
    pub fn code(self) -> i64 {
        match self {
            Self::Known(kind) => kind as i64,
            Self::Unrecognized(code) => code,
        }
    }
}

/// One classified room event.
///
/// The message fields (`content`, `user_name`, `user_id`, `message_id`)
/// are populated only for `message_posted` events. `raw` keeps the record
/// as received for fields not modelled here.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub event_id: i64,
    pub room_id: u64,
    pub room_name: String,
    pub time_stamp: i64,
    pub content: Option<String>,
    pub user_name: Option<String>,
    pub user_id: Option<i64>,
    pub message_id: Option<i64>,
    pub raw: Value,
}

impl Event {
    /// Build an event from one raw record.
    ///
    /// An unknown `event_type` is kept as [`EventKind::Unrecognized`] and
    /// logged; a missing field on a `message_posted` record means the feed
    /// broke its contract and fails the construction.
    pub fn from_raw(data: &Value) -> Result<Self, ChatError> {
        let code = require_i64(data, "event_type")?;
        let event_id = require_i64(data, "id")?;
        let room_id = require_u64(data, "room_id")?;
        let room_name = require_str(data, "room_name")?.to_string();
        let time_stamp = require_i64(data, "time_stamp")?;

        let kind = match EventType::from_code(code) {
            Some(known) => EventKind::Known(known),
            None => {
                tracing::warn!(code, event_id, room_id, "unrecognized event type");
                EventKind::Unrecognized(code)
            }
        };

        let mut event = Event {
            kind,
            event_id,
            room_id,
            room_name,
            time_stamp,
            content: None,
            user_name: None,
            user_id: None,
            message_id: None,
            raw: data.clone(),
        };

        if kind == EventKind::Known(EventType::MessagePosted) {
            event.content = Some(require_str(data, "content")?.to_string());
            event.user_name = Some(require_str(data, "user_name")?.to_string());
            event.user_id = Some(require_i64(data, "user_id")?);
            event.message_id = Some(require_i64(data, "message_id")?);
        }

        Ok(event)
    }

    /// Plain-text copy of `content`, with HTML tags stripped and entities
    /// decoded. Recomputed on each call.
    pub fn text_content(&self) -> Option<String> {
        self.content.as_deref().map(html_to_text)
    }
}

/// Classify one activity blob's events for `room_id`, in record order.
///
/// A blob with no entry for the room, or an entry without an event list,
/// yields an empty vec. Null or empty records are skipped, not surfaced
/// as malformed events.
pub fn room_events(activity: &Value, room_id: u64) -> Result<Vec<Event>, ChatError> {
    let records = activity
        .get(format!("r{room_id}"))
        .and_then(|room| room.get("e"))
        .and_then(Value::as_array);
    let Some(records) = records else {
        return Ok(Vec::new());
    };
    records
        .iter()
        .filter(|data| !is_empty_record(data))
        .map(Event::from_raw)
        .collect()
}

fn is_empty_record(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn require<'a>(data: &'a Value, field: &'static str) -> Result<&'a Value, ChatError> {
    data.get(field)
        .filter(|value| !value.is_null())
        .ok_or(ChatError::MissingField(field))
}

fn require_i64(data: &Value, field: &'static str) -> Result<i64, ChatError> {
    require(data, field)?
        .as_i64()
        .ok_or(ChatError::MissingField(field))
}

fn require_u64(data: &Value, field: &'static str) -> Result<u64, ChatError> {
    require(data, field)?
        .as_u64()
        .ok_or(ChatError::MissingField(field))
}

fn require_str<'a>(data: &'a Value, field: &'static str) -> Result<&'a str, ChatError> {
    require(data, field)?
        .as_str()
        .ok_or(ChatError::MissingField(field))
}

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Strip HTML tags and decode entities into plain text.
pub fn html_to_text(html: &str) -> String {
    decode_entities(&TAG_RE.replace_all(html, ""))
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let name = rest[1..]
            .find(';')
            .map(|end| &rest[1..end + 1])
            .filter(|name| name.len() <= 10 && !name.contains('&'));
        match name.and_then(decode_entity) {
            Some(decoded) => {
                let consumed = name.map(str::len).unwrap_or(0) + 2;
                out.push(decoded);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()?
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse().ok()?
            } else {
                return None;
            };
            char::from_u32(code)
        }
    }
}
