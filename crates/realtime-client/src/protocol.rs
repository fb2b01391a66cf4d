//! JSON wire protocol: frame layout, type tags, and encode/decode.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::Error;
use crate::types::{Message, MessageKind, OutboundMessage};

// ---------------------------------------------------------------------------
// Type tags
// ---------------------------------------------------------------------------

pub mod kind {
    pub const CONNECTION_ESTABLISHED: &str = "connection_established";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
    pub const JOIN_ROOM: &str = "join_room";
    pub const LEAVE_ROOM: &str = "leave_room";
    pub const NEW_EMAIL: &str = "new_email";
    pub const NEW_REFERRAL: &str = "new_referral";
    pub const REFERRAL_UPDATED: &str = "referral_updated";
    pub const SYSTEM_ALERT: &str = "system_alert";
    pub const STATISTICS: &str = "statistics";
    pub const PROCESSING_STATUS: &str = "processing_status";
}

const UNKNOWN_SERVER_ERROR: &str = "unknown server error";

// ---------------------------------------------------------------------------
// Wire frame
// ---------------------------------------------------------------------------

/// One JSON frame as it appears on the wire, in either direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(
        default,
        deserialize_with = "string_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(
        default,
        deserialize_with = "string_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub room: Option<String>,
    /// Only populated by the server on `error` frames.
    #[serde(
        default,
        deserialize_with = "string_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub message: Option<String>,
}

/// Optional string fields accept any JSON value; non-strings read as absent.
fn string_or_none<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<serde_json::Value>::deserialize(d)? {
        Some(serde_json::Value::String(s)) => Some(s),
        _ => None,
    })
}

impl Frame {
    fn stamped(kind: &str) -> Self {
        Frame {
            kind: kind.to_string(),
            timestamp: Some(timestamp(Utc::now())),
            ..Default::default()
        }
    }

    pub fn ping() -> Self {
        Frame::stamped(kind::PING)
    }

    pub fn join_room(room: &str) -> Self {
        Frame {
            room: Some(room.to_string()),
            ..Frame::stamped(kind::JOIN_ROOM)
        }
    }

    pub fn leave_room(room: &str) -> Self {
        Frame {
            room: Some(room.to_string()),
            ..Frame::stamped(kind::LEAVE_ROOM)
        }
    }

    pub fn from_outbound(msg: OutboundMessage) -> Self {
        Frame {
            data: msg.data,
            room: msg.room,
            ..Frame::stamped(msg.kind.as_str())
        }
    }
}

/// RFC 3339 UTC with millisecond precision.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Encode / decode helpers
// ---------------------------------------------------------------------------

pub fn encode(frame: &Frame) -> Result<String, Error> {
    Ok(serde_json::to_string(frame)?)
}

/// Parse raw frame text into a [`Message`].
///
/// Anything that is not a JSON object with a non-empty string `type` is a
/// protocol error. A missing or unparsable timestamp is replaced with the
/// local receive time.
pub fn decode(text: &str) -> Result<Message, Error> {
    let frame: Frame = serde_json::from_str(text)
        .map_err(|e| Error::Protocol(format!("frame decode error: {e}")))?;
    if frame.kind.is_empty() {
        return Err(Error::Protocol("frame has an empty type".to_string()));
    }

    let timestamp = match frame.timestamp.as_deref().map(DateTime::parse_from_rfc3339) {
        Some(Ok(ts)) => ts.with_timezone(&Utc),
        Some(Err(e)) => {
            tracing::debug!(kind = %frame.kind, "unparsable frame timestamp ({e}), using receive time");
            Utc::now()
        }
        None => Utc::now(),
    };

    // A payload-less error frame gets its top-level message as payload so
    // `error` handlers see it in `data` too.
    let data = match (frame.data, frame.message.as_deref()) {
        (None, Some(message)) => Some(serde_json::json!({ "message": message })),
        (data, _) => data,
    };

    Ok(Message {
        kind: MessageKind::from(frame.kind),
        timestamp,
        data,
        room: frame.room,
        message: frame.message,
    })
}

/// Human readable text of a server `error` frame: the top-level `message`,
/// else `data.message` (or a bare string payload).
pub fn error_message(msg: &Message) -> String {
    if let Some(message) = &msg.message {
        return message.clone();
    }
    msg.data
        .as_ref()
        .and_then(|d| match d {
            serde_json::Value::String(s) => Some(s.clone()),
            other => other
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string),
        })
        .unwrap_or_else(|| UNKNOWN_SERVER_ERROR.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
