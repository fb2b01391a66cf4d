//! Public types for the realtime-client crate.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio_tungstenite::tungstenite;

use crate::protocol::kind;

/// Tag identifying what a frame carries.
///
/// Known tags map to dedicated variants; anything else is kept verbatim in
/// [`MessageKind::Custom`]. Converting from a string always normalises, so
/// `MessageKind::from("new_email") == MessageKind::NewEmail`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    // System kinds, intercepted or produced by the client itself.
    ConnectionEstablished,
    Ping,
    Pong,
    Error,
    JoinRoom,
    LeaveRoom,
    // Application kinds.
    NewEmail,
    NewReferral,
    ReferralUpdated,
    SystemAlert,
    Statistics,
    ProcessingStatus,
    Custom(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::ConnectionEstablished => kind::CONNECTION_ESTABLISHED,
            MessageKind::Ping => kind::PING,
            MessageKind::Pong => kind::PONG,
            MessageKind::Error => kind::ERROR,
            MessageKind::JoinRoom => kind::JOIN_ROOM,
            MessageKind::LeaveRoom => kind::LEAVE_ROOM,
            MessageKind::NewEmail => kind::NEW_EMAIL,
            MessageKind::NewReferral => kind::NEW_REFERRAL,
            MessageKind::ReferralUpdated => kind::REFERRAL_UPDATED,
            MessageKind::SystemAlert => kind::SYSTEM_ALERT,
            MessageKind::Statistics => kind::STATISTICS,
            MessageKind::ProcessingStatus => kind::PROCESSING_STATUS,
            MessageKind::Custom(tag) => tag.as_str(),
        }
    }

    /// Reserved protocol kinds that the router or connection manager handle.
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            MessageKind::ConnectionEstablished
                | MessageKind::Ping
                | MessageKind::Pong
                | MessageKind::Error
                | MessageKind::JoinRoom
                | MessageKind::LeaveRoom
        )
    }

    /// Collapse a `Custom` tag that names a known kind into that variant.
    pub(crate) fn normalized(self) -> Self {
        match self {
            MessageKind::Custom(tag) => MessageKind::from(tag.as_str()),
            other => other,
        }
    }
}

impl From<&str> for MessageKind {
    fn from(tag: &str) -> Self {
        match tag {
            kind::CONNECTION_ESTABLISHED => MessageKind::ConnectionEstablished,
            kind::PING => MessageKind::Ping,
            kind::PONG => MessageKind::Pong,
            kind::ERROR => MessageKind::Error,
            kind::JOIN_ROOM => MessageKind::JoinRoom,
            kind::LEAVE_ROOM => MessageKind::LeaveRoom,
            kind::NEW_EMAIL => MessageKind::NewEmail,
            kind::NEW_REFERRAL => MessageKind::NewReferral,
            kind::REFERRAL_UPDATED => MessageKind::ReferralUpdated,
            kind::SYSTEM_ALERT => MessageKind::SystemAlert,
            kind::STATISTICS => MessageKind::Statistics,
            kind::PROCESSING_STATUS => MessageKind::ProcessingStatus,
            other => MessageKind::Custom(other.to_string()),
        }
    }
}

impl From<String> for MessageKind {
    fn from(tag: String) -> Self {
        MessageKind::from(tag.as_str())
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message received from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    /// Server timestamp, or local receive time when the frame had none.
    pub timestamp: DateTime<Utc>,
    pub data: Option<serde_json::Value>,
    pub room: Option<String>,
    /// Top-level `message` text, sent by the server on `error` frames.
    pub message: Option<String>,
}

impl Message {
    /// Deserialize the payload into a typed value. A missing payload is
    /// treated as JSON `null`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let value = self.data.clone().unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(value)?)
    }
}

/// A message to send to the server. The timestamp is added on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub kind: MessageKind,
    pub data: Option<serde_json::Value>,
    pub room: Option<String>,
}

impl OutboundMessage {
    pub fn new(kind: impl Into<MessageKind>) -> Self {
        Self {
            kind: kind.into(),
            data: None,
            room: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }
}

/// Lifecycle state of the single logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Open,
    Closing,
}

/// Delivered on every Closed <-> Open transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub connected: bool,
}

/// Events broadcast to observers of a [`RealtimeClient`](crate::RealtimeClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The connection entered the Open state.
    Connected,
    /// The connection left the Open state, either on request or unexpectedly.
    Disconnected { reason: Option<String> },
    /// The server sent an `error` frame. The connection stays open.
    ServerError { message: String },
    /// Automatic reconnection gave up. Only an explicit `connect()` retries.
    ReconnectExhausted { attempts: u32 },
}

impl ClientEvent {
    pub fn connection_event(&self) -> Option<ConnectionEvent> {
        match self {
            ClientEvent::Connected => Some(ConnectionEvent { connected: true }),
            ClientEvent::Disconnected { .. } => Some(ConnectionEvent { connected: false }),
            _ => None,
        }
    }
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed frame: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}
