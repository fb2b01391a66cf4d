//! Client configuration: defaults, YAML loading, and validation.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::Error;

pub(crate) const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8000/ws/notifications";
pub(crate) const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3_000);
pub(crate) const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub(crate) const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(30_000);
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub(crate) const DEFAULT_ROOM: &str = "general";
pub(crate) const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

/// Configuration for a [`RealtimeClient`](crate::RealtimeClient).
///
/// Keys are camelCase and durations are milliseconds when loaded from YAML:
///
/// ```yaml
/// endpoint: wss://cases.example.org/ws/notifications
/// reconnectInterval: 3000
/// maxReconnectAttempts: 5
/// heartbeatInterval: 30000
/// defaultRoom: general
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// WebSocket endpoint (`ws://` or `wss://`). Credentials, if any, travel
    /// in the URL; this layer performs no authentication handshake.
    pub endpoint: String,
    /// Base delay between reconnect attempts.
    #[serde(with = "millis")]
    pub reconnect_interval: Duration,
    /// Consecutive failed attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Period between `ping` frames while open.
    #[serde(with = "millis")]
    pub heartbeat_interval: Duration,
    /// Upper bound on a single transport open.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Treat an open connection as dead after this long without any inbound
    /// frame. Disabled when unset.
    #[serde(with = "millis::option")]
    pub idle_timeout: Option<Duration>,
    /// Room joined automatically every time the connection opens.
    pub default_room: Option<String>,
    /// Re-join every explicitly joined room after a reconnect.
    pub rejoin_rooms: bool,
    pub backoff: Backoff,
    /// Capacity of the [`ClientEvent`](crate::ClientEvent) broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: None,
            default_room: Some(DEFAULT_ROOM.to_string()),
            rejoin_rooms: true,
            backoff: Backoff::Fixed,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_default_room(mut self, room: Option<String>) -> Self {
        self.default_room = room;
        self
    }

    pub fn with_rejoin_rooms(mut self, rejoin: bool) -> Self {
        self.rejoin_rooms = rejoin;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Parse a YAML document. Missing keys take their defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self, Error> {
        serde_yaml_ng::from_str(content).map_err(|e| Error::Config(format!("parse: {e}")))
    }

    /// Check the configuration and return the parsed endpoint.
    pub fn validate(&self) -> Result<Url, Error> {
        let url = Url::parse(&self.endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "endpoint scheme must be ws or wss, got {}",
                url.scheme()
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::Config("heartbeatInterval must be non-zero".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::Config("connectTimeout must be non-zero".into()));
        }
        if self.idle_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::Config("idleTimeout must be non-zero when set".into()));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::Config("eventChannelCapacity must be non-zero".into()));
        }
        if let Backoff::Exponential { max_interval } = self.backoff
            && max_interval < self.reconnect_interval
        {
            return Err(Error::Config(
                "backoff maxInterval must not be below reconnectInterval".into(),
            ));
        }
        Ok(url)
    }
}

/// Load and validate a client config from a YAML file.
pub async fn load(path: &Path) -> Result<ClientConfig, Error> {
    let content = tokio::fs::read_to_string(path).await?;
    let config: ClientConfig = serde_yaml_ng::from_str(&content)
        .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Reconnect backoff
// ---------------------------------------------------------------------------

/// Delay policy between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Constant `reconnectInterval` between attempts.
    #[default]
    Fixed,
    /// `reconnectInterval * 2^(attempt - 1)` capped at `max_interval`, plus
    /// up to half a `reconnectInterval` of jitter.
    Exponential {
        #[serde(rename = "maxInterval", with = "millis")]
        max_interval: Duration,
    },
}

impl Backoff {
    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn delay(&self, base: Duration, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed => base,
            Backoff::Exponential { max_interval } => {
                exponential(base, attempt, max_interval) + jitter(base / 2)
            }
        }
    }
}

fn exponential(base: Duration, attempt: u32, max: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(30);
    base.saturating_mul(1u32 << exp).min(max)
}

fn jitter(bound: Duration) -> Duration {
    let bound_ms = u64::try_from(bound.as_millis()).unwrap_or(u64::MAX);
    if bound_ms == 0 {
        return Duration::ZERO;
    }
    // Subsecond nanos from the wall clock are random enough to spread clients.
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    Duration::from_millis(u64::from(nanos) % bound_ms)
}

// ---------------------------------------------------------------------------
// Millisecond (de)serialization for durations
// ---------------------------------------------------------------------------

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    fn to_ms(d: &Duration) -> u64 {
        u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(to_ms(d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => s.serialize_some(&super::to_ms(d)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
