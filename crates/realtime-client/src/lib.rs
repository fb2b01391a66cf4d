//! Realtime notification client for a JSON-over-WebSocket push server.
//!
//! Maintains a single logical connection with automatic reconnection,
//! heartbeat keep-alive, room-scoped membership and typed dispatch of
//! inbound messages to any number of independently (un)registering
//! consumers.
//!
//! # Features
//! - Fixed-interval reconnection (exponential backoff with jitter opt-in)
//! - Periodic `ping` heartbeats and optional idle detection
//! - Default room joined on every open; explicitly joined rooms replayed
//! - Per-consumer [`Subscriber`] handles whose handlers are released on drop
//! - Host lifecycle signals (suspend / resume / terminate)
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), realtime_client::Error> {
//! use realtime_client::{ClientConfig, ClientEvent, MessageKind, RealtimeClient};
//!
//! let client = RealtimeClient::new(ClientConfig::new("wss://cases.example.org/ws/notifications"))?;
//! let alerts = client.subscriber();
//! let _sub = alerts.subscribe(MessageKind::SystemAlert, |msg| {
//!     println!("alert in {:?}: {:?}", msg.room, msg.data);
//! });
//!
//! let mut events = client.events();
//! client.connect();
//! client.join_room("alerts");
//!
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         ClientEvent::ServerError { message } => eprintln!("server: {message}"),
//!         ClientEvent::ReconnectExhausted { .. } => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod client;
pub mod config;
mod connection;
mod lifecycle;
pub mod protocol;
mod rooms;
mod router;
mod subscribe;
#[cfg(test)]
mod testutil;
mod transport;
mod types;

pub use client::RealtimeClient;
pub use config::{Backoff, ClientConfig};
pub use lifecycle::{LifecycleEvent, LifecycleSignal};
pub use subscribe::{Subscriber, Unsubscribe};
pub use transport::{Connector, Transport, WebSocketConnector};
pub use types::{
    ClientEvent, ConnectionEvent, ConnectionState, Error, Message, MessageKind, OutboundMessage,
};
