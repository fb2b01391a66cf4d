//! Connection management: the background task that owns the transport,
//! the heartbeat and reconnect timers, and the connection state machine.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use url::Url;

use crate::Error;
use crate::config::ClientConfig;
use crate::lifecycle::LifecycleEvent;
use crate::protocol::{self, Frame};
use crate::rooms::RoomRegistry;
use crate::router::MessageRouter;
use crate::transport::{Connector, Transport};
use crate::types::{ClientEvent, ConnectionState, OutboundMessage};

/// Upper bound on a graceful transport close during `disconnect()`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type OpenFuture = Pin<Box<dyn Future<Output = Result<Box<dyn Transport>, Error>> + Send>>;

/// Requests from client handles to the connection task.
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect { done: oneshot::Sender<()> },
    Send(OutboundMessage),
    JoinRoom(String),
    LeaveRoom(String),
    Lifecycle(LifecycleEvent),
}

/// State shared between the connection task and client handles.
#[derive(Clone)]
pub(crate) struct Shared {
    pub router: Arc<MessageRouter>,
    pub rooms: Arc<Mutex<RoomRegistry>>,
    pub events: broadcast::Sender<ClientEvent>,
}

pub(crate) struct ConnectionManager {
    config: ClientConfig,
    endpoint: Url,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    shared: Shared,

    transport: Option<Box<dyn Transport>>,
    opening: Option<OpenFuture>,
    heartbeat: Option<Interval>,
    reconnect_at: Option<Instant>,
    idle_deadline: Option<Instant>,
    /// Rooms a `join_room` frame went out for on the current transport.
    announced: HashSet<String>,
    /// Consecutive failed reconnect attempts since the last Open.
    attempts: u32,
    /// Cleared by an explicit disconnect; gates automatic reconnects.
    should_reconnect: bool,
}

impl ConnectionManager {
    pub(crate) fn new(
        config: ClientConfig,
        endpoint: Url,
        connector: Arc<dyn Connector>,
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ConnectionState>,
        shared: Shared,
    ) -> Self {
        Self {
            config,
            endpoint,
            connector,
            commands,
            state,
            shared,
            transport: None,
            opening: None,
            heartbeat: None,
            reconnect_at: None,
            idle_deadline: None,
            announced: HashSet::new(),
            attempts: 0,
            should_reconnect: false,
        }
    }

    /// Run until every command sender is gone.
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        tracing::debug!("All client handles dropped, shutting down");
                        self.disconnect().await;
                        return;
                    }
                },

                result = poll_opening(&mut self.opening) => {
                    self.opening = None;
                    match result {
                        Ok(transport) => self.on_open(transport).await,
                        Err(e) => {
                            tracing::warn!(error = %e, "Connection attempt failed");
                            self.on_unexpected_close(Some(e.to_string()));
                        }
                    }
                }

                frame = recv_frame(&mut self.transport) => self.on_frame(frame),

                () = tick(&mut self.heartbeat) => {
                    tracing::trace!("Sending heartbeat ping");
                    self.send_frame(Frame::ping()).await;
                }

                () = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.begin_connect();
                }

                () = sleep_until_opt(self.idle_deadline) => {
                    self.idle_deadline = None;
                    tracing::warn!("No inbound frames within idle timeout");
                    self.on_unexpected_close(Some("idle timeout".to_string()));
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect => self.connect(),
            Command::Disconnect { done } => {
                self.disconnect().await;
                let _ = done.send(());
            }
            Command::Send(msg) => {
                self.send_frame(Frame::from_outbound(msg)).await;
            }
            Command::JoinRoom(room) => {
                if !self.is_open() {
                    tracing::debug!(%room, "Not connected, join deferred until next open");
                } else if self.announced.insert(room.clone()) {
                    self.send_frame(Frame::join_room(&room)).await;
                } else {
                    tracing::debug!(%room, "Join already sent on this connection");
                }
            }
            Command::LeaveRoom(room) => {
                if !self.is_open() {
                    tracing::debug!(%room, "Not connected, leave recorded locally only");
                } else if self.announced.remove(&room) {
                    self.send_frame(Frame::leave_room(&room)).await;
                } else {
                    tracing::debug!(%room, "Room was not joined on this connection");
                }
            }
            Command::Lifecycle(event) => self.on_lifecycle(event).await,
        }
    }

    async fn on_lifecycle(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Suspend => tracing::debug!("Host suspended"),
            LifecycleEvent::Resume => {
                if self.current_state() == ConnectionState::Closed && self.should_reconnect {
                    tracing::info!("Host resumed, reconnecting");
                    self.connect();
                } else {
                    tracing::debug!("Host resumed");
                }
            }
            LifecycleEvent::Terminate => {
                tracing::info!("Host terminating, disconnecting");
                self.disconnect().await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    /// Explicit connect: no-op while Connecting or Open.
    fn connect(&mut self) {
        match self.current_state() {
            ConnectionState::Connecting | ConnectionState::Open => {
                tracing::debug!("Already connecting or connected");
            }
            ConnectionState::Closed | ConnectionState::Closing => {
                self.attempts = 0;
                self.reconnect_at = None;
                self.should_reconnect = true;
                self.begin_connect();
            }
        }
    }

    fn begin_connect(&mut self) {
        if self.opening.is_some() || self.transport.is_some() {
            return;
        }
        tracing::info!(endpoint = %self.endpoint, attempt = self.attempts, "Connecting");
        self.set_state(ConnectionState::Connecting);

        let connector = Arc::clone(&self.connector);
        let endpoint = self.endpoint.clone();
        let limit = self.config.connect_timeout;
        self.opening = Some(Box::pin(async move {
            match tokio::time::timeout(limit, connector.open(&endpoint)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Transport(format!(
                    "connect timed out after {}ms",
                    limit.as_millis()
                ))),
            }
        }));
    }

    async fn on_open(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
        self.attempts = 0;
        self.set_state(ConnectionState::Open);
        tracing::info!(endpoint = %self.endpoint, "Connected");
        let _ = self.shared.events.send(ClientEvent::Connected);

        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);
        self.touch_idle();

        let rooms = self
            .rooms()
            .on_open(self.config.default_room.as_deref(), self.config.rejoin_rooms);
        for room in rooms {
            tracing::debug!(%room, "Joining room");
            self.announced.insert(room.clone());
            if !self.send_frame(Frame::join_room(&room)).await {
                break;
            }
        }
    }

    /// Transport failure, server close, failed open, or idle timeout.
    fn on_unexpected_close(&mut self, reason: Option<String>) {
        let was_open = self.current_state() == ConnectionState::Open;
        self.clear_connection();
        self.set_state(ConnectionState::Closed);
        if was_open {
            let _ = self.shared.events.send(ClientEvent::Disconnected { reason });
        }

        if !self.should_reconnect {
            return;
        }
        if self.attempts < self.config.max_reconnect_attempts {
            self.attempts += 1;
            let delay = self
                .config
                .backoff
                .delay(self.config.reconnect_interval, self.attempts);
            tracing::info!(
                attempt = self.attempts,
                max = self.config.max_reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );
            self.reconnect_at = Some(Instant::now() + delay);
        } else {
            tracing::error!(
                attempts = self.attempts,
                "Giving up after {} reconnect attempts",
                self.attempts
            );
            let _ = self.shared.events.send(ClientEvent::ReconnectExhausted {
                attempts: self.attempts,
            });
        }
    }

    async fn disconnect(&mut self) {
        self.should_reconnect = false;
        self.attempts = 0;
        let transport = self.transport.take();
        self.clear_connection();

        let Some(mut transport) = transport else {
            self.set_state(ConnectionState::Closed);
            return;
        };
        self.set_state(ConnectionState::Closing);
        match tokio::time::timeout(CLOSE_TIMEOUT, transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "Error while closing transport"),
            Err(_) => tracing::warn!("Transport close timed out"),
        }
        drop(transport);
        self.set_state(ConnectionState::Closed);
        tracing::info!("Disconnected");
        let _ = self
            .shared
            .events
            .send(ClientEvent::Disconnected { reason: None });
    }

    /// Drop the transport, any in-flight open, and every timer.
    fn clear_connection(&mut self) {
        self.transport = None;
        self.opening = None;
        self.heartbeat = None;
        self.reconnect_at = None;
        self.idle_deadline = None;
        self.announced.clear();
    }

    // -----------------------------------------------------------------------
    // I/O
    // -----------------------------------------------------------------------

    fn on_frame(&mut self, frame: Option<Result<String, Error>>) {
        match frame {
            Some(Ok(text)) => {
                self.touch_idle();
                match protocol::decode(&text) {
                    Ok(msg) => self.shared.router.route(&msg, &self.shared.events),
                    Err(e) => tracing::warn!(error = %e, "Dropping malformed frame"),
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Transport error");
                self.on_unexpected_close(Some(e.to_string()));
            }
            None => {
                tracing::info!("Server closed the connection");
                self.on_unexpected_close(None);
            }
        }
    }

    /// Write one frame if Open. Returns `false` if the frame was not sent.
    async fn send_frame(&mut self, frame: Frame) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            tracing::warn!(kind = %frame.kind, "Not connected, dropping outbound frame");
            return false;
        };
        let text = match protocol::encode(&frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(kind = %frame.kind, error = %e, "Failed to encode frame");
                return false;
            }
        };
        match transport.send(text).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(kind = %frame.kind, error = %e, "Send failed");
                self.on_unexpected_close(Some(e.to_string()));
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn is_open(&self) -> bool {
        self.current_state() == ConnectionState::Open
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            tracing::debug!(from = ?*state, to = ?next, "Connection state changed");
            *state = next;
            true
        });
    }

    fn touch_idle(&mut self) {
        self.idle_deadline = self.config.idle_timeout.map(|t| Instant::now() + t);
    }

    fn rooms(&self) -> MutexGuard<'_, RoomRegistry> {
        self.shared
            .rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// Each helper stays pending forever when its source is absent, so the
// select! branch is effectively disabled.

async fn poll_opening(opening: &mut Option<OpenFuture>) -> Result<Box<dyn Transport>, Error> {
    match opening {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn recv_frame(transport: &mut Option<Box<dyn Transport>>) -> Option<Result<String, Error>> {
    match transport {
        Some(t) => t.recv().await,
        None => std::future::pending().await,
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
