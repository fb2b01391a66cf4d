//! Public entry point: [`RealtimeClient`].

use std::fmt;
use std::sync::{Arc, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::Error;
use crate::config::ClientConfig;
use crate::connection::{Command, ConnectionManager, Shared};
use crate::lifecycle::{LifecycleEvent, LifecycleSignal};
use crate::rooms::RoomRegistry;
use crate::subscribe::{Subscriber, Unsubscribe};
use crate::transport::{Connector, WebSocketConnector};
use crate::types::{ClientEvent, ConnectionState, Message, MessageKind, OutboundMessage};

/// Handle to one logical realtime connection.
///
/// Cheap to clone; all clones drive the same background connection task.
/// The task closes the transport and exits once every clone (including
/// those held by [`Subscriber`]s) has been dropped.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

struct Inner {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    shared: Shared,
}

impl RealtimeClient {
    /// Create a client that connects over WebSocket.
    ///
    /// Validates `config` and spawns the connection task, but does not
    /// connect; call [`connect`](Self::connect). Must be called from within
    /// a Tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    /// Create a client over a custom [`Connector`].
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self, Error> {
        let endpoint = config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Config(format!("no Tokio runtime available: {e}")))?;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Closed);
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        let shared = Shared {
            router: Arc::default(),
            rooms: Arc::default(),
            events,
        };

        let manager = ConnectionManager::new(
            config,
            endpoint,
            connector,
            commands_rx,
            state_tx,
            shared.clone(),
        );
        runtime.spawn(manager.run());

        Ok(Self {
            inner: Arc::new(Inner {
                commands,
                state,
                shared,
            }),
        })
    }

    /// Start connecting. No-op while Connecting or Open; after an explicit
    /// disconnect or exhausted retries this starts over with a fresh
    /// attempt counter.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Tear the connection down and stop reconnecting.
    ///
    /// Returns once timers are cleared and the transport is closed.
    pub async fn disconnect(&self) {
        let (done, rx) = oneshot::channel();
        self.command(Command::Disconnect { done });
        let _ = rx.await;
    }

    /// Send a message if Open. Otherwise it is logged and dropped.
    pub fn send(&self, message: OutboundMessage) {
        self.command(Command::Send(message));
    }

    /// Record membership of `room` and send a `join_room` frame if Open.
    pub fn join_room(&self, room: impl Into<String>) {
        let room = room.into();
        self.rooms().join(&room);
        self.command(Command::JoinRoom(room));
    }

    /// Drop membership of `room` and send a `leave_room` frame if Open.
    pub fn leave_room(&self, room: impl Into<String>) {
        let room = room.into();
        self.rooms().leave(&room);
        self.command(Command::LeaveRoom(room));
    }

    /// Rooms currently recorded as joined, in join order.
    pub fn joined_rooms(&self) -> Vec<String> {
        self.rooms().rooms()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver for awaiting state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Subscribe to connection and failure events. Only events sent after
    /// this call are received.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.shared.events.subscribe()
    }

    /// Register `handler` for every inbound message of `kind`.
    ///
    /// The handler runs on the connection task and must not block.
    pub fn on_message<F>(&self, kind: impl Into<MessageKind>, handler: F) -> Unsubscribe
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = self
            .inner
            .shared
            .router
            .on_message(kind.into(), Arc::new(handler));
        Unsubscribe::new(id, Arc::downgrade(&self.inner.shared.router), None)
    }

    /// A consumer-scoped handle whose subscriptions are released on drop.
    pub fn subscriber(&self) -> Subscriber {
        Subscriber::new(self.clone())
    }

    /// Deliver a host lifecycle transition.
    pub fn lifecycle(&self, event: LifecycleEvent) {
        self.command(Command::Lifecycle(event));
    }

    /// Forward events from `signal` until it ends or the client is gone.
    ///
    /// The forwarding task does not keep the client alive.
    pub fn attach_lifecycle<S: LifecycleSignal>(&self, mut signal: S) -> JoinHandle<()> {
        let commands = self.inner.commands.downgrade();
        tokio::spawn(async move {
            while let Some(event) = signal.next_event().await {
                let Some(commands) = commands.upgrade() else {
                    break;
                };
                if commands.send(Command::Lifecycle(event)).is_err() {
                    break;
                }
            }
            tracing::debug!("Lifecycle signal detached");
        })
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    fn command(&self, cmd: Command) {
        if let Err(e) = self.inner.commands.send(cmd) {
            tracing::warn!(command = ?e.0, "Connection task is gone");
        }
    }

    fn rooms(&self) -> MutexGuard<'_, RoomRegistry> {
        self.inner
            .shared
            .rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("state", &self.state())
            .field("rooms", &self.joined_rooms())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
