//! Inbound message routing: system-kind interception and per-kind handler
//! dispatch.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use crate::protocol;
use crate::types::{ClientEvent, Message, MessageKind};

/// Consumer callback for one message kind.
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Identity of one handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HandlerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    /// Handlers per kind, in registration order.
    by_kind: HashMap<MessageKind, Vec<(HandlerId, Handler)>>,
    kinds: HashMap<HandlerId, MessageKind>,
}

#[derive(Default)]
pub(crate) struct MessageRouter {
    registry: Mutex<Registry>,
}

impl MessageRouter {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn on_message(&self, kind: MessageKind, handler: Handler) -> HandlerId {
        let kind = kind.normalized();
        let mut reg = self.lock();
        reg.next_id += 1;
        let id = HandlerId(reg.next_id);
        reg.kinds.insert(id, kind.clone());
        reg.by_kind.entry(kind).or_default().push((id, handler));
        id
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub(crate) fn remove(&self, id: HandlerId) -> bool {
        let mut reg = self.lock();
        let Some(kind) = reg.kinds.remove(&id) else {
            return false;
        };
        if let Some(handlers) = reg.by_kind.get_mut(&kind) {
            handlers.retain(|(hid, _)| *hid != id);
            if handlers.is_empty() {
                reg.by_kind.remove(&kind);
            }
        }
        true
    }

    pub(crate) fn is_registered(&self, id: HandlerId) -> bool {
        self.lock().kinds.contains_key(&id)
    }

    #[cfg(test)]
    pub(crate) fn handler_count(&self, kind: &MessageKind) -> usize {
        let kind = kind.clone().normalized();
        self.lock().by_kind.get(&kind).map_or(0, Vec::len)
    }

    /// Handle one inbound message: intercept system kinds, dispatch the rest.
    pub(crate) fn route(&self, msg: &Message, events: &broadcast::Sender<ClientEvent>) {
        match msg.kind {
            MessageKind::ConnectionEstablished => {
                tracing::info!(data = ?msg.data, "Server confirmed connection");
            }
            MessageKind::Pong => {
                tracing::trace!("Heartbeat acknowledged");
            }
            MessageKind::Ping => {
                tracing::trace!("Ignoring server ping");
            }
            MessageKind::Error => {
                let message = protocol::error_message(msg);
                tracing::warn!(%message, "Server reported an error");
                let _ = events.send(ClientEvent::ServerError { message });
                self.dispatch(msg);
            }
            _ => {
                if self.dispatch(msg) == 0 {
                    tracing::trace!(kind = %msg.kind, "No handlers registered");
                }
            }
        }
    }

    /// Invoke every handler registered for `msg.kind`, in registration order,
    /// against a snapshot taken now. Returns the number of handlers invoked.
    ///
    /// Handlers may (un)register during dispatch; that only affects later
    /// dispatches. A panicking handler is logged and skipped.
    pub(crate) fn dispatch(&self, msg: &Message) -> usize {
        let snapshot: Vec<Handler> = self
            .lock()
            .by_kind
            .get(&msg.kind)
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in &snapshot {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(msg))) {
                tracing::error!(
                    kind = %msg.kind,
                    "Message handler panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
        snapshot.len()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
