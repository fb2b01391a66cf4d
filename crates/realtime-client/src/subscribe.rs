//! Consumer-scoped subscriptions: [`Subscriber`] and [`Unsubscribe`].

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::client::RealtimeClient;
use crate::router::{HandlerId, MessageRouter};
use crate::types::{Message, MessageKind, OutboundMessage};

type Owned = Mutex<HashSet<HandlerId>>;

fn lock(owned: &Owned) -> MutexGuard<'_, HashSet<HandlerId>> {
    owned.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One consumer's view of a [`RealtimeClient`].
///
/// Every handler registered through a `Subscriber` is removed when the
/// subscriber is dropped, so a component that goes away cannot leak
/// handlers. Consumers never interfere: each receives every message of the
/// kinds it subscribed to until it unsubscribes.
pub struct Subscriber {
    client: RealtimeClient,
    owned: Arc<Owned>,
}

impl Subscriber {
    pub(crate) fn new(client: RealtimeClient) -> Self {
        Self {
            client,
            owned: Arc::default(),
        }
    }

    /// Register `handler` for messages of `kind`, owned by this subscriber.
    pub fn subscribe<F>(&self, kind: impl Into<MessageKind>, handler: F) -> Unsubscribe
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let router = &self.client.shared().router;
        // Hold the owner lock across registration so a concurrent
        // release_all cannot miss the new id.
        let mut owned = lock(&self.owned);
        let id = router.on_message(kind.into(), Arc::new(handler));
        owned.insert(id);
        Unsubscribe::new(id, Arc::downgrade(router), Some(Arc::downgrade(&self.owned)))
    }

    /// Number of handlers this subscriber still owns.
    pub fn subscription_count(&self) -> usize {
        lock(&self.owned).len()
    }

    /// Remove every handler this subscriber owns.
    pub fn release_all(&self) {
        let ids: Vec<HandlerId> = lock(&self.owned).drain().collect();
        let router = &self.client.shared().router;
        for id in &ids {
            router.remove(*id);
        }
        if !ids.is_empty() {
            tracing::debug!(released = ids.len(), "Released subscriptions");
        }
    }

    pub fn client(&self) -> &RealtimeClient {
        &self.client
    }

    pub fn connect(&self) {
        self.client.connect();
    }

    pub async fn disconnect(&self) {
        self.client.disconnect().await;
    }

    pub fn send(&self, message: OutboundMessage) {
        self.client.send(message);
    }

    pub fn join_room(&self, room: impl Into<String>) {
        self.client.join_room(room);
    }

    pub fn leave_room(&self, room: impl Into<String>) {
        self.client.leave_room(room);
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}

/// Removes one handler registration.
///
/// Dropping this value leaves the handler registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it. Repeated calls are
/// no-ops.
#[must_use = "the handler stays registered until unsubscribe() is called"]
pub struct Unsubscribe {
    id: HandlerId,
    router: Weak<MessageRouter>,
    owner: Option<Weak<Owned>>,
    released: AtomicBool,
}

impl Unsubscribe {
    pub(crate) fn new(id: HandlerId, router: Weak<MessageRouter>, owner: Option<Weak<Owned>>) -> Self {
        Self {
            id,
            router,
            owner,
            released: AtomicBool::new(false),
        }
    }

    /// Remove the handler. Once this returns it is never invoked by a later
    /// dispatch.
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(owned) = self.owner.as_ref().and_then(Weak::upgrade) {
            lock(&owned).remove(&self.id);
        }
        if let Some(router) = self.router.upgrade() {
            router.remove(self.id);
        }
    }

    /// Whether the handler is still registered.
    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::SeqCst)
            && self
                .router
                .upgrade()
                .is_some_and(|router| router.is_registered(self.id))
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("active", &self.is_active())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
