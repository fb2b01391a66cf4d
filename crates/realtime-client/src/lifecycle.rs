//! Host application lifecycle signals.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Application lifecycle transitions the client reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// App moved to the background. Logged only; the connection stays up.
    Suspend,
    /// App is active again. Reconnects if closed and not explicitly
    /// disconnected.
    Resume,
    /// App is going away. Same as `disconnect()`.
    Terminate,
}

/// A source of lifecycle events, polled until it returns `None`.
#[async_trait]
pub trait LifecycleSignal: Send + 'static {
    async fn next_event(&mut self) -> Option<LifecycleEvent>;
}

#[async_trait]
impl LifecycleSignal for mpsc::Receiver<LifecycleEvent> {
    async fn next_event(&mut self) -> Option<LifecycleEvent> {
        self.recv().await
    }
}

#[async_trait]
impl LifecycleSignal for mpsc::UnboundedReceiver<LifecycleEvent> {
    async fn next_event(&mut self) -> Option<LifecycleEvent> {
        self.recv().await
    }
}
