//! Scripted in-memory transport for connection and client tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::Error;
use crate::transport::{Connector, Transport};

#[derive(Default)]
struct Counters {
    opens: usize,
    fail_next: usize,
    open_delay: Duration,
    live: usize,
    max_live: usize,
}

/// Connector that hands the server side of every opened transport to the
/// test as a [`MockPeer`].
pub(crate) struct MockConnector {
    counters: Arc<Mutex<Counters>>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockConnector {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = MockConnector {
            counters: Arc::default(),
            peers,
        };
        (Arc::new(connector), rx)
    }

    /// Total number of `open` calls, failed ones included.
    pub(crate) fn opens(&self) -> usize {
        self.counters.lock().unwrap().opens
    }

    /// Largest number of transports that were alive at the same time.
    pub(crate) fn max_live(&self) -> usize {
        self.counters.lock().unwrap().max_live
    }

    /// Make the next `n` opens fail.
    pub(crate) fn fail_next(&self, n: usize) {
        self.counters.lock().unwrap().fail_next = n;
    }

    pub(crate) fn set_open_delay(&self, delay: Duration) {
        self.counters.lock().unwrap().open_delay = delay;
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, _endpoint: &Url) -> Result<Box<dyn Transport>, Error> {
        let (delay, fail) = {
            let mut c = self.counters.lock().unwrap();
            c.opens += 1;
            let fail = c.fail_next > 0;
            if fail {
                c.fail_next -= 1;
            }
            (c.open_delay, fail)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(Error::Transport("connection refused".into()));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        {
            let mut c = self.counters.lock().unwrap();
            c.live += 1;
            c.max_live = c.max_live.max(c.live);
        }
        let _ = self.peers.send(MockPeer {
            inbound: inbound_tx,
            sent: outbound_rx,
            closed: Arc::clone(&closed),
        });
        Ok(Box::new(MockTransport {
            inbound: inbound_rx,
            outbound: outbound_tx,
            closed,
            counters: Arc::clone(&self.counters),
        }))
    }
}

enum Inbound {
    Text(String),
    Fail(String),
}

struct MockTransport {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
    counters: Arc<Mutex<Counters>>,
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        let mut c = self.counters.lock().unwrap();
        c.live = c.live.saturating_sub(1);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: String) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport("send on closed transport".into()));
        }
        self.outbound
            .send(text)
            .map_err(|_| Error::Transport("peer gone".into()))
    }

    async fn recv(&mut self) -> Option<Result<String, Error>> {
        match self.inbound.recv().await? {
            Inbound::Text(text) => Some(Ok(text)),
            Inbound::Fail(reason) => Some(Err(Error::Transport(reason))),
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Server side of one mock transport. Dropping it ends the client's stream.
pub(crate) struct MockPeer {
    inbound: mpsc::UnboundedSender<Inbound>,
    sent: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl MockPeer {
    pub(crate) fn push(&self, frame: serde_json::Value) {
        self.push_raw(&frame.to_string());
    }

    pub(crate) fn push_raw(&self, text: &str) {
        let _ = self.inbound.send(Inbound::Text(text.to_string()));
    }

    /// Break the transport with a receive error.
    pub(crate) fn fail(&self, reason: &str) {
        let _ = self.inbound.send(Inbound::Fail(reason.to_string()));
    }

    /// Next frame the client wrote, as JSON.
    pub(crate) async fn next_sent(&mut self) -> serde_json::Value {
        let text = self.sent.recv().await.expect("client transport dropped");
        serde_json::from_str(&text).unwrap()
    }

    /// Everything written so far that has not been read yet.
    pub(crate) fn drain_sent(&mut self) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.sent.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }

    /// Whether the client closed this transport gracefully.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// `(type, room)` of a sent frame.
pub(crate) fn kind_and_room(frame: &serde_json::Value) -> (String, Option<String>) {
    (
        frame["type"].as_str().unwrap_or_default().to_string(),
        frame["room"].as_str().map(str::to_string),
    )
}
