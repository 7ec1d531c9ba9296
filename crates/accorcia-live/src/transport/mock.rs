//! In-memory transport for tests.
//!
//! Records every connect/subscribe/unsubscribe/disconnect, lets tests inject
//! frames into the live connection, drop it, fail connects, or hold them open.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};

use super::{
    ConnectHeaders, Link, SubscriptionHandle, Transport, TransportConnection, TransportError,
    TransportEvent,
};

/// A recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Connect { bearer: String },
    Subscribe { topic: String, handle: String },
    Unsubscribe { handle: String },
    Disconnect { connection: u64 },
}

#[derive(Default)]
struct MockState {
    calls: Vec<MockCall>,
    connects: usize,
    fail_next: usize,
    next_connection: u64,
    live: Option<LiveConnection>,
}

struct LiveConnection {
    id: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
    /// topic -> handle for subscriptions on this connection.
    subscriptions: HashMap<String, SubscriptionHandle>,
}

/// Shared handle to the fake transport; clones observe the same state.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    changed: Arc<watch::Sender<u64>>,
    gate: Arc<watch::Sender<bool>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            changed: Arc::new(watch::channel(0).0),
            gate: Arc::new(watch::channel(true).0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.changed.send_modify(|v| *v += 1);
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.lock().fail_next = n;
    }

    /// While held, connect attempts wait before completing.
    pub fn hold_connects(&self, held: bool) {
        self.gate.send_replace(!held);
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().live.is_some()
    }

    /// Topics subscribed on the live connection, sorted.
    pub fn active_topics(&self) -> Vec<String> {
        let state = self.lock();
        let mut topics: Vec<String> = state
            .live
            .as_ref()
            .map(|live| live.subscriptions.keys().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    /// Handle currently used for `topic` on the live connection.
    pub fn handle_for(&self, topic: &str) -> Option<SubscriptionHandle> {
        self.lock()
            .live
            .as_ref()
            .and_then(|live| live.subscriptions.get(topic).cloned())
    }

    /// Deliver a frame on `topic` through its live subscription.
    /// Returns `false` if the topic is not subscribed.
    pub fn inject(&self, topic: &str, body: &str) -> bool {
        let Some(handle) = self.handle_for(topic) else {
            return false;
        };
        self.inject_with_handle(&handle, topic, body)
    }

    /// Deliver a frame tagged with an arbitrary handle.
    pub fn inject_with_handle(&self, handle: &SubscriptionHandle, topic: &str, body: &str) -> bool {
        let state = self.lock();
        let Some(live) = state.live.as_ref() else {
            return false;
        };
        live.events
            .send(TransportEvent::Message {
                handle: handle.clone(),
                topic: topic.to_string(),
                body: body.to_string(),
            })
            .is_ok()
    }

    /// Simulate the server dropping the live connection.
    pub fn drop_connection(&self, reason: &str) {
        let live = self.lock().live.take();
        if let Some(live) = live {
            let _ = live.events.send(TransportEvent::Closed {
                reason: reason.to_string(),
            });
        }
        self.bump();
    }

    /// Wait until `pred` holds for the recorded state.
    pub async fn wait_until(&self, pred: impl Fn(&Self) -> bool) {
        let mut rx = self.changed.subscribe();
        loop {
            if pred(self) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Transport for MockTransport {
    type Connection = MockConnection;

    async fn connect(&self, headers: ConnectHeaders) -> Result<Link<MockConnection>, TransportError> {
        let mut gate = self.gate.subscribe();
        {
            let mut state = self.lock();
            state.connects += 1;
            state.calls.push(MockCall::Connect {
                bearer: headers.bearer.as_str().to_string(),
            });
        }
        self.bump();
        let _ = gate.wait_for(|open| *open).await;

        let mut state = self.lock();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            drop(state);
            self.bump();
            return Err(TransportError::Connection("mock connect refused".into()));
        }

        state.next_connection += 1;
        let id = state.next_connection;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        state.live = Some(LiveConnection {
            id,
            events: events_tx,
            subscriptions: HashMap::new(),
        });
        drop(state);
        self.bump();

        Ok(Link {
            connection: MockConnection {
                id,
                next_sub: 0,
                transport: self.clone(),
            },
            events: events_rx,
        })
    }
}

/// Connection half handed to the multiplexer.
pub struct MockConnection {
    id: u64,
    next_sub: u64,
    transport: MockTransport,
}

impl MockConnection {
    fn with_live<R>(&self, f: impl FnOnce(&mut LiveConnection) -> R) -> Option<R> {
        let mut state = self.transport.lock();
        state.live.as_mut().filter(|live| live.id == self.id).map(f)
    }
}

impl TransportConnection for MockConnection {
    fn subscribe(&mut self, topic: &str) -> Result<SubscriptionHandle, TransportError> {
        let handle = SubscriptionHandle::new(format!("mock-{}-{}", self.id, self.next_sub));
        self.next_sub += 1;
        self.with_live(|live| {
            live.subscriptions.insert(topic.to_string(), handle.clone());
        })
        .ok_or(TransportError::Closed)?;
        self.transport.lock().calls.push(MockCall::Subscribe {
            topic: topic.to_string(),
            handle: handle.to_string(),
        });
        self.transport.bump();
        Ok(handle)
    }

    fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> Result<(), TransportError> {
        self.with_live(|live| live.subscriptions.retain(|_, h| h != handle))
            .ok_or(TransportError::Closed)?;
        self.transport.lock().calls.push(MockCall::Unsubscribe {
            handle: handle.to_string(),
        });
        self.transport.bump();
        Ok(())
    }

    fn disconnect(self) {
        {
            let mut state = self.transport.lock();
            if state.live.as_ref().is_some_and(|live| live.id == self.id) {
                state.live = None;
            }
            state.calls.push(MockCall::Disconnect {
                connection: self.id,
            });
        }
        self.transport.bump();
    }
}
