//! Real-time multiplexer: one transport connection shared by many topics.
//!
//! All connection and registry state lives in a single actor task. Callers
//! talk to it through [`RealtimeMultiplexer`], which only queues commands, so
//! `subscribe`/`unsubscribe` never block and never fail.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, trace, warn};

use super::config::{RealtimeConfig, ReconnectPolicy};
use super::registry::{Delivery, Release, Sink, SubscriptionRegistry};
use super::state::{ConnectionState, MultiplexerStats};
use super::stream::MessageStream;
use crate::session::{AuthState, BearerToken, SessionManager};
use crate::transport::{
    ConnectHeaders, Link, SubscriptionHandle, Transport, TransportConnection, TransportError,
    TransportEvent,
};

enum Command {
    Subscribe { topic: String, sink: Sink },
    Unsubscribe { topic: String },
    UnsubscribeAll,
    Stats { reply: oneshot::Sender<MultiplexerStats> },
    Shutdown { done: oneshot::Sender<()> },
}

/// Handle to the multiplexer actor. Cloning is cheap; the actor stops when
/// the last handle is dropped or [`shutdown`](Self::shutdown) is called.
#[derive(Clone)]
pub struct RealtimeMultiplexer {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    /// Bumped by `unsubscribe_all`; streams from an older epoch stop yielding.
    cutoff: Arc<AtomicU64>,
}

impl RealtimeMultiplexer {
    /// Start the actor. It follows `session`'s authentication state from now on.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<T: Transport>(transport: T, session: &SessionManager, config: RealtimeConfig) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            transport: Arc::new(transport),
            policy: config.reconnect,
            auth: session.authentication_state(),
            auth_open: true,
            commands: commands_rx,
            state_tx,
            registry: SubscriptionRegistry::default(),
            serving: None,
            link: None,
            attempt: None,
            next_attempt: 0,
            attempts_tx,
            attempts_rx,
            retry_at: None,
            failures: 0,
        };
        tokio::spawn(actor.run());

        Self {
            commands,
            state,
            cutoff: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Attach a consumer to `topic`. The stream sees messages published from
    /// now on; nothing arrives while disconnected.
    pub fn subscribe(&self, topic: impl Into<String>) -> MessageStream {
        let topic = topic.into();
        let (sink, rx) = mpsc::unbounded_channel();
        let queued = self.commands.send(Command::Subscribe {
            topic: topic.clone(),
            sink,
        });
        if queued.is_err() {
            debug!(topic, "Multiplexer stopped, stream ends immediately");
        }
        // Read after queueing: a racing unsubscribe_all either runs before the
        // attach in the actor or cuts this stream off.
        let epoch = self.cutoff.load(Ordering::Acquire);
        MessageStream::new(topic, rx, epoch, Arc::clone(&self.cutoff))
    }

    /// Release one consumer reference to `topic`.
    pub fn unsubscribe(&self, topic: &str) {
        let _ = self.commands.send(Command::Unsubscribe {
            topic: topic.to_string(),
        });
    }

    /// Drop every topic regardless of reference counts. Existing streams stop
    /// yielding immediately.
    pub fn unsubscribe_all(&self) {
        self.cutoff.fetch_add(1, Ordering::AcqRel);
        let _ = self.commands.send(Command::UnsubscribeAll);
    }

    /// Replay-latest view of the connection state.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub async fn stats(&self) -> MultiplexerStats {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stats { reply }).is_err() {
            return MultiplexerStats::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Stop the actor, close the connection and end every stream.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
    }
}

impl std::fmt::Debug for RealtimeMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeMultiplexer")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

struct PendingAttempt {
    id: u64,
    task: JoinHandle<()>,
}

struct AttemptOutcome<C> {
    id: u64,
    result: Result<Link<C>, TransportError>,
}

struct Actor<T: Transport> {
    transport: Arc<T>,
    policy: ReconnectPolicy,
    auth: watch::Receiver<AuthState>,
    auth_open: bool,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    registry: SubscriptionRegistry,
    /// Login generation the current connection work belongs to.
    serving: Option<u64>,
    link: Option<Link<T::Connection>>,
    attempt: Option<PendingAttempt>,
    next_attempt: u64,
    attempts_tx: mpsc::UnboundedSender<AttemptOutcome<T::Connection>>,
    attempts_rx: mpsc::UnboundedReceiver<AttemptOutcome<T::Connection>>,
    retry_at: Option<Instant>,
    /// Consecutive failed attempts since the last successful connect.
    failures: u32,
}

impl<T: Transport> Actor<T> {
    async fn run(mut self) {
        let initial = self.auth.borrow_and_update().clone();
        self.on_auth(&initial);

        let done = loop {
            // Auth first: a logout must win over frames already queued.
            tokio::select! {
                biased;

                changed = self.auth.changed(), if self.auth_open => {
                    if changed.is_err() {
                        self.auth_open = false;
                        self.disconnect("session manager dropped");
                        continue;
                    }
                    let auth = self.auth.borrow_and_update().clone();
                    self.on_auth(&auth);
                }
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => {
                        if let Some(done) = self.on_command(cmd) {
                            break Some(done);
                        }
                    }
                    None => break None,
                },
                Some(outcome) = self.attempts_rx.recv() => self.on_attempt(outcome),
                event = next_event(self.link.as_mut()) => self.on_event(event),
                () = retry_delay(self.retry_at) => self.on_retry(),
            }
        };

        self.disconnect("shutdown");
        self.registry.clear();
        info!("Real-time multiplexer stopped");
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    fn on_auth(&mut self, auth: &AuthState) {
        if !auth.is_authenticated() {
            self.disconnect("logged out");
            return;
        }
        if self.serving == Some(auth.generation) {
            return;
        }
        let Some(bearer) = auth.token.clone() else {
            warn!(generation = auth.generation, "Authenticated state without a token");
            self.disconnect("missing credential");
            return;
        };
        if self.serving.is_some() {
            info!(generation = auth.generation, "New login supersedes the current connection");
        }
        self.close_link();
        self.serving = Some(auth.generation);
        self.failures = 0;
        self.start_connect(bearer);
    }

    /// Returns the acknowledgement channel when asked to shut down.
    fn on_command(&mut self, cmd: Command) -> Option<oneshot::Sender<()>> {
        match cmd {
            Command::Subscribe { topic, sink } => {
                let fresh = self.registry.attach(&topic, sink);
                debug!(topic, fresh, "Consumer attached");
                if fresh {
                    self.activate(&topic);
                }
            }
            Command::Unsubscribe { topic } => match self.registry.release(&topic) {
                Release::Removed(handle) => {
                    if let Some(handle) = handle {
                        self.release_handle(&handle);
                    }
                    debug!(topic, "Topic released");
                }
                Release::Retained(consumers) => debug!(topic, consumers, "Consumer detached"),
                Release::Unknown => debug!(topic, "Unsubscribe for unknown topic"),
            },
            Command::UnsubscribeAll => {
                let handles = self.registry.clear();
                for handle in &handles {
                    self.release_handle(handle);
                }
                info!(released = handles.len(), "Cleared all subscriptions");
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.registry.stats());
            }
            Command::Shutdown { done } => return Some(done),
        }
        None
    }

    fn on_attempt(&mut self, outcome: AttemptOutcome<T::Connection>) {
        if self.attempt.as_ref().map(|a| a.id) != Some(outcome.id) {
            debug!(attempt = outcome.id, "Discarding stale connect result");
            if let Ok(link) = outcome.result {
                link.connection.disconnect();
            }
            return;
        }
        self.attempt = None;
        match outcome.result {
            Ok(link) => self.on_connected(link),
            Err(e) => {
                warn!(error = %e, attempt = outcome.id, "Real-time connect failed");
                self.schedule_retry();
            }
        }
    }

    fn on_connected(&mut self, link: Link<T::Connection>) {
        self.failures = 0;
        self.link = Some(link);
        self.set_state(ConnectionState::Connected);

        let topics = self.registry.desired_topics();
        info!(topics = topics.len(), "Real-time connection established");
        for topic in topics {
            if !self.activate(&topic) {
                return;
            }
        }
    }

    fn on_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message {
                handle,
                topic,
                body,
            }) => self.route(&handle, &topic, &body),
            Some(TransportEvent::Closed { reason }) => self.connection_lost(&reason),
            None => self.connection_lost("event channel closed"),
        }
    }

    fn on_retry(&mut self) {
        self.retry_at = None;
        let auth = self.auth.borrow().clone();
        match auth.token {
            Some(bearer) if auth.is_authenticated() && self.serving == Some(auth.generation) => {
                self.start_connect(bearer);
            }
            _ => self.disconnect("not authenticated at retry"),
        }
    }

    fn route(&mut self, handle: &SubscriptionHandle, topic: &str, body: &str) {
        let payload: Value = match serde_json::from_str(body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic, error = %e, "Dropping undecodable message");
                return;
            }
        };
        match self.registry.deliver(handle, topic, &payload) {
            Delivery::Delivered(consumers) => trace!(topic, consumers, "Delivered message"),
            Delivery::Stale => debug!(topic, %handle, "Dropping message for inactive subscription"),
        }
    }

    fn start_connect(&mut self, bearer: BearerToken) {
        self.next_attempt += 1;
        let id = self.next_attempt;
        let transport = Arc::clone(&self.transport);
        let results = self.attempts_tx.clone();
        let headers = ConnectHeaders { bearer };
        let task = tokio::spawn(async move {
            let result = transport.connect(headers).await;
            let _ = results.send(AttemptOutcome { id, result });
        });
        self.attempt = Some(PendingAttempt { id, task });
        self.set_state(ConnectionState::Connecting);
        debug!(attempt = id, "Connecting");
    }

    /// Subscribe `topic` on the live connection, if any. Returns `false` if
    /// the connection turned out to be gone.
    fn activate(&mut self, topic: &str) -> bool {
        let Some(link) = self.link.as_mut() else {
            return true;
        };
        match link.connection.subscribe(topic) {
            Ok(handle) => {
                debug!(topic, %handle, "Subscribed");
                self.registry.set_active(topic, handle);
                true
            }
            Err(e) => {
                self.connection_lost(&format!("subscribe to {topic} failed: {e}"));
                false
            }
        }
    }

    fn release_handle(&mut self, handle: &SubscriptionHandle) {
        if let Some(link) = self.link.as_mut()
            && let Err(e) = link.connection.unsubscribe(handle)
        {
            debug!(%handle, error = %e, "Unsubscribe failed");
        }
    }

    fn connection_lost(&mut self, reason: &str) {
        warn!(reason, "Real-time connection lost");
        // The handles died with the connection.
        self.registry.deactivate_all();
        if let Some(link) = self.link.take() {
            link.connection.disconnect();
        }
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        if !self.auth.borrow().is_authenticated() {
            self.disconnect("not authenticated");
            return;
        }
        if !self.policy.should_retry(self.failures) {
            error!(attempts = self.failures, "Giving up on the real-time connection");
            self.retry_at = None;
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        let delay = self.policy.delay_for_attempt(self.failures);
        self.failures = self.failures.saturating_add(1);
        self.retry_at = Some(Instant::now() + delay);
        self.set_state(ConnectionState::Reconnecting);
        warn!(
            attempt = self.failures,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnecting"
        );
    }

    /// Cancel any attempt or retry and close the live connection, tearing
    /// down its subscriptions. The desired set is kept.
    fn close_link(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.task.abort();
        }
        self.retry_at = None;
        if let Some(mut link) = self.link.take() {
            for handle in self.registry.deactivate_all() {
                if let Err(e) = link.connection.unsubscribe(&handle) {
                    debug!(%handle, error = %e, "Unsubscribe failed");
                }
            }
            link.connection.disconnect();
        }
    }

    fn disconnect(&mut self, reason: &str) {
        self.close_link();
        self.serving = None;
        self.failures = 0;
        if self.set_state(ConnectionState::Disconnected) {
            info!(reason, "Real-time connection closed");
        }
    }

    fn set_state(&self, next: ConnectionState) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!(from = %state, to = %next, "Connection state");
            *state = next;
            true
        })
    }
}

async fn next_event<C>(link: Option<&mut Link<C>>) -> Option<TransportEvent> {
    match link {
        Some(link) => link.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn retry_delay(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
#[path = "multiplexer_tests.rs"]
mod tests;
