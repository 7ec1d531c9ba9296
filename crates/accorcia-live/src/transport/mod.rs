//! Transport abstraction for the real-time connection.
//!
//! A [`Transport`] opens at most one duplex connection per call; the
//! multiplexer owns the resulting [`TransportConnection`] and reads inbound
//! frames from the paired event channel.

mod error;
pub mod stomp;
mod ws;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

use std::fmt;
use std::future::Future;

use tokio::sync::mpsc;

use crate::session::BearerToken;

pub use error::TransportError;
pub use ws::StompTransport;

/// Headers sent with the connect request.
#[derive(Debug, Clone)]
pub struct ConnectHeaders {
    pub bearer: BearerToken,
}

/// Transport-level subscription identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(String);

impl SubscriptionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Something that happened on an open connection.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Inbound frame for a subscription. `body` is still encoded.
    Message {
        handle: SubscriptionHandle,
        topic: String,
        body: String,
    },
    /// The connection ended without being asked to.
    Closed { reason: String },
}

/// An open connection plus the stream of its inbound events.
///
/// The event channel closing is equivalent to [`TransportEvent::Closed`].
pub struct Link<C> {
    pub connection: C,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens connections.
pub trait Transport: Send + Sync + 'static {
    type Connection: TransportConnection;

    fn connect(
        &self,
        headers: ConnectHeaders,
    ) -> impl Future<Output = Result<Link<Self::Connection>, TransportError>> + Send;
}

/// Control half of an open connection.
///
/// Subscribe and unsubscribe only queue the request; acknowledgement is
/// implied by the connection staying open.
pub trait TransportConnection: Send + 'static {
    fn subscribe(&mut self, topic: &str) -> Result<SubscriptionHandle, TransportError>;

    fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> Result<(), TransportError>;

    /// Close the connection. Events already queued may still be readable.
    fn disconnect(self);
}
