//! Accorcia Live Library
//!
//! The session-bound real-time layer of the Accorcia client:
//! - Credential lifetime tracking with expiry-driven logout
//! - One multiplexed real-time connection shared by many topic subscriptions
//! - STOMP-over-WebSocket transport behind a pluggable trait
//! - REST client whose 401/403 answers end the session

pub mod api;
pub mod realtime;
pub mod session;
pub mod transport;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod test_support;

pub use api::{ApiClient, ApiError, RegisterRequest};
pub use realtime::{ConnectionState, MessageStream, RealtimeConfig, RealtimeMultiplexer};
pub use session::{AuthState, Session, SessionManager};
pub use transport::StompTransport;

/// Topic carrying live visit updates for a shortlink.
pub fn shortlink_topic(short_code: &str) -> String {
    format!("/topic/url/{short_code}")
}
