//! Real-time topic subscriptions over a single shared connection.

mod config;
mod multiplexer;
mod registry;
mod state;
mod stream;

pub use config::{RealtimeConfig, ReconnectPolicy};
pub use multiplexer::RealtimeMultiplexer;
pub use state::{ConnectionState, MultiplexerStats};
pub use stream::MessageStream;
