//! Connection state and statistics.

use std::fmt;

/// Connection state of the real-time multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Multiplexer statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiplexerStats {
    /// Topics with at least one consumer.
    pub desired_topics: usize,
    /// Topics with a live transport subscription.
    pub active_topics: usize,
    /// Consumer references across all topics.
    pub consumers: usize,
}
