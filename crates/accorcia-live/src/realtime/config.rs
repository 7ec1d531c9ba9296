//! Real-time multiplexer configuration.

use std::time::Duration;

use accorcia_core::config::RealtimeSettings;

/// Configuration for the real-time multiplexer.
#[derive(Debug, Clone, Default)]
pub struct RealtimeConfig {
    /// Reconnection policy.
    pub reconnect: ReconnectPolicy,
}

impl From<&RealtimeSettings> for RealtimeConfig {
    fn from(settings: &RealtimeSettings) -> Self {
        Self {
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_secs(settings.reconnect_delay_secs),
                max_delay: Duration::from_secs(settings.reconnect_max_delay_secs),
                multiplier: f64::from(settings.reconnect_multiplier_percent) / 100.0,
                max_attempts: settings.max_reconnect_attempts,
            },
        }
    }
}

/// Backoff policy for connect failures and dropped connections.
///
/// The default is a fixed five-second delay with unlimited attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure (1.0 = fixed delay).
    pub multiplier: f64,
    /// Maximum consecutive retries (None = unlimited).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 1.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-indexed).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt.min(64) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        // A fixed delay larger than max_delay is honoured as configured.
        let floor_ms = if self.multiplier <= 1.0 { base_ms } else { 0.0 };
        Duration::from_millis(capped_ms.max(floor_ms) as u64)
    }

    /// Whether another attempt should be made.
    pub const fn should_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_fixed_five_seconds() {
        let policy = ReconnectPolicy::default();
        for attempt in [0, 1, 5, 100] {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::from_secs(5));
        }
        assert!(policy.should_retry(u32::MAX));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_attempts: None,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(10));
    }

    #[test]
    fn retry_with_max_attempts() {
        let policy = ReconnectPolicy {
            max_attempts: Some(2),
            ..Default::default()
        };
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn settings_convert_percent_multiplier() {
        let settings = RealtimeSettings {
            reconnect_delay_secs: 2,
            reconnect_multiplier_percent: 150,
            max_reconnect_attempts: Some(4),
            ..Default::default()
        };
        let config = RealtimeConfig::from(&settings);
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(2));
        assert!((config.reconnect.multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.reconnect.max_attempts, Some(4));
        assert_eq!(config.reconnect.delay_for_attempt(1), Duration::from_secs(3));
    }
}
