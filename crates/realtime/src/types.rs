//! Public types for the realtime connection manager.

use std::time::Duration;

/// Lifecycle of the realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No credential, or the server ended the session on purpose.
    Idle,
    /// WebSocket upgrade in progress.
    Connecting,
    /// Upgrade succeeded; messages flow in both directions.
    Connected,
    /// Connection lost unexpectedly. A reconnect may be pending.
    Disconnected,
}

/// Why a live connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Closed from this side (logout, shutdown, forced reconnect).
    Local,
    /// The server sent a close frame meaning "do not come back".
    ServerClosed { code: Option<u16>, reason: String },
    /// The server rejected the credential.
    AuthRejected,
    /// Transport failure, read deadline, or a transient close code.
    Dropped(String),
}

impl DisconnectReason {
    /// Returns `true` if the manager should schedule a reconnect.
    pub fn should_reconnect(&self) -> bool {
        matches!(self, Self::Dropped(_))
    }
}

/// Events emitted by the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    /// A reconnect attempt was scheduled.
    Reconnecting { attempt: u32, next_retry_secs: f64 },
    /// Reconnect attempts ran out; the manager waits for a new credential
    /// or an explicit reconnect.
    ReconnectExhausted { attempts: u32 },
    /// The server refused the current credential.
    AuthRejected,
    /// The server closed the connection on purpose.
    ServerClosed { code: Option<u16>, reason: String },
}

/// Configuration for automatic reconnection with exponential backoff.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
    /// Attempts allowed after a disconnect before giving up.
    pub max_attempts: u32,
    /// Random spread applied to each delay, as a fraction of it (0.25 is
    /// ±25%). Zero keeps delays exact.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: 5,
            jitter: 0.0,
        }
    }
}

impl ReconnectConfig {
    /// Calculates the delay for a given attempt number (1-based):
    /// `min(initial * factor^(attempt-1), max)`, then jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if self.jitter <= 0.0 {
            return Duration::from_secs_f64(capped);
        }

        let spread = capped * self.jitter;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / u32::MAX as f64)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        Duration::from_secs_f64((capped + spread * offset).max(0.05))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_config_defaults() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.backoff_factor - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn reconnect_config_delay_backoff() {
        let config = ReconnectConfig::default();
        let expected = [1, 2, 4, 8, 16, 30, 30];
        for (i, &secs) in expected.iter().enumerate() {
            assert_eq!(
                config.delay_for_attempt((i + 1) as u32),
                Duration::from_secs(secs),
                "attempt {}",
                i + 1
            );
        }
    }

    #[test]
    fn reconnect_config_huge_attempt_is_capped() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn reconnect_config_jitter_stays_in_range() {
        let config = ReconnectConfig {
            jitter: 0.25,
            ..Default::default()
        };
        let expected_base = [1.0, 2.0, 4.0, 8.0, 16.0, 30.0];
        for (i, &base) in expected_base.iter().enumerate() {
            let secs = config.delay_for_attempt((i + 1) as u32).as_secs_f64();
            let lo = base * 0.74;
            let hi = base * 1.26;
            assert!(
                secs >= lo && secs <= hi,
                "attempt {}: {secs:.3}s not in [{lo:.3}, {hi:.3}]",
                i + 1
            );
        }
    }

    #[test]
    fn only_dropped_connections_reconnect() {
        assert!(DisconnectReason::Dropped("reset".into()).should_reconnect());
        assert!(!DisconnectReason::Local.should_reconnect());
        assert!(!DisconnectReason::AuthRejected.should_reconnect());
        assert!(
            !DisconnectReason::ServerClosed {
                code: Some(4001),
                reason: "session terminated".into()
            }
            .should_reconnect()
        );
    }
}
