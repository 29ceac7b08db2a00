//! Registry Configuration

use std::time::Duration;

use serde::Deserialize;

/// Tunables for the routing registry
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How often a registering client re-checks for the incumbent binding
    /// to disappear during takeover (e.g., "100ms")
    /// Default: 100ms
    #[serde(default = "default_takeover_poll_interval", with = "humantime_serde")]
    pub takeover_poll_interval: Duration,

    /// How often a caller waiting on the cluster readiness gate re-checks it
    /// Default: 100ms
    #[serde(default = "default_ready_poll_interval", with = "humantime_serde")]
    pub ready_poll_interval: Duration,

    /// Maximum publish workers in flight before publish fails with a
    /// system-limit error
    /// Default: 1024
    #[serde(default = "default_max_inflight_publishes")]
    pub max_inflight_publishes: usize,

    /// Mailbox capacity of session channels created by the registry
    /// Default: 1024
    #[serde(default = "default_session_channel_capacity")]
    pub session_channel_capacity: usize,
}

fn default_takeover_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_ready_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_max_inflight_publishes() -> usize {
    1024
}

fn default_session_channel_capacity() -> usize {
    1024
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            takeover_poll_interval: default_takeover_poll_interval(),
            ready_poll_interval: default_ready_poll_interval(),
            max_inflight_publishes: default_max_inflight_publishes(),
            session_channel_capacity: default_session_channel_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.takeover_poll_interval, Duration::from_millis(100));
        assert_eq!(config.ready_poll_interval, Duration::from_millis(100));
        assert_eq!(config.max_inflight_publishes, 1024);
        assert_eq!(config.session_channel_capacity, 1024);
    }
}
