// ABOUTME: Tunnel supervision settings: timeouts, retry budget, keepalive cadence.
// ABOUTME: Durations are written in humantime form ("30s", "2s").

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct TunnelSettings {
    /// Bound on one dial + handshake.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Accept deadline; each expiry checks transport health.
    #[serde(default = "default_accept_tick", with = "humantime_serde")]
    pub accept_tick: Duration,

    /// Interval between liveness probes while forwarding.
    #[serde(default = "default_keepalive_interval", with = "humantime_serde")]
    pub keepalive_interval: Duration,

    /// Consecutive failed attempts tolerated before the tunnel fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff grows by this much per failed attempt.
    #[serde(default = "default_retry_unit", with = "humantime_serde")]
    pub retry_unit: Duration,

    /// How long a stop request waits for the tunnel to wind down.
    #[serde(default = "default_stop_grace", with = "humantime_serde")]
    pub stop_grace: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_accept_tick() -> Duration {
    Duration::from_secs(60)
}

fn default_keepalive_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_unit() -> Duration {
    Duration::from_secs(2)
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(5)
}

impl Default for TunnelSettings {
    fn default() -> Self {
        TunnelSettings {
            connect_timeout: default_connect_timeout(),
            accept_tick: default_accept_tick(),
            keepalive_interval: default_keepalive_interval(),
            max_retries: default_max_retries(),
            retry_unit: default_retry_unit(),
            stop_grace: default_stop_grace(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_fill_defaults() {
        let settings: TunnelSettings =
            serde_yaml::from_str("max_retries: 5\nretry_unit: 500ms\n").unwrap();
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.retry_unit, Duration::from_millis(500));
        assert_eq!(settings.connect_timeout, Duration::from_secs(30));
        assert_eq!(settings.stop_grace, Duration::from_secs(5));
    }
}
