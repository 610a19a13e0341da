//! Push channel configuration.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the WebSocket push channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// WebSocket endpoint of the update server (`ws://` or `wss://`).
    pub url: String,
    /// Read silence, in seconds, after which the channel reports degraded.
    pub idle_timeout_secs: u64,
    /// How long the upgrade handshake may take, in seconds.
    pub connect_timeout_secs: u64,
    /// Frames buffered between the socket reader and the dispatcher.
    pub channel_capacity: usize,
}

impl PushConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:5000/ws".to_string(),
            idle_timeout_secs: 45,
            connect_timeout_secs: 10,
            channel_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_have_sensible_defaults() {
        let config = PushConfig::default();
        assert_eq!(config.url, "ws://localhost:5000/ws");
        assert_eq!(config.idle_timeout(), Duration::from_secs(45));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.channel_capacity, 256);
    }

    #[test]
    fn should_deserialize_from_toml() {
        let toml = r#"
            url = "wss://updates.example.org/socket"
            idle_timeout_secs = 20
            connect_timeout_secs = 3
            channel_capacity = 64
        "#;
        let config: PushConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.url, "wss://updates.example.org/socket");
        assert_eq!(config.idle_timeout_secs, 20);
        assert_eq!(config.connect_timeout_secs, 3);
        assert_eq!(config.channel_capacity, 64);
    }

    #[test]
    fn should_use_defaults_for_missing_fields() {
        let config: PushConfig = toml::from_str(r#"url = "ws://10.0.0.5/ws""#).unwrap();
        assert_eq!(config.url, "ws://10.0.0.5/ws");
        assert_eq!(config.idle_timeout_secs, 45);
        assert_eq!(config.channel_capacity, 256);
    }
}
