//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `medsync.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::time::Duration;

use serde::Deserialize;

use medsync_adapter_push_ws::PushConfig;
use medsync_adapter_rest::RestConfig;
use medsync_adapter_virtual::VirtualConfig;
use medsync_app::freshness::FreshnessConfig;
use medsync_app::session::{EvictionConfig, SessionConfig};
use medsync_app::supervisor::ReconnectPolicy;

/// Token used against the simulated hospitals when none is configured.
const VIRTUAL_TOKEN: &str = "demo";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Session credentials.
    pub auth: AuthConfig,
    /// WebSocket push channel.
    pub push: PushConfig,
    /// Hospitals REST API.
    pub rest: RestConfig,
    /// Refresh intervals and cache eviction.
    pub freshness: FreshnessSettings,
    /// Push channel reconnection.
    pub reconnect: ReconnectSettings,
    /// Integration toggles.
    pub integrations: IntegrationsConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Session credentials.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer token for the push channel and the REST API.
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FreshnessSettings {
    /// Refresh interval of a watched facility while push is connected.
    pub interval_secs: u64,
    /// Refresh interval while push is down or degraded.
    pub degraded_interval_secs: u64,
    /// Unused cache entries older than this are evicted.
    pub max_idle_secs: u64,
    /// How often eviction runs.
    pub sweep_interval_secs: u64,
    /// Load the first directory page at startup.
    pub prime_directory: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub base_delay_ms: u64,
    pub max_delay_secs: u64,
    /// Relative jitter, `0.0..=1.0`.
    pub jitter: f64,
}

/// Per-integration toggles.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IntegrationsConfig {
    /// Simulated hospitals instead of the real push channel and REST API.
    pub r#virtual: VirtualConfig,
}

impl Config {
    /// Load configuration from `medsync.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("medsync.toml")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MEDSYNC_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = std::env::var("MEDSYNC_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = std::env::var("MEDSYNC_BIND") {
            if let Some((host, port)) = val.rsplit_once(':') {
                self.server.host = host.to_string();
                if let Ok(port) = port.parse() {
                    self.server.port = port;
                }
            }
        }
        if let Ok(val) = std::env::var("MEDSYNC_PUSH_URL") {
            self.push.url = val;
        }
        if let Ok(val) = std::env::var("MEDSYNC_API_URL") {
            self.rest.base_url = val;
        }
        if let Ok(val) = std::env::var("MEDSYNC_TOKEN") {
            self.auth.token = Some(val);
        }
        if let Ok(val) = std::env::var("MEDSYNC_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("port must be non-zero".to_string()));
        }
        if self.freshness.interval_secs == 0 || self.freshness.degraded_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "refresh intervals must be non-zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(ConfigError::Validation(
                "reconnect jitter must be within 0..=1".to_string(),
            ));
        }
        if self.integrations.r#virtual.enabled {
            return Ok(());
        }
        if !(self.push.url.starts_with("ws://") || self.push.url.starts_with("wss://")) {
            return Err(ConfigError::Validation(
                "push url must use ws:// or wss://".to_string(),
            ));
        }
        if self.push.idle_timeout_secs == 0 || self.push.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "push timeouts must be non-zero".to_string(),
            ));
        }
        if self.token().is_none() {
            return Err(ConfigError::Validation(
                "an auth token is required unless the virtual integration is enabled"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Return the `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// The configured bearer token, or the demo token in virtual mode.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self.auth.token.as_deref() {
            Some(token) if !token.trim().is_empty() => Some(token),
            _ if self.integrations.r#virtual.enabled => Some(VIRTUAL_TOKEN),
            _ => None,
        }
    }

    /// Engine settings derived from the `freshness` and `reconnect` sections.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            freshness: FreshnessConfig {
                interval: Duration::from_secs(self.freshness.interval_secs),
                degraded_interval: Duration::from_secs(self.freshness.degraded_interval_secs),
            },
            reconnect: ReconnectPolicy {
                base: Duration::from_millis(self.reconnect.base_delay_ms),
                max: Duration::from_secs(self.reconnect.max_delay_secs),
                jitter: self.reconnect.jitter,
            },
            eviction: EvictionConfig {
                max_idle: Duration::from_secs(self.freshness.max_idle_secs),
                sweep_interval: Duration::from_secs(self.freshness.sweep_interval_secs),
            },
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "medsyncd=info,medsync_app=info,tower_http=debug".to_string(),
        }
    }
}

impl Default for FreshnessSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            degraded_interval_secs: 10,
            max_idle_secs: 600,
            sweep_interval_secs: 60,
            prime_directory: true,
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_secs: 30,
            jitter: 0.2,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn real_mode() -> Config {
        let mut config = Config::default();
        config.integrations.r#virtual.enabled = false;
        config
    }

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.push.url, "ws://localhost:5000/ws");
        assert_eq!(config.rest.base_url, "http://localhost:5000/api");
        assert!(config.integrations.r#virtual.enabled);
        assert!(config.freshness.prime_directory);
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = "
            [server]
            host = '127.0.0.1'
            port = 9090

            [logging]
            filter = 'debug'

            [auth]
            token = 'secret'

            [push]
            url = 'wss://updates.example.org/ws'
            idle_timeout_secs = 20

            [rest]
            base_url = 'https://portal.example.org/api'

            [freshness]
            interval_secs = 60
            degraded_interval_secs = 5

            [reconnect]
            base_delay_ms = 500
            max_delay_secs = 10
            jitter = 0.1

            [integrations.virtual]
            enabled = false
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.token(), Some("secret"));
        assert_eq!(config.push.url, "wss://updates.example.org/ws");
        assert_eq!(config.push.idle_timeout_secs, 20);
        assert_eq!(config.rest.base_url, "https://portal.example.org/api");
        assert_eq!(config.freshness.interval_secs, 60);
        assert_eq!(config.reconnect.base_delay_ms, 500);
        assert!(!config.integrations.r#virtual.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn should_reject_zero_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_zero_refresh_interval() {
        let mut config = Config::default();
        config.freshness.degraded_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_out_of_range_jitter() {
        let mut config = Config::default();
        config.reconnect.jitter = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_require_token_without_virtual_integration() {
        let mut config = real_mode();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
        config.auth.token = Some("secret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_reject_non_websocket_push_url() {
        let mut config = real_mode();
        config.auth.token = Some("secret".to_string());
        config.push.url = "http://localhost:5000".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_zero_push_idle_timeout() {
        let mut config = real_mode();
        config.auth.token = Some("secret".to_string());
        config.push.idle_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_fall_back_to_demo_token_in_virtual_mode() {
        let mut config = Config::default();
        config.auth.token = Some("   ".to_string());
        assert_eq!(config.token(), Some("demo"));
    }

    #[test]
    fn should_format_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn should_build_session_config() {
        let config = Config::default();
        let session = config.session_config();
        assert_eq!(session.freshness.interval, Duration::from_secs(30));
        assert_eq!(session.freshness.degraded_interval, Duration::from_secs(10));
        assert_eq!(session.reconnect.base, Duration::from_secs(1));
        assert_eq!(session.reconnect.max, Duration::from_secs(30));
        assert_eq!(session.eviction.max_idle, Duration::from_secs(600));
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }
}
