//! REST API configuration.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the hospitals REST API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    /// API root, without a trailing slash (e.g. `https://portal.example.org/api`).
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl RestConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Join `path` onto the base URL.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            timeout_secs: 15,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_have_sensible_defaults() {
        let config = RestConfig::default();
        assert_eq!(config.base_url, "http://localhost:5000/api");
        assert_eq!(config.timeout(), Duration::from_secs(15));
    }

    #[test]
    fn should_deserialize_from_toml() {
        let toml = r#"
            base_url = "https://portal.example.org/api"
            timeout_secs = 5
        "#;
        let config: RestConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.base_url, "https://portal.example.org/api");
        assert_eq!(config.timeout_secs, 5);
    }

    #[test]
    fn should_use_defaults_for_missing_fields() {
        let config: RestConfig = toml::from_str("timeout_secs = 2").unwrap();
        assert_eq!(config.base_url, "http://localhost:5000/api");
        assert_eq!(config.timeout_secs, 2);
    }

    #[test]
    fn should_join_paths_without_double_slashes() {
        let config = RestConfig {
            base_url: "http://api.local/v1/".to_string(),
            ..RestConfig::default()
        };
        assert_eq!(config.url("/hospitals/H1"), "http://api.local/v1/hospitals/H1");
    }
}
