//! Virtual integration configuration.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the simulated hospitals.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VirtualConfig {
    /// Whether the daemon wires the virtual adapters instead of the real ones.
    pub enabled: bool,
    /// Milliseconds between two simulated push frames.
    pub tick_interval_ms: u64,
    /// Chance, per frame, of an emergency alert instead of a bed update.
    pub alert_probability: f64,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl VirtualConfig {
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl Default for VirtualConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: 2_000,
            alert_probability: 0.05,
            seed: None,
        }
    }
}
