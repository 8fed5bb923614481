// =============================================================================
// Sync Configuration — endpoints and tuning knobs for the sync layer
// =============================================================================
//
// All fields carry `#[serde(default)]` so that adding new fields never breaks
// loading an older config file. Environment variables (NANOPULSE_WS_URL,
// NANOPULSE_API_URL) override the file for endpoint selection.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_ws_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_api_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_reconnect_base_delay_ms() -> u64 {
    2000
}

fn default_reconnect_growth_factor() -> f64 {
    1.5
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_min_update_interval_ms() -> u64 {
    1000
}

fn default_trade_history_capacity() -> usize {
    20
}

// =============================================================================
// SyncConfig
// =============================================================================

/// Configuration for the sync layer: where the engine lives and how the
/// reconnect / throttle machinery is tuned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// WebSocket feed endpoint.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// REST base URL for order submission and health probes.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Delay before the first reconnect attempt, in milliseconds.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Multiplier applied to the delay per consecutive failure (uncapped,
    /// unjittered — the schedule is deterministic).
    #[serde(default = "default_reconnect_growth_factor")]
    pub reconnect_growth_factor: f64,

    /// Consecutive failures tolerated before the link is declared failed.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Minimum interval between accepted state merges, in milliseconds.
    /// Frames arriving faster than this are dropped, not queued.
    #[serde(default = "default_min_update_interval_ms")]
    pub min_update_interval_ms: u64,

    /// How many recent trades the store retains (most-recent-first).
    #[serde(default = "default_trade_history_capacity")]
    pub trade_history_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            api_url: default_api_url(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_growth_factor: default_reconnect_growth_factor(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            min_update_interval_ms: default_min_update_interval_ms(),
            trade_history_capacity: default_trade_history_capacity(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sync config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse sync config from {}", path.display()))?;

        info!(
            path = %path.display(),
            ws_url = %config.ws_url,
            "sync config loaded"
        );

        Ok(config)
    }

    /// Apply endpoint overrides from the environment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("NANOPULSE_WS_URL") {
            if !url.is_empty() {
                self.ws_url = url;
            }
        }
        if let Ok(url) = std::env::var("NANOPULSE_API_URL") {
            if !url.is_empty() {
                self.api_url = url;
            }
        }
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn min_update_interval(&self) -> Duration {
        Duration::from_millis(self.min_update_interval_ms)
    }
}
