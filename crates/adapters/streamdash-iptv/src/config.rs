use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for IPTV panel polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelClientConfig {
    /// Per-panel request timeout in milliseconds.
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for PanelClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            user_agent: concat!("streamdash/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl PanelClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
