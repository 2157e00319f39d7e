use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Endpoints and timeouts for talking to Plex servers and the central
/// directory. All timeouts are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlexClientConfig {
    /// Base URL of the directory API that lists shared users per server.
    pub directory_url: Option<String>,
    pub directory_timeout_ms: u64,
    /// Timeout for the gateway `/status/sessions` path.
    pub gateway_timeout_ms: u64,
    /// Timeout for the direct `/status/sessions` fallback.
    pub direct_timeout_ms: u64,
    /// Timeout for each library section count.
    pub library_timeout_ms: u64,
    /// Days of watch history to aggregate.
    pub history_days: u32,
    pub history_timeout_ms: u64,
    pub history_attempts: u32,
    pub history_retry_delay_ms: u64,
    pub user_agent: String,
}

impl Default for PlexClientConfig {
    fn default() -> Self {
        Self {
            directory_url: Some("https://plex.tv".to_string()),
            directory_timeout_ms: 5_000,
            gateway_timeout_ms: 10_000,
            direct_timeout_ms: 15_000,
            library_timeout_ms: 8_000,
            history_days: 30,
            history_timeout_ms: 60_000,
            history_attempts: 3,
            history_retry_delay_ms: 5_000,
            user_agent: concat!("streamdash/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl PlexClientConfig {
    pub fn directory_timeout(&self) -> Duration {
        Duration::from_millis(self.directory_timeout_ms)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }

    pub fn direct_timeout(&self) -> Duration {
        Duration::from_millis(self.direct_timeout_ms)
    }

    pub fn library_timeout(&self) -> Duration {
        Duration::from_millis(self.library_timeout_ms)
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_millis(self.history_timeout_ms)
    }

    pub fn history_retry_delay(&self) -> Duration {
        Duration::from_millis(self.history_retry_delay_ms)
    }
}
