use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use streamdash_core::payload::{NumericField, is_truthy, str_field};
use streamdash_core::snapshot::{BackendStatus, PanelDetail};
use streamdash_core::time::timestamp;

use crate::config::PanelClientConfig;
use crate::error::PanelError;

/// A registered IPTV panel as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelRecord {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Account state reported by a panel's `user_info` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelAccount {
    pub status: Option<String>,
    pub active_connections: u64,
    pub max_connections: u64,
    pub expires_at: Option<String>,
}

/// Polls Xtream-style `player_api.php` endpoints.
#[derive(Debug, Clone)]
pub struct PanelClient {
    http: reqwest::Client,
    config: PanelClientConfig,
}

impl PanelClient {
    pub fn new(config: PanelClientConfig) -> Result<Self, PanelError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(PanelError::Client)?;
        Ok(Self { http, config })
    }

    /// Fetch one panel. Failures become an offline [`PanelDetail`] carrying
    /// the error text.
    pub async fn fetch_panel(&self, panel: &PanelRecord) -> PanelDetail {
        match self.fetch_account(panel).await {
            Ok(account) => PanelDetail {
                id: panel.id,
                name: panel.name.clone(),
                status: BackendStatus::Online,
                account_status: account.status,
                active_connections: account.active_connections,
                max_connections: account.max_connections,
                expires_at: account.expires_at,
                error: None,
            },
            Err(e) => {
                tracing::warn!(panel = %panel.name, error = %e, "Panel fetch failed");
                PanelDetail {
                    id: panel.id,
                    name: panel.name.clone(),
                    status: BackendStatus::Offline,
                    error: Some(e.to_string()),
                    ..PanelDetail::default()
                }
            },
        }
    }

    pub async fn fetch_account(&self, panel: &PanelRecord) -> Result<PanelAccount, PanelError> {
        let url = format!("{}/player_api.php", panel.url.trim_end_matches('/'));
        let resp = self
            .http
            .get(&url)
            .query(&[("username", &panel.username), ("password", &panel.password)])
            .timeout(self.config.timeout())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(PanelError::Status(resp.status().as_u16()));
        }
        let payload: Value = resp.json().await?;
        parse_account(&payload)
    }
}

/// Read `user_info` from a `player_api.php` response.
pub fn parse_account(payload: &Value) -> Result<PanelAccount, PanelError> {
    let info = payload
        .get("user_info")
        .filter(|v| v.is_object())
        .ok_or_else(|| PanelError::Payload("missing user_info".to_string()))?;
    if info.get("auth").is_some() && !is_truthy(info.get("auth")) {
        return Err(PanelError::Unauthorized);
    }
    let expires_at = NumericField::field(info, "exp_date")
        .value()
        .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
        .map(timestamp);
    Ok(PanelAccount {
        status: str_field(info, "status").map(|s| s.into_owned()),
        active_connections: NumericField::field(info, "active_cons").as_u64().unwrap_or(0),
        max_connections: NumericField::field(info, "max_connections")
            .as_u64()
            .unwrap_or(0),
        expires_at,
    })
}
