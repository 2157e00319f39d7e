use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Reachability of one backend during the last refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Online,
    #[default]
    Offline,
}

/// Which session path answered for a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    Gateway,
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryKind {
    Movie,
    Show,
    Artist,
    Photo,
    Other,
}

impl LibraryKind {
    pub fn from_section_type(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "movie" => Self::Movie,
            "show" => Self::Show,
            "artist" => Self::Artist,
            "photo" => Self::Photo,
            _ => Self::Other,
        }
    }
}

/// One library section on one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryInfo {
    pub key: String,
    pub title: String,
    pub kind: LibraryKind,
    pub item_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_count: Option<u64>,
}

/// Per-backend record, recomputed every refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerDetail {
    pub id: i64,
    pub name: String,
    pub status: BackendStatus,
    pub user_count: u64,
    pub pending_invites: u64,
    pub session_count: u64,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub libraries: Vec<LibraryInfo>,
    pub session_source: Option<SessionSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Library counts summed across every online server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryTotals {
    pub movies: u64,
    pub shows: u64,
    pub seasons: u64,
    pub episodes: u64,
    pub artists: u64,
    pub albums: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStat {
    pub title: String,
    pub thumb: Option<String>,
    pub media_type: String,
    pub plays: u64,
    pub user_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivity {
    pub username: String,
    pub plays: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformActivity {
    pub platform: String,
    pub plays: u64,
}

/// Bitrate sums and per-decision counts over the live sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandwidthStats {
    pub total_kbps: u64,
    pub wan_kbps: u64,
    pub total_mbps: f64,
    pub wan_mbps: f64,
    pub direct_play: u64,
    pub direct_stream: u64,
    pub transcode: u64,
    pub unknown: u64,
}

/// The live dashboard snapshot. Replaced wholesale on every refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSnapshot {
    pub total_users: u64,
    pub plex_server_count: u64,
    pub iptv_panel_count: u64,
    pub plex_expiring_7_days: u64,
    pub plex_expiring_30_days: u64,
    pub iptv_expiring_7_days: u64,
    pub iptv_expiring_30_days: u64,
    pub pending_requests: u64,
    pub unique_plex_users: u64,
    pub pending_plex_invites: u64,
    pub total_live_sessions: u64,
    pub unique_live_viewers: u64,
    pub plex_servers_online: u64,
    pub plex_servers_offline: u64,
    pub bandwidth: BandwidthStats,
    pub most_popular_content: Vec<ContentStat>,
    pub most_watched_content: Vec<ContentStat>,
    pub most_active_users: Vec<UserActivity>,
    pub most_active_platforms: Vec<PlatformActivity>,
    pub live_sessions: Vec<Session>,
    pub plex_servers: Vec<ServerDetail>,
    pub library_totals: LibraryTotals,
    pub generated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleStat {
    pub title: String,
    pub thumb: Option<String>,
    pub year: Option<u32>,
    pub play_count: u64,
    pub unique_users: u64,
}

/// Thirty-day watch-history rankings, refreshed daily.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchStatistics {
    pub most_popular_movies: Vec<TitleStat>,
    pub most_watched_movies: Vec<TitleStat>,
    pub most_popular_shows: Vec<TitleStat>,
    pub most_watched_shows: Vec<TitleStat>,
    pub most_active_users: Vec<UserActivity>,
    pub most_active_platforms: Vec<PlatformActivity>,
    pub servers_processed: u64,
    pub servers_failed: u64,
    pub history_entries: u64,
    pub generated_at: Option<String>,
}

/// One IPTV panel as seen during the last refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelDetail {
    pub id: i64,
    pub name: String,
    pub status: BackendStatus,
    pub account_status: Option<String>,
    pub active_connections: u64,
    pub max_connections: u64,
    pub expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelSnapshot {
    pub panels: Vec<PanelDetail>,
    pub iptv_panels_online: u64,
    pub iptv_panels_offline: u64,
    pub total_active_connections: u64,
    pub total_max_connections: u64,
    pub generated_at: Option<String>,
}

impl PanelSnapshot {
    /// Build the tallies from a fan-out result, keeping the input order.
    pub fn from_panels(panels: Vec<PanelDetail>, generated_at: String) -> Self {
        let online = panels
            .iter()
            .filter(|p| p.status == BackendStatus::Online)
            .count() as u64;
        Self {
            iptv_panels_online: online,
            iptv_panels_offline: panels.len() as u64 - online,
            total_active_connections: panels.iter().map(|p| p.active_connections).sum(),
            total_max_connections: panels.iter().map(|p| p.max_connections).sum(),
            generated_at: Some(generated_at),
            panels,
        }
    }
}
