//! Watch-history collector for the daily statistics layer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;

use streamdash_core::payload::{NumericField, as_list, str_field};
use streamdash_core::ranking::{ContentAggregate, ContentMap, TOP_N, Tally};
use streamdash_core::session::with_token;
use streamdash_core::snapshot::{PlatformActivity, TitleStat, UserActivity, WatchStatistics};
use streamdash_core::time::{timestamp, window_start};

use crate::client::{PlexServerRecord, ServerClient};
use crate::error::FetchError;

/// One parsed history row.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub account_id: Option<i64>,
    pub kind: HistoryKind,
    pub platform: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryKind {
    Movie {
        title: String,
        year: Option<u32>,
        thumb: Option<String>,
    },
    /// Episodes are credited to their show.
    Episode { show: String, thumb: Option<String> },
    Other,
}

/// Parse one history record. Returns `None` when the record cannot be
/// attributed (not an object, or an episode with no show title).
pub fn parse_entry(record: &Value) -> Option<HistoryEntry> {
    if !record.is_object() {
        return None;
    }
    let account_id = NumericField::field(record, "accountID")
        .value()
        .filter(|id| *id > 0.0)
        .map(|id| id as i64);
    let platform = record
        .get("Player")
        .and_then(|p| str_field(p, "title").or_else(|| str_field(p, "platform")))
        .map(|s| s.into_owned());

    let kind = match str_field(record, "type").as_deref() {
        Some("movie") => HistoryKind::Movie {
            title: str_field(record, "title")?.into_owned(),
            year: NumericField::field(record, "year")
                .as_u64()
                .and_then(|y| u32::try_from(y).ok()),
            thumb: str_field(record, "thumb").map(|s| s.into_owned()),
        },
        Some("episode") => HistoryKind::Episode {
            show: str_field(record, "grandparentTitle")?.into_owned(),
            thumb: str_field(record, "grandparentThumb")
                .or_else(|| str_field(record, "thumb"))
                .map(|s| s.into_owned()),
        },
        _ => HistoryKind::Other,
    };
    Some(HistoryEntry {
        account_id,
        kind,
        platform,
    })
}

/// `accountID -> name` from an `/accounts` payload.
pub fn parse_accounts(payload: &Value) -> HashMap<i64, String> {
    let container = payload.get("MediaContainer").unwrap_or(payload);
    as_list(container.get("Account"))
        .into_iter()
        .filter_map(|account| {
            let id = NumericField::field(account, "id").value()? as i64;
            let name = str_field(account, "name")?.into_owned();
            Some((id, name))
        })
        .collect()
}

/// Display name for a history row: the mapped account name, else
/// `User-{id}`, else `Unknown User`.
pub fn resolve_username(accounts: &HashMap<i64, String>, account_id: Option<i64>) -> String {
    match account_id {
        Some(id) => accounts
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("User-{id}")),
        None => "Unknown User".to_string(),
    }
}

/// One server's raw history plus its account map.
#[derive(Debug, Clone, Default)]
pub struct ServerHistory {
    pub base_url: String,
    pub token: String,
    pub accounts: HashMap<i64, String>,
    pub records: Vec<Value>,
}

/// Accumulates history across servers into the ranked lists.
#[derive(Debug, Default)]
pub struct WatchAccumulator {
    movies: ContentMap,
    shows: ContentMap,
    users: Tally,
    platforms: Tally,
    servers_processed: u64,
    servers_failed: u64,
    entries: u64,
    skipped: u64,
}

impl WatchAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_server(&mut self, history: &ServerHistory) {
        self.servers_processed += 1;
        for record in &history.records {
            let Some(entry) = parse_entry(record) else {
                self.skipped += 1;
                continue;
            };
            self.entries += 1;
            let username = resolve_username(&history.accounts, entry.account_id);
            self.users.add(&username);
            if let Some(platform) = &entry.platform {
                self.platforms.add(platform);
            }
            match &entry.kind {
                HistoryKind::Movie { title, year, thumb } => {
                    let thumb = thumb
                        .as_deref()
                        .map(|t| with_token(&history.base_url, t, &history.token));
                    self.movies
                        .record(title, &username, thumb.as_deref(), "movie", *year);
                },
                HistoryKind::Episode { show, thumb } => {
                    let thumb = thumb
                        .as_deref()
                        .map(|t| with_token(&history.base_url, t, &history.token));
                    self.shows
                        .record(show, &username, thumb.as_deref(), "show", None);
                },
                HistoryKind::Other => {},
            }
        }
    }

    pub fn add_failure(&mut self) {
        self.servers_failed += 1;
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn finish(self, generated_at: String) -> WatchStatistics {
        let title_stat = |c: &ContentAggregate| TitleStat {
            title: c.title.clone(),
            thumb: c.thumb.clone(),
            year: c.year,
            play_count: c.plays,
            unique_users: c.viewer_count(),
        };
        WatchStatistics {
            most_popular_movies: self.movies.most_popular(TOP_N).into_iter().map(title_stat).collect(),
            most_watched_movies: self.movies.most_watched(TOP_N).into_iter().map(title_stat).collect(),
            most_popular_shows: self.shows.most_popular(TOP_N).into_iter().map(title_stat).collect(),
            most_watched_shows: self.shows.most_watched(TOP_N).into_iter().map(title_stat).collect(),
            most_active_users: self
                .users
                .top(TOP_N)
                .into_iter()
                .map(|(username, plays)| UserActivity { username, plays })
                .collect(),
            most_active_platforms: self
                .platforms
                .top(TOP_N)
                .into_iter()
                .map(|(platform, plays)| PlatformActivity { platform, plays })
                .collect(),
            servers_processed: self.servers_processed,
            servers_failed: self.servers_failed,
            history_entries: self.entries,
            generated_at: Some(generated_at),
        }
    }
}

/// Pulls watch history from every server and ranks it.
#[derive(Debug, Clone)]
pub struct HistoryCollector {
    client: ServerClient,
}

impl HistoryCollector {
    pub fn new(client: ServerClient) -> Self {
        Self { client }
    }

    /// Fetch every server's history concurrently and aggregate in server
    /// order. A server whose history cannot be read is counted as failed
    /// and skipped.
    pub async fn collect(&self, servers: &[PlexServerRecord], now: DateTime<Utc>) -> WatchStatistics {
        let mindate = window_start(now, self.client.config().history_days);
        let results = join_all(servers.iter().map(|s| self.fetch_server(s, mindate))).await;

        let mut acc = WatchAccumulator::new();
        for (server, result) in servers.iter().zip(results) {
            match result {
                Ok(history) => {
                    tracing::info!(
                        server = %server.name,
                        entries = history.records.len(),
                        "Collected watch history"
                    );
                    acc.add_server(&history);
                },
                Err(e) => {
                    tracing::warn!(server = %server.name, error = %e, "Skipping server watch history");
                    acc.add_failure();
                },
            }
        }
        if acc.skipped() > 0 {
            tracing::debug!(skipped = acc.skipped(), "Skipped unattributable history rows");
        }
        acc.finish(timestamp(now))
    }

    async fn fetch_server(&self, server: &PlexServerRecord, mindate: i64) -> Result<ServerHistory, FetchError> {
        let config = self.client.config();
        let accounts = match self
            .client
            .get_json(&server.url, "/accounts", &server.token, &[], config.direct_timeout())
            .await
        {
            Ok(payload) => parse_accounts(&payload),
            Err(e) => {
                tracing::warn!(server = %server.name, error = %e, "Could not build account map");
                HashMap::new()
            },
        };

        let attempts = config.history_attempts.max(1);
        let query = [("mindate", mindate.to_string())];
        let mut attempt = 1;
        let payload = loop {
            match self
                .client
                .get_json(
                    &server.url,
                    "/status/sessions/history/all",
                    &server.token,
                    &query,
                    config.history_timeout(),
                )
                .await
            {
                Ok(payload) => break payload,
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        server = %server.name,
                        attempt,
                        error = %e,
                        "History fetch failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(config.history_retry_delay()).await;
                },
                Err(e) => return Err(e),
            }
        };

        let container = payload.get("MediaContainer").unwrap_or(&payload);
        let records = as_list(container.get("Metadata")).into_iter().cloned().collect();
        Ok(ServerHistory {
            base_url: server.url.clone(),
            token: server.token.clone(),
            accounts,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn history(records: Vec<Value>) -> ServerHistory {
        ServerHistory {
            base_url: "http://plex:32400".to_string(),
            token: "tok".to_string(),
            accounts: HashMap::from([(1, "alice".to_string()), (2, "bob".to_string())]),
            records,
        }
    }

    #[test]
    fn usernames_fall_back_to_account_id() {
        let accounts = HashMap::from([(1, "alice".to_string())]);
        assert_eq!(resolve_username(&accounts, Some(1)), "alice");
        assert_eq!(resolve_username(&accounts, Some(77)), "User-77");
        assert_eq!(resolve_username(&accounts, None), "Unknown User");
    }

    #[test]
    fn accounts_parse_single_and_list() {
        let payload = json!({"MediaContainer": {"Account": [
            {"id": 1, "name": "alice"}, {"id": "2", "name": "bob"}, {"id": 3}
        ]}});
        let accounts = parse_accounts(&payload);
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[&2], "bob");
    }

    #[test]
    fn episodes_roll_up_to_shows() {
        let mut acc = WatchAccumulator::new();
        acc.add_server(&history(vec![
            json!({"type": "episode", "grandparentTitle": "Show X", "grandparentThumb": "/s/1", "accountID": 1,
                   "Player": {"title": "Roku"}}),
            json!({"type": "episode", "grandparentTitle": "Show X", "accountID": 1}),
            json!({"type": "episode", "grandparentTitle": "Show X", "accountID": 2}),
            json!({"type": "movie", "title": "Heat", "year": 1995, "thumb": "/m/9", "accountID": 2}),
            json!({"type": "episode", "accountID": 2}),
            json!("garbage"),
        ]));
        assert_eq!(acc.skipped(), 2);
        let stats = acc.finish("now".to_string());

        let show = &stats.most_watched_shows[0];
        assert_eq!(show.title, "Show X");
        assert_eq!(show.play_count, 3);
        assert_eq!(show.unique_users, 2);
        assert_eq!(show.thumb.as_deref(), Some("http://plex:32400/s/1?X-Plex-Token=tok"));

        let movie = &stats.most_popular_movies[0];
        assert_eq!(movie.year, Some(1995));
        assert_eq!(stats.most_active_users[0].username, "alice");
        assert_eq!(stats.most_active_users[0].plays, 2);
        assert_eq!(stats.most_active_platforms, vec![PlatformActivity {
            platform: "Roku".to_string(),
            plays: 1
        }]);
        assert_eq!(stats.history_entries, 4);
        assert_eq!(stats.servers_processed, 1);
    }

    #[test]
    fn failures_are_counted_not_fatal() {
        let mut acc = WatchAccumulator::new();
        acc.add_failure();
        acc.add_server(&history(vec![json!({"type": "track", "title": "Song", "accountID": 5})]));
        let stats = acc.finish("now".to_string());
        assert_eq!(stats.servers_failed, 1);
        assert_eq!(stats.most_active_users[0].username, "User-5");
        assert!(stats.most_popular_movies.is_empty());
    }
}
