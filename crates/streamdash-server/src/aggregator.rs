//! Builds the three layer snapshots from the database and the backends.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;

use streamdash_core::merge::{ScalarCounts, merge};
use streamdash_core::resources::{ResourceSnapshot, attribute};
use streamdash_core::snapshot::{PanelSnapshot, StatsSnapshot, WatchStatistics};
use streamdash_core::time::timestamp;
use streamdash_iptv::PanelClient;
use streamdash_plex::{HistoryCollector, ServerClient};

use crate::db::Database;
use crate::refresh::{RefreshError, StatsSource};
use crate::resources::ResourceMonitor;

const TOTAL_USERS: &str = "SELECT COUNT(*) FROM users";
const PLEX_SERVERS: &str = "SELECT COUNT(*) FROM plex_servers WHERE is_active = 1";
const IPTV_PANELS: &str = "SELECT COUNT(*) FROM iptv_panels WHERE is_active = 1";
const PLEX_EXPIRING_7: &str = "SELECT COUNT(*) FROM users WHERE plex_expiration IS NOT NULL
    AND date(plex_expiration) BETWEEN date('now') AND date('now', '+7 days')";
const PLEX_EXPIRING_30: &str = "SELECT COUNT(*) FROM users WHERE plex_expiration IS NOT NULL
    AND date(plex_expiration) BETWEEN date('now') AND date('now', '+30 days')";
const IPTV_EXPIRING_7: &str = "SELECT COUNT(*) FROM users WHERE iptv_expiration IS NOT NULL
    AND date(iptv_expiration) BETWEEN date('now') AND date('now', '+7 days')";
const IPTV_EXPIRING_30: &str = "SELECT COUNT(*) FROM users WHERE iptv_expiration IS NOT NULL
    AND date(iptv_expiration) BETWEEN date('now') AND date('now', '+30 days')";
const PENDING_REQUESTS: &str = "SELECT COUNT(*) FROM service_requests WHERE status = 'pending'";

pub struct Aggregator {
    db: Database,
    plex: ServerClient,
    history: HistoryCollector,
    panels: PanelClient,
    monitor: Option<Arc<dyn ResourceMonitor>>,
}

impl Aggregator {
    pub fn new(
        db: Database,
        plex: ServerClient,
        panels: PanelClient,
        monitor: Option<Arc<dyn ResourceMonitor>>,
    ) -> Self {
        Self {
            history: HistoryCollector::new(plex.clone()),
            db,
            plex,
            panels,
            monitor,
        }
    }

    async fn count(&self, name: &'static str, sql: &'static str) -> u64 {
        match self.db.scalar(sql).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(count = name, error = %e, "Scalar count failed, using 0");
                0
            },
        }
    }

    /// Every scalar in one concurrent batch. Each defaults to 0 on error.
    pub async fn scalar_counts(&self) -> ScalarCounts {
        let (
            total_users,
            plex_server_count,
            iptv_panel_count,
            plex_expiring_7_days,
            plex_expiring_30_days,
            iptv_expiring_7_days,
            iptv_expiring_30_days,
            pending_requests,
        ) = tokio::join!(
            self.count("total_users", TOTAL_USERS),
            self.count("plex_server_count", PLEX_SERVERS),
            self.count("iptv_panel_count", IPTV_PANELS),
            self.count("plex_expiring_7_days", PLEX_EXPIRING_7),
            self.count("plex_expiring_30_days", PLEX_EXPIRING_30),
            self.count("iptv_expiring_7_days", IPTV_EXPIRING_7),
            self.count("iptv_expiring_30_days", IPTV_EXPIRING_30),
            self.count("pending_requests", PENDING_REQUESTS),
        );
        ScalarCounts {
            total_users,
            plex_server_count,
            iptv_panel_count,
            plex_expiring_7_days,
            plex_expiring_30_days,
            iptv_expiring_7_days,
            iptv_expiring_30_days,
            pending_requests,
        }
    }

    async fn sample_resources(&self) -> Option<ResourceSnapshot> {
        let monitor = self.monitor.as_ref()?;
        match monitor.sample().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, "Resource monitor failed, metrics left empty");
                None
            },
        }
    }
}

#[async_trait]
impl StatsSource for Aggregator {
    async fn run_full_refresh(&self) -> Result<StatsSnapshot, RefreshError> {
        let started = Instant::now();
        let (counts, servers) = tokio::join!(self.scalar_counts(), self.db.list_plex_servers());
        let servers = servers?;

        let fetches = join_all(servers.iter().map(|server| self.plex.fetch_server_state(server)));
        let (states, resources) = tokio::join!(fetches, self.sample_resources());

        let mut snapshot = merge(counts, states, timestamp(Utc::now()));
        if let Some(resources) = resources {
            let matched = attribute(&mut snapshot.plex_servers, &resources);
            tracing::debug!(matched, entries = resources.len(), "Attributed resource usage");
        }
        tracing::info!(
            servers = servers.len(),
            online = snapshot.plex_servers_online,
            sessions = snapshot.total_live_sessions,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Built live snapshot"
        );
        Ok(snapshot)
    }

    async fn watch_statistics(&self) -> Result<WatchStatistics, RefreshError> {
        let servers = self.db.list_plex_servers().await?;
        Ok(self.history.collect(&servers, Utc::now()).await)
    }

    async fn panel_snapshot(&self) -> Result<PanelSnapshot, RefreshError> {
        let panels = self.db.list_iptv_panels().await?;
        let details = join_all(panels.iter().map(|panel| self.panels.fetch_panel(panel))).await;
        Ok(PanelSnapshot::from_panels(details, timestamp(Utc::now())))
    }
}
