//! Single-flight refresh coordination and the background scheduler.
//!
//! Each layer has one [`RefreshState`]. A refresh is started only by the
//! caller that wins the `compare_exchange` on its flag; everyone else is
//! served whatever snapshot is cached. The winner holds a
//! [`RefreshTicket`] whose `Drop` resets the flag, so a failing or
//! panicking refresh never wedges the layer.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use streamdash_core::snapshot::{PanelSnapshot, StatsSnapshot, WatchStatistics};
use streamdash_core::time::{age_seconds, timestamp};

use crate::cache_store::{CacheStore, Layer};
use crate::config::RefreshConfig;
use crate::db::{Database, DbError};

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Database(#[from] DbError),
    #[error("{0}")]
    Source(String),
    #[error("refresh task aborted: {0}")]
    Aborted(String),
}

/// Builds fresh snapshots. Implementations never touch refresh state.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn run_full_refresh(&self) -> Result<StatsSnapshot, RefreshError>;
    async fn watch_statistics(&self) -> Result<WatchStatistics, RefreshError>;
    async fn panel_snapshot(&self) -> Result<PanelSnapshot, RefreshError>;
}

/// What a trigger attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    Started,
    AlreadyRunning,
    Fresh,
    /// Another process holds the persisted claim.
    LockHeld,
}

#[derive(Debug, Default)]
pub struct RefreshState {
    refreshing: AtomicBool,
    /// Unix millis of the last completion, 0 when never completed.
    last_completed_ms: AtomicI64,
    runs: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl RefreshState {
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    pub fn last_completed_at(&self) -> Option<DateTime<Utc>> {
        match self.last_completed_ms.load(Ordering::Acquire) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    fn set_error(&self, error: Option<String>) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = error;
        }
    }

    /// Claim the layer. Returns `None` when a refresh is already in flight.
    pub fn try_claim(self: &Arc<Self>) -> Option<RefreshTicket> {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshTicket {
                state: Arc::clone(self),
                stamp: true,
            })
    }
}

/// Proof of a claimed layer. Dropping it stamps completion and frees the
/// layer, whether the refresh succeeded, failed or panicked.
#[derive(Debug)]
pub struct RefreshTicket {
    state: Arc<RefreshState>,
    stamp: bool,
}

impl RefreshTicket {
    /// Release without counting as a completed run.
    pub fn abandon(mut self) {
        self.stamp = false;
    }
}

impl Drop for RefreshTicket {
    fn drop(&mut self) {
        if self.stamp {
            self.state
                .last_completed_ms
                .store(Utc::now().timestamp_millis(), Ordering::Release);
            self.state.runs.fetch_add(1, Ordering::Relaxed);
        }
        self.state.refreshing.store(false, Ordering::Release);
    }
}

/// Reported by `/api/v1/dashboard/refresh-status` and `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct LayerStatus {
    pub layer: Layer,
    pub refreshing: bool,
    pub has_snapshot: bool,
    pub cache_age_seconds: Option<u64>,
    pub last_completed_at: Option<String>,
    pub last_error: Option<String>,
    pub runs: u64,
    pub ttl_seconds: u64,
}

pub struct RefreshCoordinator {
    cache: Arc<CacheStore>,
    db: Database,
    source: Arc<dyn StatsSource>,
    config: RefreshConfig,
    owner: String,
    live: Arc<RefreshState>,
    watch: Arc<RefreshState>,
    panels: Arc<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(
        cache: Arc<CacheStore>,
        db: Database,
        source: Arc<dyn StatsSource>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            cache,
            db,
            source,
            config,
            owner: uuid::Uuid::new_v4().to_string(),
            live: Arc::default(),
            watch: Arc::default(),
            panels: Arc::default(),
        }
    }

    pub fn state(&self, layer: Layer) -> &Arc<RefreshState> {
        match layer {
            Layer::Live => &self.live,
            Layer::Watch => &self.watch,
            Layer::Panels => &self.panels,
        }
    }

    pub fn is_refreshing(&self, layer: Layer) -> bool {
        self.state(layer).is_refreshing()
    }

    pub fn ttl(&self, layer: Layer) -> Duration {
        Duration::from_secs(match layer {
            Layer::Live => self.config.live_ttl_secs,
            Layer::Watch => self.config.watch_ttl_secs,
            Layer::Panels => self.config.panels_ttl_secs,
        })
    }

    /// A layer is fresh when it holds a snapshot and the newer of its
    /// stored-at and last-completion times is within the TTL.
    async fn is_fresh(&self, layer: Layer, now: DateTime<Utc>) -> bool {
        let Some(stored_at) = self.cache.stored_at(layer).await else {
            return false;
        };
        let last = self
            .state(layer)
            .last_completed_at()
            .map_or(stored_at, |done| done.max(stored_at));
        age_seconds(last, now) < self.ttl(layer).as_secs()
    }

    /// Start a refresh of `layer` in a detached task unless one is running
    /// or (without `force`) the cached snapshot is still fresh. Never waits
    /// for the refresh itself.
    pub async fn trigger(self: &Arc<Self>, layer: Layer, force: bool) -> TriggerOutcome {
        if self.is_refreshing(layer) {
            return TriggerOutcome::AlreadyRunning;
        }
        if !force && self.is_fresh(layer, Utc::now()).await {
            return TriggerOutcome::Fresh;
        }
        let Some(ticket) = self.state(layer).try_claim() else {
            return TriggerOutcome::AlreadyRunning;
        };

        let persisted = self.config.cross_process_lock;
        if persisted {
            let job = job_name(layer);
            match self
                .db
                .try_claim_job(&job, &self.owner, Utc::now().timestamp(), self.config.lock_stale_secs)
                .await
            {
                Ok(true) => {},
                Ok(false) => {
                    tracing::debug!(layer = %layer, "Refresh claimed by another process");
                    ticket.abandon();
                    return TriggerOutcome::LockHeld;
                },
                Err(e) => {
                    tracing::warn!(layer = %layer, error = %e, "Could not claim refresh lock");
                    ticket.abandon();
                    return TriggerOutcome::LockHeld;
                },
            }
        }

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let started = Instant::now();
            tracing::info!(layer = %layer, force, "Refresh started");
            // Run in its own task so a panic still reaches the lock release.
            let runner = Arc::clone(&coordinator);
            let result = tokio::spawn(async move { runner.run_layer(layer).await })
                .await
                .unwrap_or_else(|e| Err(RefreshError::Aborted(e.to_string())));
            match result {
                Ok(()) => {
                    coordinator.state(layer).set_error(None);
                    tracing::info!(
                        layer = %layer,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Refresh finished"
                    );
                },
                Err(e) => {
                    coordinator.state(layer).set_error(Some(e.to_string()));
                    tracing::warn!(
                        layer = %layer,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %e,
                        "Refresh failed, keeping previous snapshot"
                    );
                },
            }
            if persisted
                && let Err(e) = coordinator
                    .db
                    .release_job(&job_name(layer), &coordinator.owner)
                    .await
            {
                tracing::warn!(layer = %layer, error = %e, "Could not release refresh lock");
            }
            drop(ticket);
        });
        TriggerOutcome::Started
    }

    async fn run_layer(&self, layer: Layer) -> Result<(), RefreshError> {
        match layer {
            Layer::Live => {
                let snapshot = self.source.run_full_refresh().await?;
                self.cache.store(snapshot, Utc::now()).await;
            },
            Layer::Watch => {
                let snapshot = self.source.watch_statistics().await?;
                self.cache.store(snapshot, Utc::now()).await;
            },
            Layer::Panels => {
                let snapshot = self.source.panel_snapshot().await?;
                self.cache.store(snapshot, Utc::now()).await;
            },
        }
        Ok(())
    }

    pub async fn status(&self, layer: Layer) -> LayerStatus {
        let state = self.state(layer);
        let stored_at = self.cache.stored_at(layer).await;
        LayerStatus {
            layer,
            refreshing: state.is_refreshing(),
            has_snapshot: stored_at.is_some(),
            cache_age_seconds: stored_at.map(|at| age_seconds(at, Utc::now())),
            last_completed_at: state.last_completed_at().map(timestamp),
            last_error: state.last_error(),
            runs: state.runs.load(Ordering::Relaxed),
            ttl_seconds: self.ttl(layer).as_secs(),
        }
    }

    pub async fn statuses(&self) -> Vec<LayerStatus> {
        let mut out = Vec::with_capacity(Layer::ALL.len());
        for layer in Layer::ALL {
            out.push(self.status(layer).await);
        }
        out
    }
}

fn job_name(layer: Layer) -> String {
    format!("dashboard_refresh.{layer}")
}

/// Apply the time-based policy to every layer on a fixed tick. The first
/// tick fires immediately, so stale layers refresh right after startup.
pub fn spawn_scheduler(coordinator: Arc<RefreshCoordinator>) -> JoinHandle<()> {
    let period = coordinator.config.tick_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(tick_secs = period.as_secs(), "Refresh scheduler running");
        loop {
            interval.tick().await;
            for layer in Layer::ALL {
                let outcome = coordinator.trigger(layer, false).await;
                if outcome == TriggerOutcome::Started {
                    tracing::debug!(layer = %layer, "Scheduler started refresh");
                }
            }
        }
    })
}
