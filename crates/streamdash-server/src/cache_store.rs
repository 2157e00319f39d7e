//! Two-tier snapshot cache: an in-process slot per layer backed by typed
//! rows in `dashboard_stats_cache`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use streamdash_core::snapshot::{PanelSnapshot, StatsSnapshot, WatchStatistics};
use streamdash_core::time::{parse_timestamp, timestamp};

use crate::db::{CacheRow, Database, DbError};

/// One independently cached and refreshed snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Live,
    Watch,
    Panels,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Live, Layer::Watch, Layer::Panels];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Watch => "watch",
            Self::Panels => "panels",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "watch" => Ok(Self::Watch),
            "panels" => Ok(Self::Panels),
            other => Err(format!(
                "unknown layer '{other}' (expected live, watch or panels)"
            )),
        }
    }
}

/// A snapshot type that owns one cache layer.
pub trait LayerSnapshot: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    const LAYER: Layer;

    fn slot(store: &CacheStore) -> &RwLock<Slot<Self>>;
}

impl LayerSnapshot for StatsSnapshot {
    const LAYER: Layer = Layer::Live;

    fn slot(store: &CacheStore) -> &RwLock<Slot<Self>> {
        &store.live
    }
}

impl LayerSnapshot for WatchStatistics {
    const LAYER: Layer = Layer::Watch;

    fn slot(store: &CacheStore) -> &RwLock<Slot<Self>> {
        &store.watch
    }
}

impl LayerSnapshot for PanelSnapshot {
    const LAYER: Layer = Layer::Panels;

    fn slot(store: &CacheStore) -> &RwLock<Slot<Self>> {
        &store.panels
    }
}

/// In-process tier for one layer. Readers clone the `Arc`, never the data.
#[derive(Debug)]
pub struct Slot<T> {
    pub snapshot: Option<Arc<T>>,
    pub stored_at: Option<DateTime<Utc>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            snapshot: None,
            stored_at: None,
        }
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            snapshot: self.snapshot.as_ref().map(Arc::clone),
            stored_at: self.stored_at,
        }
    }
}

pub struct CacheStore {
    db: Database,
    live: RwLock<Slot<StatsSnapshot>>,
    watch: RwLock<Slot<WatchStatistics>>,
    panels: RwLock<Slot<PanelSnapshot>>,
}

impl CacheStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            live: RwLock::default(),
            watch: RwLock::default(),
            panels: RwLock::default(),
        }
    }

    pub async fn get<T: LayerSnapshot>(&self) -> Slot<T> {
        T::slot(self).read().await.clone()
    }

    pub async fn stored_at(&self, layer: Layer) -> Option<DateTime<Utc>> {
        match layer {
            Layer::Live => self.live.read().await.stored_at,
            Layer::Watch => self.watch.read().await.stored_at,
            Layer::Panels => self.panels.read().await.stored_at,
        }
    }

    /// Write both tiers. A durable-tier failure is logged and the
    /// in-process slot is still replaced.
    pub async fn store<T: LayerSnapshot>(&self, snapshot: T, now: DateTime<Utc>) {
        match encode_rows(T::LAYER, &snapshot, now) {
            Ok(rows) => {
                let fields = rows.len();
                if let Err(e) = self.db.upsert_cache_rows(rows).await {
                    tracing::warn!(layer = %T::LAYER, error = %e, "Durable cache write failed");
                } else {
                    tracing::debug!(layer = %T::LAYER, fields, "Durable cache written");
                }
            },
            Err(e) => {
                tracing::warn!(layer = %T::LAYER, error = %e, "Snapshot could not be encoded");
            },
        }
        let mut slot = T::slot(self).write().await;
        slot.snapshot = Some(Arc::new(snapshot));
        slot.stored_at = Some(now);
    }

    /// Load every layer from the durable tier. Returns how many layers
    /// were restored; a layer whose rows no longer decode is skipped.
    pub async fn hydrate(&self) -> Result<usize, DbError> {
        let rows = self.db.load_cache_rows().await?;
        let mut restored = 0;
        let mut decoded = decode_rows(&rows);
        if let Some(layer) = decoded.remove(&Layer::Live) {
            restored += usize::from(self.restore::<StatsSnapshot>(layer).await);
        }
        if let Some(layer) = decoded.remove(&Layer::Watch) {
            restored += usize::from(self.restore::<WatchStatistics>(layer).await);
        }
        if let Some(layer) = decoded.remove(&Layer::Panels) {
            restored += usize::from(self.restore::<PanelSnapshot>(layer).await);
        }
        Ok(restored)
    }

    async fn restore<T: LayerSnapshot>(&self, layer: DecodedLayer) -> bool {
        match serde_json::from_value::<T>(Value::Object(layer.fields)) {
            Ok(snapshot) => {
                let mut slot = T::slot(self).write().await;
                slot.snapshot = Some(Arc::new(snapshot));
                slot.stored_at = layer.stored_at;
                tracing::info!(layer = %T::LAYER, "Hydrated cache layer from database");
                true
            },
            Err(e) => {
                tracing::warn!(layer = %T::LAYER, error = %e, "Discarding undecodable cache layer");
                false
            },
        }
    }
}

/// Rows of one layer reassembled into a JSON object.
#[derive(Debug, Default)]
pub struct DecodedLayer {
    pub fields: Map<String, Value>,
    pub stored_at: Option<DateTime<Utc>>,
}

/// Flatten a snapshot into one typed row per top-level field.
pub fn encode_rows<T: Serialize>(
    layer: Layer,
    snapshot: &T,
    now: DateTime<Utc>,
) -> Result<Vec<CacheRow>, serde_json::Error> {
    let Value::Object(fields) = serde_json::to_value(snapshot)? else {
        return Ok(Vec::new());
    };
    let updated_at = timestamp(now);
    fields
        .into_iter()
        .map(|(field, value)| {
            let (value, stat_type) = match value {
                Value::Number(n) => (n.to_string(), "number"),
                Value::String(s) => (s, "string"),
                other => (serde_json::to_string(&other)?, "json"),
            };
            Ok(CacheRow {
                key: format!("{}.{field}", layer.as_str()),
                value,
                stat_type: stat_type.to_string(),
                updated_at: updated_at.clone(),
            })
        })
        .collect()
}

/// Group rows by layer prefix. Rows with an unknown layer, an unknown
/// type or an unparsable value are dropped. A layer's `stored_at` is the
/// newest `updated_at` among its rows.
pub fn decode_rows(rows: &[CacheRow]) -> BTreeMap<Layer, DecodedLayer> {
    let mut layers: BTreeMap<Layer, DecodedLayer> = BTreeMap::new();
    for row in rows {
        let Some((prefix, field)) = row.key.split_once('.') else {
            continue;
        };
        let Ok(layer) = prefix.parse::<Layer>() else {
            continue;
        };
        let value = match row.stat_type.as_str() {
            "string" => Some(Value::String(row.value.clone())),
            "number" => serde_json::from_str::<serde_json::Number>(&row.value)
                .ok()
                .map(Value::Number),
            "json" => serde_json::from_str(&row.value).ok(),
            _ => None,
        };
        let Some(value) = value else {
            tracing::warn!(key = %row.key, stat_type = %row.stat_type, "Skipping unreadable cache row");
            continue;
        };
        let entry = layers.entry(layer).or_default();
        entry.fields.insert(field.to_string(), value);
        if let Some(at) = parse_timestamp(&row.updated_at)
            && entry.stored_at.is_none_or(|prev| at > prev)
        {
            entry.stored_at = Some(at);
        }
    }
    layers
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use streamdash_core::snapshot::{BackendStatus, PanelDetail};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_767_225_600 + secs, 0).unwrap()
    }

    #[test]
    fn layers_parse_case_insensitively() {
        assert_eq!("LIVE".parse::<Layer>(), Ok(Layer::Live));
        assert_eq!(" panels ".parse::<Layer>(), Ok(Layer::Panels));
        assert!("stats".parse::<Layer>().unwrap_err().contains("unknown layer"));
    }

    #[test]
    fn rows_are_typed_per_field() {
        let snapshot = StatsSnapshot {
            total_users: 12,
            generated_at: Some("2026-01-01T00:00:00Z".to_string()),
            ..StatsSnapshot::default()
        };
        let rows = encode_rows(Layer::Live, &snapshot, at(0)).unwrap();
        let find = |key: &str| rows.iter().find(|r| r.key == key).unwrap();

        assert_eq!(find("live.total_users").stat_type, "number");
        assert_eq!(find("live.total_users").value, "12");
        assert_eq!(find("live.generated_at").stat_type, "string");
        assert_eq!(find("live.bandwidth").stat_type, "json");
        assert_eq!(find("live.live_sessions").value, "[]");
        assert!(rows.iter().all(|r| r.updated_at == "2026-01-01T00:00:00Z"));
    }

    #[test]
    fn decode_groups_and_keeps_newest_timestamp() {
        let row = |key: &str, value: &str, ty: &str, secs: i64| CacheRow {
            key: key.to_string(),
            value: value.to_string(),
            stat_type: ty.to_string(),
            updated_at: timestamp(at(secs)),
        };
        let rows = vec![
            row("live.total_users", "4", "number", 0),
            row("live.generated_at", "x", "string", 30),
            row("live.bandwidth", "{not json", "json", 60),
            row("panels.iptv_panels_online", "2", "number", 5),
            row("orphan.field", "1", "number", 0),
            row("no_dot", "1", "number", 0),
        ];
        let layers = decode_rows(&rows);
        assert_eq!(layers.len(), 2);
        let live = &layers[&Layer::Live];
        assert_eq!(live.fields.len(), 2);
        assert_eq!(live.stored_at, Some(at(30)));
        assert_eq!(layers[&Layer::Panels].fields["iptv_panels_online"], 2);
    }

    #[tokio::test]
    async fn store_then_hydrate_in_a_fresh_store() {
        let db = Database::open_in_memory().unwrap();
        let first = CacheStore::new(db.clone());
        let panels = PanelSnapshot::from_panels(
            vec![PanelDetail {
                id: 1,
                name: "Main".into(),
                status: BackendStatus::Online,
                active_connections: 2,
                max_connections: 4,
                ..PanelDetail::default()
            }],
            timestamp(at(0)),
        );
        first.store(panels.clone(), at(10)).await;
        assert_eq!(first.stored_at(Layer::Panels).await, Some(at(10)));

        let second = CacheStore::new(db);
        assert!(second.get::<PanelSnapshot>().await.snapshot.is_none());
        assert_eq!(second.hydrate().await.unwrap(), 1);
        let slot = second.get::<PanelSnapshot>().await;
        assert_eq!(slot.snapshot.as_deref(), Some(&panels));
        assert_eq!(slot.stored_at, Some(at(10)));
        assert!(second.get::<StatsSnapshot>().await.snapshot.is_none());
    }

    #[tokio::test]
    async fn durable_failure_still_updates_memory() {
        let db = Database::open_in_memory().unwrap();
        db.call(|conn| conn.execute_batch("DROP TABLE dashboard_stats_cache"))
            .await
            .unwrap();
        let store = CacheStore::new(db);
        let stats = StatsSnapshot {
            total_users: 3,
            ..StatsSnapshot::default()
        };
        store.store(stats, at(0)).await;
        let slot = store.get::<StatsSnapshot>().await;
        assert_eq!(slot.snapshot.map(|s| s.total_users), Some(3));
        assert!(store.hydrate().await.is_err());
    }
}
