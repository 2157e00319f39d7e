use std::sync::Arc;

use crate::auth::AuthConfig;
use crate::cache_store::CacheStore;
use crate::config::ServerConfig;
use crate::db::Database;
use crate::refresh::{RefreshCoordinator, StatsSource};

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheStore>,
    pub coordinator: Arc<RefreshCoordinator>,
    pub db: Database,
    pub auth: AuthConfig,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire the cache and coordinator around `source`. The cache starts
    /// empty; hydrate it before serving.
    pub fn new(config: ServerConfig, db: Database, source: Arc<dyn StatsSource>) -> Self {
        let auth = AuthConfig {
            bearer_token: config.auth.bearer_token.clone(),
        };
        let cache = Arc::new(CacheStore::new(db.clone()));
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&cache),
            db.clone(),
            source,
            config.refresh.clone(),
        ));
        Self {
            cache,
            coordinator,
            db,
            auth,
            config: Arc::new(config),
        }
    }
}
