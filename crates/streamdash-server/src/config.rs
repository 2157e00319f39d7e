use std::time::Duration;

use serde::Deserialize;

use streamdash_iptv::PanelClientConfig;
use streamdash_plex::PlexClientConfig;

const DEFAULT_CONFIG_PATH: &str = "streamdash.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level server configuration, loaded from `streamdash.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub auth: AuthFileConfig,
    pub database: DatabaseConfig,
    pub refresh: RefreshConfig,
    pub plex: PlexClientConfig,
    pub iptv: PanelClientConfig,
    pub resource_monitor: ResourceMonitorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            auth: AuthFileConfig::default(),
            database: DatabaseConfig::default(),
            refresh: RefreshConfig::default(),
            plex: PlexClientConfig::default(),
            iptv: PanelClientConfig::default(),
            resource_monitor: ResourceMonitorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthFileConfig {
    /// Bearer token for `/api/v1`. None disables auth.
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "streamdash.db".to_string(),
        }
    }
}

/// Staleness thresholds and scheduler cadence for each cache layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub live_ttl_secs: u64,
    pub watch_ttl_secs: u64,
    pub panels_ttl_secs: u64,
    /// Run the background scheduler.
    pub scheduler_enabled: bool,
    pub tick_interval_secs: u64,
    /// Back the in-process claim with a row in `job_locks`.
    pub cross_process_lock: bool,
    /// A persisted claim older than this is considered abandoned.
    pub lock_stale_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            live_ttl_secs: 30,
            watch_ttl_secs: 86_400,
            panels_ttl_secs: 300,
            scheduler_enabled: true,
            tick_interval_secs: 10,
            cross_process_lock: false,
            lock_stale_secs: 900,
        }
    }
}

impl RefreshConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

/// External process that reports per-server CPU and memory usage as JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResourceMonitorConfig {
    pub enabled: bool,
    pub command: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ResourceMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: "python3".to_string(),
            args: vec!["plex_resource_monitor.py".to_string()],
            timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Load from `$STREAMDASH_CONFIG` (or `streamdash.toml`), apply
    /// environment overrides and validate. A missing file means defaults;
    /// an unreadable or malformed one is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("STREAMDASH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let cfg = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?;
                tracing::info!(path = %path, "Loaded configuration");
                cfg
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path, "No config file found, using defaults");
                Self::default()
            },
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply `STREAMDASH_*` overrides. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(addr) = get("STREAMDASH_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(path) = get("STREAMDASH_DATABASE_PATH") {
            self.database.path = path;
        }
        if let Some(token) = get("STREAMDASH_API_TOKEN") {
            self.auth.bearer_token = Some(token);
        }
        if let Some(url) = get("STREAMDASH_PLEX_DIRECTORY_URL") {
            self.plex.directory_url = Some(url);
        }
        if let Some(cmd) = get("STREAMDASH_RESOURCE_MONITOR_CMD") {
            self.resource_monitor.command = cmd;
            self.resource_monitor.enabled = true;
        }
        if let Some(val) = get("STREAMDASH_LIVE_TTL_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.refresh.live_ttl_secs = n;
        }
        if let Some(val) = get("STREAMDASH_CROSS_PROCESS_LOCK")
            && let Ok(flag) = val.parse::<bool>()
        {
            self.refresh.cross_process_lock = flag;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "listen_addr {:?} is not a socket address",
                self.listen_addr
            )));
        }
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::Invalid("database.path must not be empty".into()));
        }
        let r = &self.refresh;
        for (name, value) in [
            ("refresh.live_ttl_secs", r.live_ttl_secs),
            ("refresh.watch_ttl_secs", r.watch_ttl_secs),
            ("refresh.panels_ttl_secs", r.panels_ttl_secs),
            ("refresh.tick_interval_secs", r.tick_interval_secs),
            ("resource_monitor.timeout_secs", self.resource_monitor.timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be > 0")));
            }
        }
        if self.plex.history_attempts == 0 {
            return Err(ConfigError::Invalid("plex.history_attempts must be > 0".into()));
        }
        if self.resource_monitor.enabled && self.resource_monitor.command.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "resource_monitor.command is required when enabled".into(),
            ));
        }
        if self.auth.bearer_token.is_none() {
            tracing::warn!("No bearer token configured, /api/v1 is unauthenticated");
        }
        Ok(())
    }
}
