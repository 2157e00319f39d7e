//! SQLite access. Every query runs on the blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension, params};

use streamdash_iptv::PanelRecord;
use streamdash_plex::PlexServerRecord;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database connection lock poisoned")]
    Poisoned,
    #[error("database task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT,
    plex_expiration TEXT,
    iptv_expiration TEXT
);
CREATE TABLE IF NOT EXISTS plex_servers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    machine_id TEXT NOT NULL DEFAULT '',
    url TEXT NOT NULL,
    gateway_url TEXT,
    token TEXT NOT NULL DEFAULT '',
    is_active INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS iptv_panels (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    username TEXT NOT NULL DEFAULT '',
    password TEXT NOT NULL DEFAULT '',
    is_active INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS service_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    status TEXT NOT NULL DEFAULT 'pending'
);
CREATE TABLE IF NOT EXISTS dashboard_stats_cache (
    stat_key TEXT PRIMARY KEY,
    stat_value TEXT NOT NULL,
    stat_type TEXT NOT NULL CHECK (stat_type IN ('number', 'string', 'json')),
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS job_locks (
    job_name TEXT PRIMARY KEY,
    locked_by TEXT,
    locked_at INTEGER
);
";

/// One typed row of the durable cache tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRow {
    pub key: String,
    pub value: String,
    pub stat_type: String,
    pub updated_at: String,
}

/// Shared handle to the SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn call<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| DbError::Poisoned)?;
            f(&guard).map_err(DbError::from)
        })
        .await?
    }

    pub async fn ping(&self) -> Result<(), DbError> {
        self.call(|conn| conn.query_row("SELECT 1", [], |_| Ok(()))).await
    }

    /// Run a `SELECT COUNT(*)`-style query returning one integer.
    pub async fn scalar(&self, sql: &'static str) -> Result<u64, DbError> {
        self.call(move |conn| conn.query_row(sql, [], |row| row.get::<_, i64>(0)))
            .await
            .map(|n| n.max(0) as u64)
    }

    /// Active servers in registration order.
    pub async fn list_plex_servers(&self) -> Result<Vec<PlexServerRecord>, DbError> {
        self.call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, machine_id, url, gateway_url, token
                 FROM plex_servers WHERE is_active = 1 ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(PlexServerRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    machine_id: row.get(2)?,
                    url: row.get(3)?,
                    gateway_url: row.get(4)?,
                    token: row.get(5)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    pub async fn list_iptv_panels(&self) -> Result<Vec<PanelRecord>, DbError> {
        self.call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, url, username, password
                 FROM iptv_panels WHERE is_active = 1 ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(PanelRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    url: row.get(2)?,
                    username: row.get(3)?,
                    password: row.get(4)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    pub async fn load_cache_rows(&self) -> Result<Vec<CacheRow>, DbError> {
        self.call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT stat_key, stat_value, stat_type, updated_at FROM dashboard_stats_cache",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(CacheRow {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    stat_type: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    /// Upsert each row on its own. A failing row does not roll back the
    /// ones before it; the first error is returned after all rows were
    /// attempted.
    pub async fn upsert_cache_rows(&self, rows: Vec<CacheRow>) -> Result<usize, DbError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO dashboard_stats_cache (stat_key, stat_value, stat_type, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(stat_key) DO UPDATE SET
                    stat_value = excluded.stat_value,
                    stat_type = excluded.stat_type,
                    updated_at = excluded.updated_at",
            )?;
            let mut written = 0;
            let mut first_err = None;
            for row in &rows {
                match stmt.execute(params![row.key, row.value, row.stat_type, row.updated_at]) {
                    Ok(_) => written += 1,
                    Err(e) => {
                        first_err.get_or_insert(e);
                    },
                }
            }
            match first_err {
                Some(e) => Err(e),
                None => Ok(written),
            }
        })
        .await
    }

    /// Claim `job` for `owner` with a conditional update. Succeeds only if
    /// exactly one row changed: the lock was free or its holder went stale.
    pub async fn try_claim_job(
        &self,
        job: &str,
        owner: &str,
        now_secs: i64,
        stale_secs: u64,
    ) -> Result<bool, DbError> {
        let job = job.to_string();
        let owner = owner.to_string();
        let stale_before = now_secs - stale_secs as i64;
        self.call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO job_locks (job_name, locked_by, locked_at) VALUES (?1, NULL, NULL)",
                params![job],
            )?;
            let changed = conn.execute(
                "UPDATE job_locks SET locked_by = ?2, locked_at = ?3
                 WHERE job_name = ?1 AND (locked_by IS NULL OR locked_at < ?4)",
                params![job, owner, now_secs, stale_before],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    pub async fn release_job(&self, job: &str, owner: &str) -> Result<bool, DbError> {
        let job = job.to_string();
        let owner = owner.to_string();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE job_locks SET locked_by = NULL, locked_at = NULL
                 WHERE job_name = ?1 AND locked_by = ?2",
                params![job, owner],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    pub async fn job_holder(&self, job: &str) -> Result<Option<String>, DbError> {
        let job = job.to_string();
        self.call(move |conn| {
            conn.query_row(
                "SELECT locked_by FROM job_locks WHERE job_name = ?1",
                params![job],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map(Option::flatten)
        })
        .await
    }
}
