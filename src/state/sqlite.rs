// src/state/sqlite.rs
//! SQLite-backed state store shared by unrelated processes
//!
//! Every process opens its own connection to the same file. WAL mode and a
//! busy timeout let the orchestrator and workers write concurrently.

use crate::state::store::{StateStore, UnreachableStore};
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Milliseconds since the Unix epoch
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Open a connection tuned for multi-process access
pub(crate) fn open_shared(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::StorageFailed(format!("Failed to create directory: {}", e))
            })?;
        }
    }

    let conn = Connection::open(path)
        .map_err(|e| EngineError::StorageFailed(format!("Failed to open database: {}", e)))?;

    conn.busy_timeout(Duration::from_secs(5))
        .map_err(|e| EngineError::StorageFailed(format!("Failed to set busy timeout: {}", e)))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| EngineError::StorageFailed(format!("Failed to enable WAL: {}", e)))?;

    Ok(conn)
}

/// State store over a single SQLite table
pub struct SqliteStateStore {
    db: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_shared(path)?;
        let store = Self {
            db: Mutex::new(conn),
        };
        store.init_schema()?;
        store.purge_expired()?;

        info!("State store opened at {:?}", path);
        Ok(store)
    }

    /// Open for read-only callers: a store that cannot be opened yields an
    /// [`UnreachableStore`], whose states all read as STOP
    pub fn open_or_unreachable(path: &Path) -> Arc<dyn StateStore> {
        match Self::open(path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!("State store at {:?} unavailable: {}", path, e);
                Arc::new(UnreachableStore::new(e.to_string()))
            }
        }
    }

    /// In-memory database, for tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::StorageFailed(format!("Failed to open database: {}", e)))?;
        let store = Self {
            db: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            r#"
            CREATE TABLE IF NOT EXISTS agent_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER
            )
            "#,
            [],
        )
        .map_err(|e| EngineError::StorageFailed(format!("Schema creation failed: {}", e)))?;
        Ok(())
    }

    /// Drop every expired row; returns how many were removed
    pub fn purge_expired(&self) -> Result<usize> {
        let db = self.db.lock();
        let removed = db
            .execute(
                "DELETE FROM agent_state WHERE expires_at IS NOT NULL AND expires_at <= ?",
                params![now_millis()],
            )
            .map_err(|e| EngineError::StorageFailed(format!("Purge failed: {}", e)))?;

        debug!("Purged {} expired state entries", removed);
        Ok(removed)
    }
}

impl StateStore for SqliteStateStore {
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| now_millis() + ttl.as_millis() as i64);
        let db = self.db.lock();
        db.execute(
            r#"
            INSERT INTO agent_state (key, value, expires_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
            params![key, value, expires_at],
        )
        .map_err(|e| EngineError::StorageFailed(format!("Failed to set {}: {}", key, e)))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock();
        db.query_row(
            "SELECT value FROM agent_state WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
            params![key, now_millis()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| EngineError::StorageFailed(format!("Failed to get {}: {}", key, e)))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute("DELETE FROM agent_state WHERE key = ?", params![key])
            .map_err(|e| EngineError::StorageFailed(format!("Failed to delete {}: {}", key, e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::store::{read_state, state_key, write_state, AgentState};
    use tempfile::tempdir;

    #[test]
    fn test_set_get_delete() {
        let store = SqliteStateStore::in_memory().unwrap();
        store.set("a", "work", None).unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("work"));
        store.set("a", "sleep", None).unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("sleep"));
        store.delete("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_ttl_expiry_and_purge() {
        let store = SqliteStateStore::in_memory().unwrap();
        store.set("gone", "suspend", Some(Duration::from_millis(20))).unwrap();
        store.set("kept", "work", None).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(store.get("gone").unwrap(), None);
        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.get("kept").unwrap().as_deref(), Some("work"));
    }

    #[test]
    fn test_shared_between_connections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");

        let orchestrator = SqliteStateStore::open(&path).unwrap();
        let worker = SqliteStateStore::open(&path).unwrap();

        write_state(&orchestrator, &state_key("alice"), AgentState::Suspend, None).unwrap();
        assert_eq!(read_state(&worker, &state_key("alice")), AgentState::Suspend);

        write_state(&worker, &state_key("alice"), AgentState::Work, None).unwrap();
        assert_eq!(read_state(&orchestrator, &state_key("alice")), AgentState::Work);
    }

    #[test]
    fn test_open_purges_expired_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");

        let first = SqliteStateStore::open(&path).unwrap();
        first.set("gone", "sleep", Some(Duration::from_millis(10))).unwrap();
        first.set("kept", "work", None).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        let second = SqliteStateStore::open(&path).unwrap();
        assert_eq!(second.purge_expired().unwrap(), 0);
        assert_eq!(second.get("kept").unwrap().as_deref(), Some("work"));
    }

    #[test]
    fn test_unopenable_store_reads_as_stop() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let store = SqliteStateStore::open_or_unreachable(&blocker.join("state.db"));
        assert_eq!(read_state(store.as_ref(), &state_key("alice")), AgentState::Stop);
        assert!(matches!(
            store.get("worker:alice"),
            Err(EngineError::StorageFailed(_))
        ));
    }
}
