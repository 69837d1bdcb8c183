// src/queue/sqlite.rs
//! SQLite queue backend shared by generator and worker processes

use crate::queue::backend::QueueBackend;
use crate::queue::work_item::WorkItem;
use crate::state::sqlite::{now_millis, open_shared};
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::info;

fn unavailable(what: &str, e: rusqlite::Error) -> EngineError {
    EngineError::QueueUnavailable(format!("{}: {}", what, e))
}

/// Queue persisted in SQLite; pops are single statements
pub struct SqliteQueue {
    db: Mutex<Connection>,
}

impl SqliteQueue {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_shared(path)
            .map_err(|e| EngineError::QueueUnavailable(e.to_string()))?;
        let queue = Self {
            db: Mutex::new(conn),
        };
        queue.init_schema()?;

        info!("Work queue opened at {:?}", path);
        Ok(queue)
    }

    /// In-memory database, for tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| unavailable("open", e))?;
        let queue = Self {
            db: Mutex::new(conn),
        };
        queue.init_schema()?;
        Ok(queue)
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.db.lock();
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queue_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                lane TEXT NOT NULL,
                agent TEXT,
                payload TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_queue_lane ON queue_items(lane, agent, id);

            CREATE TABLE IF NOT EXISTS processed_items (
                lane TEXT NOT NULL,
                hash TEXT NOT NULL,
                seen_at INTEGER NOT NULL,
                PRIMARY KEY (lane, hash)
            );
            "#,
        )
        .map_err(|e| unavailable("schema creation", e))
    }

    fn insert(&self, lane: &str, agent: Option<&str>, item: &WorkItem) -> Result<()> {
        let payload = serde_json::to_string(item)?;
        let db = self.db.lock();
        db.execute(
            "INSERT INTO queue_items (lane, agent, payload, enqueued_at) VALUES (?1, ?2, ?3, ?4)",
            params![lane, agent, payload, now_millis()],
        )
        .map_err(|e| unavailable("push", e))?;
        Ok(())
    }

    fn take(&self, lane: &str, agent: Option<&str>) -> Result<Option<WorkItem>> {
        let db = self.db.lock();
        let payload: Option<String> = db
            .query_row(
                r#"
                DELETE FROM queue_items WHERE id = (
                    SELECT id FROM queue_items
                    WHERE lane = ?1 AND agent IS ?2
                    ORDER BY id LIMIT 1
                )
                RETURNING payload
                "#,
                params![lane, agent],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| unavailable("pop", e))?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

impl QueueBackend for SqliteQueue {
    fn push(&self, lane: &str, item: &WorkItem) -> Result<()> {
        self.insert(lane, None, item)
    }

    fn pop(&self, lane: &str) -> Result<Option<WorkItem>> {
        self.take(lane, None)
    }

    fn push_batch(&self, lane: &str, agent: &str, item: &WorkItem) -> Result<()> {
        self.insert(lane, Some(agent), item)
    }

    fn pop_batch(&self, lane: &str, agent: &str) -> Result<Option<WorkItem>> {
        self.take(lane, Some(agent))
    }

    fn len(&self, lane: &str) -> Result<usize> {
        let db = self.db.lock();
        let count: i64 = db
            .query_row(
                "SELECT COUNT(*) FROM queue_items WHERE lane = ? AND agent IS NULL",
                params![lane],
                |row| row.get(0),
            )
            .map_err(|e| unavailable("len", e))?;
        Ok(count as usize)
    }

    fn snapshot(&self, lane: &str) -> Result<Vec<WorkItem>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare("SELECT payload FROM queue_items WHERE lane = ? AND agent IS NULL ORDER BY id")
            .map_err(|e| unavailable("snapshot", e))?;

        let payloads = stmt
            .query_map(params![lane], |row| row.get::<_, String>(0))
            .map_err(|e| unavailable("snapshot", e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| unavailable("snapshot", e))?;

        payloads
            .iter()
            .map(|payload| serde_json::from_str(payload).map_err(EngineError::from))
            .collect()
    }

    fn mark_processed(&self, lane: &str, hash: &str) -> Result<bool> {
        let db = self.db.lock();
        let inserted = db
            .execute(
                "INSERT OR IGNORE INTO processed_items (lane, hash, seen_at) VALUES (?1, ?2, ?3)",
                params![lane, hash, now_millis()],
            )
            .map_err(|e| unavailable("mark processed", e))?;
        Ok(inserted == 1)
    }

    fn forget_processed(&self, lane: &str, hash: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "DELETE FROM processed_items WHERE lane = ?1 AND hash = ?2",
            params![lane, hash],
        )
        .map_err(|e| unavailable("forget processed", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fifo_order_and_isolation() {
        let queue = SqliteQueue::in_memory().unwrap();
        for url in ["x", "y", "z"] {
            queue.push("rust", &WorkItem::post(url, url)).unwrap();
        }
        queue.push("go", &WorkItem::post("g", "g")).unwrap();
        queue.push_batch("rust", "alice", &WorkItem::post("b", "b")).unwrap();

        assert_eq!(queue.len("rust").unwrap(), 3);
        assert_eq!(queue.snapshot("rust").unwrap().len(), 3);

        let popped: Vec<String> = std::iter::from_fn(|| queue.pop("rust").unwrap())
            .map(|item| item.url)
            .collect();
        assert_eq!(popped, vec!["x", "y", "z"]);

        assert_eq!(queue.pop_batch("rust", "alice").unwrap().unwrap().url, "b");
        assert_eq!(queue.pop("go").unwrap().unwrap().url, "g");
    }

    #[test]
    fn test_mark_processed() {
        let queue = SqliteQueue::in_memory().unwrap();
        assert!(queue.mark_processed("rust", "abc").unwrap());
        assert!(!queue.mark_processed("rust", "abc").unwrap());
        assert!(queue.mark_processed("go", "abc").unwrap());

        queue.forget_processed("rust", "abc").unwrap();
        assert!(queue.mark_processed("rust", "abc").unwrap());
    }

    #[test]
    fn test_shared_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let producer = SqliteQueue::open(&path).unwrap();
        let consumer = SqliteQueue::open(&path).unwrap();

        let item = WorkItem::comment("t3_1", "hello").with_route("rust");
        producer.push("rust.comments", &item).unwrap();
        assert_eq!(consumer.pop("rust.comments").unwrap(), Some(item));
        assert_eq!(producer.pop("rust.comments").unwrap(), None);
    }
}
