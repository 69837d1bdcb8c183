// src/recording/action_log.rs
//! Action log and per-agent statistics
//!
//! Every registered action is appended with its category and a JSON info
//! blob. The control surface reads aggregated statistics and recent rows.

use crate::scheduling::budget::ActionCategory;
use crate::state::sqlite::open_shared;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};
use ulid::Ulid;

/// One logged action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// ULID
    pub id: String,
    pub agent: String,
    pub category: ActionCategory,
    pub info: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl ActionRecord {
    fn new(agent: &str, category: ActionCategory, info: &serde_json::Value) -> Self {
        Self {
            id: Ulid::new().to_string(),
            agent: agent.to_string(),
            category,
            info: info.clone(),
            recorded_at: Utc::now(),
        }
    }
}

/// Aggregated counts for one agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent: String,
    pub counts: BTreeMap<ActionCategory, u64>,
    pub total: u64,
    pub last_action_at: Option<DateTime<Utc>>,
}

impl AgentStats {
    fn empty(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
            ..Default::default()
        }
    }

    fn add(&mut self, category: ActionCategory, count: u64, last: Option<DateTime<Utc>>) {
        *self.counts.entry(category).or_insert(0) += count;
        self.total += count;
        if last > self.last_action_at {
            self.last_action_at = last;
        }
    }
}

/// Where registered actions go
pub trait ActionSink: Send + Sync {
    fn record(&self, agent: &str, category: ActionCategory, info: &serde_json::Value) -> Result<()>;

    fn stats(&self, agent: &str) -> Result<AgentStats>;

    /// Newest first
    fn recent(&self, agent: &str, limit: usize) -> Result<Vec<ActionRecord>>;
}

/// In-memory log, for tests and dry runs
#[derive(Default)]
pub struct MemoryActionLog {
    records: RwLock<Vec<ActionRecord>>,
}

impl MemoryActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records in insertion order
    pub fn records(&self) -> Vec<ActionRecord> {
        self.records.read().clone()
    }
}

impl ActionSink for MemoryActionLog {
    fn record(&self, agent: &str, category: ActionCategory, info: &serde_json::Value) -> Result<()> {
        self.records
            .write()
            .push(ActionRecord::new(agent, category, info));
        Ok(())
    }

    fn stats(&self, agent: &str) -> Result<AgentStats> {
        let mut stats = AgentStats::empty(agent);
        for record in self.records.read().iter().filter(|r| r.agent == agent) {
            stats.add(record.category, 1, Some(record.recorded_at));
        }
        Ok(stats)
    }

    fn recent(&self, agent: &str, limit: usize) -> Result<Vec<ActionRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .rev()
            .filter(|r| r.agent == agent)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Action log in SQLite
pub struct SqliteActionLog {
    db: Mutex<Connection>,
}

impl SqliteActionLog {
    pub fn open(path: &Path) -> Result<Self> {
        let log = Self {
            db: Mutex::new(open_shared(path)?),
        };
        log.init_schema()?;

        info!("Action log opened at {:?}", path);
        Ok(log)
    }

    /// In-memory database, for tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::StorageFailed(format!("Failed to open database: {}", e)))?;
        let log = Self {
            db: Mutex::new(conn),
        };
        log.init_schema()?;
        Ok(log)
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.db.lock();
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS action_log (
                id TEXT PRIMARY KEY,
                agent TEXT NOT NULL,
                category TEXT NOT NULL,
                info TEXT NOT NULL,
                recorded_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_action_log_agent ON action_log(agent, recorded_at);
            "#,
        )
        .map_err(|e| EngineError::StorageFailed(format!("Schema creation failed: {}", e)))
    }
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

impl ActionSink for SqliteActionLog {
    fn record(&self, agent: &str, category: ActionCategory, info: &serde_json::Value) -> Result<()> {
        let record = ActionRecord::new(agent, category, info);
        let info = serde_json::to_string(&record.info)?;

        let db = self.db.lock();
        db.execute(
            "INSERT INTO action_log (id, agent, category, info, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                record.agent,
                category.as_str(),
                info,
                record.recorded_at.timestamp_millis()
            ],
        )
        .map_err(|e| EngineError::StorageFailed(format!("Failed to log action: {}", e)))?;
        Ok(())
    }

    fn stats(&self, agent: &str) -> Result<AgentStats> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT category, COUNT(*), MAX(recorded_at) FROM action_log WHERE agent = ? GROUP BY category",
            )
            .map_err(|e| EngineError::StorageFailed(format!("Failed to query stats: {}", e)))?;

        let rows = stmt
            .query_map(params![agent], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(|e| EngineError::StorageFailed(format!("Failed to query stats: {}", e)))?;

        let mut stats = AgentStats::empty(agent);
        for row in rows {
            let (category, count, last) =
                row.map_err(|e| EngineError::StorageFailed(format!("Failed to read stats: {}", e)))?;
            match category.parse::<ActionCategory>() {
                Ok(category) => stats.add(category, count as u64, from_millis(last)),
                Err(_) => warn!("Ignoring unknown category '{}' in action log", category),
            }
        }
        Ok(stats)
    }

    fn recent(&self, agent: &str, limit: usize) -> Result<Vec<ActionRecord>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT id, category, info, recorded_at FROM action_log WHERE agent = ? ORDER BY recorded_at DESC, rowid DESC LIMIT ?",
            )
            .map_err(|e| EngineError::StorageFailed(format!("Failed to query actions: {}", e)))?;

        let rows = stmt
            .query_map(params![agent, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(|e| EngineError::StorageFailed(format!("Failed to query actions: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            let (id, category, info, recorded_at) = row
                .map_err(|e| EngineError::StorageFailed(format!("Failed to read action: {}", e)))?;
            records.push(ActionRecord {
                id,
                agent: agent.to_string(),
                category: category.parse()?,
                info: serde_json::from_str(&info)?,
                recorded_at: from_millis(recorded_at).unwrap_or_default(),
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn exercise(sink: &dyn ActionSink) {
        sink.record("alice", ActionCategory::Consume, &json!({"item": "a"})).unwrap();
        sink.record("alice", ActionCategory::Consume, &json!({"item": "b"})).unwrap();
        sink.record("alice", ActionCategory::Vote, &json!({"item": "b", "direction": 1})).unwrap();
        sink.record("bob", ActionCategory::Produce, &json!({})).unwrap();

        let stats = sink.stats("alice").unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.counts.get(&ActionCategory::Consume), Some(&2));
        assert_eq!(stats.counts.get(&ActionCategory::Produce), None);
        assert!(stats.last_action_at.is_some());

        let recent = sink.recent("alice", 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].category, ActionCategory::Vote);
        assert_eq!(recent[0].info["direction"], 1);

        let empty = sink.stats("carol").unwrap();
        assert_eq!(empty.total, 0);
        assert_eq!(empty.last_action_at, None);
    }

    #[test]
    fn test_memory_log() {
        let log = MemoryActionLog::new();
        exercise(&log);
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_sqlite_log() {
        let log = SqliteActionLog::in_memory().unwrap();
        exercise(&log);
    }

    #[test]
    fn test_sqlite_log_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("actions.db");
        {
            let log = SqliteActionLog::open(&path).unwrap();
            log.record("alice", ActionCategory::Comment, &json!({"target": "t3_1"})).unwrap();
        }
        let log = SqliteActionLog::open(&path).unwrap();
        assert_eq!(log.stats("alice").unwrap().counts.get(&ActionCategory::Comment), Some(&1));
    }
}
