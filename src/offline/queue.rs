//! SQLite-backed queue of heartbeats awaiting delivery.
//!
//! ```text
//! heartbeats(id TEXT PRIMARY KEY, heartbeat TEXT, queued_at TEXT)
//! ```
//!
//! `id` is [`Heartbeat::id`], so queuing the same heartbeat twice keeps a
//! single row. Rows come back out in insertion order.

use std::{fs, io, path::Path};

use jiff::Timestamp;
use rusqlite::Connection;
use tracing::warn;

use crate::model::Heartbeat;

/// Errors from the offline queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, QueueError>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS heartbeats (
        id        TEXT PRIMARY KEY,
        heartbeat TEXT NOT NULL,
        queued_at TEXT NOT NULL
    );
";

/// A durable local heartbeat queue.
pub struct Queue {
    conn: Connection,
}

impl Queue {
    /// Opens the queue at `path`, creating the file and schema if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Queues one heartbeat.
    pub fn push(&self, heartbeat: &Heartbeat) -> Result<()> {
        insert(&self.conn, heartbeat)
    }

    /// Queues a batch atomically. Returns how many were written.
    pub fn push_many(&self, heartbeats: &[Heartbeat]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        for heartbeat in heartbeats {
            insert(&tx, heartbeat)?;
        }
        tx.commit()?;
        Ok(heartbeats.len())
    }

    /// Removes and returns up to `limit` of the oldest heartbeats.
    ///
    /// Rows that no longer deserialize are dropped with a warning.
    pub fn pop_many(&self, limit: usize) -> Result<Vec<Heartbeat>> {
        let tx = self.conn.unchecked_transaction()?;

        let rows = {
            let mut stmt =
                tx.prepare("SELECT id, heartbeat FROM heartbeats ORDER BY rowid LIMIT ?1")?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            stmt.query_map([limit], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<core::result::Result<Vec<_>, _>>()?
        };

        let mut heartbeats = Vec::with_capacity(rows.len());
        for (id, json) in rows {
            tx.execute("DELETE FROM heartbeats WHERE id = ?1", [&id])?;
            match serde_json::from_str(&json) {
                Ok(h) => heartbeats.push(h),
                Err(e) => warn!("dropping unreadable queued heartbeat {id}: {e}"),
            }
        }

        tx.commit()?;
        Ok(heartbeats)
    }

    /// Number of queued heartbeats.
    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM heartbeats", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or_default())
    }
}

fn insert(conn: &Connection, heartbeat: &Heartbeat) -> Result<()> {
    let json = serde_json::to_string(heartbeat)?;
    conn.execute(
        "INSERT OR REPLACE INTO heartbeats (id, heartbeat, queued_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![heartbeat.id(), json, Timestamp::now().to_string()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::model::EntityType;

    fn heartbeat(entity: &str, time: f64) -> Heartbeat {
        Heartbeat::new(entity, EntityType::File, time)
    }

    fn open(dir: &TempDir) -> Queue {
        Queue::open(&dir.path().join("queue").join("offline.sqlite")).unwrap()
    }

    #[test]
    fn pop_returns_oldest_first_and_removes() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir);
        for i in 0..5 {
            queue.push(&heartbeat(&format!("f{i}.rs"), f64::from(i))).unwrap();
        }

        let popped = queue.pop_many(3).unwrap();

        let entities: Vec<_> = popped.iter().map(|h| h.entity.as_str()).collect();
        assert_eq!(entities, ["f0.rs", "f1.rs", "f2.rs"]);
        assert_eq!(queue.count().unwrap(), 2);
    }

    #[test]
    fn duplicate_heartbeats_collapse() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir);
        let h = heartbeat("main.rs", 10.0);

        queue.push_many(&[h.clone(), h.clone()]).unwrap();
        queue.push(&h).unwrap();

        assert_eq!(queue.count().unwrap(), 1);
        assert_eq!(queue.pop_many(10).unwrap(), [h]);
    }

    #[test]
    fn queue_survives_reopen() {
        let dir = TempDir::new().unwrap();
        open(&dir).push(&heartbeat("a.rs", 1.0)).unwrap();

        let queue = open(&dir);
        assert_eq!(queue.count().unwrap(), 1);
        assert_eq!(queue.pop_many(10).unwrap()[0].entity, "a.rs");
        assert_eq!(queue.pop_many(10).unwrap(), Vec::<Heartbeat>::new());
    }

    #[test]
    fn corrupt_rows_are_dropped() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir);
        queue.push(&heartbeat("good.rs", 1.0)).unwrap();
        queue
            .conn
            .execute(
                "INSERT INTO heartbeats (id, heartbeat, queued_at) VALUES ('x', 'not json', '')",
                [],
            )
            .unwrap();

        let popped = queue.pop_many(10).unwrap();

        assert_eq!(popped.len(), 1);
        assert_eq!(queue.count().unwrap(), 0);
    }

    #[test]
    fn open_fails_when_path_is_a_directory() {
        let dir = TempDir::new().unwrap();
        assert!(Queue::open(dir.path()).is_err());
    }
}
