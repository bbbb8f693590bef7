use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::model::ClassifiedMessage;

/// Destination for classified messages
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn record(&self, message: &ClassifiedMessage) -> Result<()>;
}

/// Records by logging only
pub struct LogRecorder;

#[async_trait]
impl Recorder for LogRecorder {
    async fn record(&self, message: &ClassifiedMessage) -> Result<()> {
        info!("Received message: {}", message);
        Ok(())
    }
}

/// A row of the `classified_messages` table
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct RecordedMessage {
    pub id: String,
    pub origin_name: String,
    pub sender_id: String,
    pub sender_name: String,
    pub subject_id: String,
    pub subject_name: String,
    pub sent_at: String,
    pub reason: String,
    pub text: String,
}

/// SQLite-backed recorder
#[derive(Clone)]
pub struct SqliteRecorder {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecorder {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        Self::run_migrations(&conn)?;

        info!("Recording classified messages to: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS classified_messages (
                id TEXT PRIMARY KEY,
                origin_id TEXT NOT NULL,
                origin_name TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                sender_name TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                subject_name TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                reason TEXT NOT NULL,
                text TEXT NOT NULL,
                recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_classified_messages_subject
                ON classified_messages(subject_id, sent_at);
            ",
        )
        .context("Failed to run migrations")?;
        Ok(())
    }

    /// Most recently sent messages first
    #[cfg(test)]
    pub async fn recent(&self, limit: usize) -> Result<Vec<RecordedMessage>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, origin_name, sender_id, sender_name, subject_id, subject_name,
                    sent_at, reason, text
             FROM classified_messages
             ORDER BY sent_at DESC, rowid DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![limit as i64], |row| {
                Ok(RecordedMessage {
                    id: row.get(0)?,
                    origin_name: row.get(1)?,
                    sender_id: row.get(2)?,
                    sender_name: row.get(3)?,
                    subject_id: row.get(4)?,
                    subject_name: row.get(5)?,
                    sent_at: row.get(6)?,
                    reason: row.get(7)?,
                    text: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to load recorded messages")?;
        Ok(rows)
    }
}

#[async_trait]
impl Recorder for SqliteRecorder {
    async fn record(&self, message: &ClassifiedMessage) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO classified_messages
             (id, origin_id, origin_name, sender_id, sender_name, subject_id, subject_name,
              sent_at, reason, text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                &id,
                &message.origin.id,
                &message.origin.name,
                &message.sender.id,
                &message.sender.name,
                &message.subject.id,
                &message.subject.name,
                message.sent_at.to_rfc3339(),
                &message.reason,
                &message.text,
            ],
        )
        .context("Failed to record classified message")?;
        info!("Recorded message {}: {}", id, message);
        Ok(())
    }
}
