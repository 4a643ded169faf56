use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use rusqlite_migration::{Migrations, M};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{MessageStore, StoreError};
use crate::types::ChatMessage;

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for StoreError {
    fn from(e: rusqlite_migration::Error) -> Self {
        StoreError::Unavailable(format!("migration failed: {}", e))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Unavailable(format!("storage task failed: {}", e))
    }
}

/// `date_time` is stored as RFC 3339 text in UTC
fn to_rfc3339(date_time: &DateTime<Utc>) -> String {
    date_time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_rfc3339(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))
}

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "CREATE TABLE messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    message TEXT NOT NULL,
    date_time TEXT NOT NULL,
    date_time_ms INTEGER NOT NULL
);

CREATE INDEX idx_messages_date_time ON messages(date_time_ms DESC, id DESC);",
    )])
}

/// SQLite-backed store.
///
/// rusqlite is synchronous, so every call runs on the blocking pool and the
/// connection sits behind a std mutex.
#[derive(Clone)]
pub struct SqliteMessageStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMessageStore {
    /// Open (or create) the database file and bring the schema up to date
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        tracing::info!("Message store opened at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, StoreError> {
        // In-memory databases answer "memory" here
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(journal_mode = %mode, "SQLite journal mode set");
        migrations().to_latest(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("connection lock poisoned: {}", e)))?;
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(&self, message: ChatMessage) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO messages (user_id, name, message, date_time, date_time_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.user_id,
                    message.name,
                    message.message,
                    to_rfc3339(&message.date_time),
                    message.date_time.timestamp_millis()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, name, message, date_time FROM messages
                 ORDER BY date_time_ms DESC, id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                Ok(ChatMessage {
                    user_id: row.get(0)?,
                    name: row.get(1)?,
                    message: row.get(2)?,
                    date_time: parse_rfc3339(&row.get::<_, String>(3)?)?,
                })
            })?;
            let messages = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
    }
}
