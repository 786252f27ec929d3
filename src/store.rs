//! Persisted channel values, one 512-entry array per sender id.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::frame::CHANNEL_COUNT;

/// Key/value storage for sender frames.
///
/// `load` hands back whatever was stored; `ChannelFrame::restore` decides
/// whether it is usable.
#[async_trait]
pub trait FrameStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Vec<i64>>, StoreError>;

    async fn save(&self, id: &str, values: &[u8; CHANNEL_COUNT]) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryFrameStore {
    frames: Mutex<HashMap<String, Vec<i64>>>,
}

impl MemoryFrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a raw entry, valid or not.
    pub async fn insert_raw(&self, id: &str, values: Vec<i64>) {
        self.frames.lock().await.insert(id.to_string(), values);
    }
}

#[async_trait]
impl FrameStore for MemoryFrameStore {
    async fn load(&self, id: &str) -> Result<Option<Vec<i64>>, StoreError> {
        Ok(self.frames.lock().await.get(id).cloned())
    }

    async fn save(&self, id: &str, values: &[u8; CHANNEL_COUNT]) -> Result<(), StoreError> {
        let values = values.iter().map(|v| i64::from(*v)).collect();
        self.frames.lock().await.insert(id.to_string(), values);
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct FrameRow {
    values_json: String,
}

pub struct SqliteFrameStore {
    pool: SqlitePool,
}

impl SqliteFrameStore {
    /// Opens (or creates) a store file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Store living only as long as this value.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // A single connection that is never recycled keeps the database alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS frames (
                id TEXT PRIMARY KEY,
                values_json TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl FrameStore for SqliteFrameStore {
    async fn load(&self, id: &str) -> Result<Option<Vec<i64>>, StoreError> {
        let row = sqlx::query_as::<_, FrameRow>("SELECT values_json FROM frames WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.values_json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, id: &str, values: &[u8; CHANNEL_COUNT]) -> Result<(), StoreError> {
        let values_json = serde_json::to_string(&values[..])?;
        sqlx::query(
            "INSERT INTO frames (id, values_json) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET values_json = excluded.values_json,
             updated_at = datetime('now')",
        )
        .bind(id)
        .bind(values_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
