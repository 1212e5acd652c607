use super::events::{ChangeFeed, StorageChange};
use super::{KeyValueStore, StoreBackend};
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::broadcast;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Durable key-value area backed by a single SQLite table.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    feed: ChangeFeed,
}

impl SqliteStore {
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::StorageUnavailable(err.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
            feed: ChangeFeed::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn read(&self, key: &str) -> AppResult<Option<Value>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AppError::StorageUnavailable("database mutex poisoned".to_string()))?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM kv_entries WHERE key = ?1",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        raw.map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|err| AppError::StorageUnavailable(format!("stored value for {key} is not JSON: {err}")))
        })
        .transpose()
    }

    fn write(&self, key: &str, value: &Value) -> AppResult<()> {
        let value_json = serde_json::to_string(value)?;
        let conn = self
            .conn
            .lock()
            .map_err(|_| AppError::StorageUnavailable("database mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO kv_entries (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![key, value_json, Utc::now()],
        )?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Synced
    }

    async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        self.read(key)
    }

    async fn set(&self, key: &str, value: Value) -> AppResult<()> {
        self.write(key, &value)?;
        self.feed.publish(StorageChange {
            key: key.to_string(),
            new_value: value,
        });
        Ok(())
    }

    fn changes(&self) -> Option<broadcast::Receiver<StorageChange>> {
        Some(self.feed.subscribe())
    }
}
