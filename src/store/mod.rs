pub mod events;
pub mod memory;
pub mod sqlite;

use crate::errors::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

pub use events::{StorageChange, Subscription};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub const HIGHLIGHTS_KEY: &str = "highlights";
pub const SETTINGS_KEY: &str = "settings";
const STORE_FILE_NAME: &str = "drawer.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    /// Durable area shared by every context holding the same handle; publishes changes.
    Synced,
    /// Same-origin fallback for non-extension and test contexts.
    Local,
}

/// Asynchronous key-value area holding opaque JSON values.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    fn backend(&self) -> StoreBackend;

    async fn get(&self, key: &str) -> AppResult<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> AppResult<()>;

    /// Change feed for out-of-context writes. Only the synced backend has one.
    fn changes(&self) -> Option<broadcast::Receiver<StorageChange>> {
        None
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageOptions {
    pub data_dir: Option<PathBuf>,
}

/// Picks the backend once for the whole session.
pub fn open_store(options: &StorageOptions) -> Arc<dyn KeyValueStore> {
    if let Some(dir) = &options.data_dir {
        match SqliteStore::open(&dir.join(STORE_FILE_NAME)) {
            Ok(store) => {
                tracing::info!(path = %store.path().display(), "using synced storage backend");
                return Arc::new(store);
            }
            Err(error) => {
                tracing::warn!(error = %error, "synced storage unavailable; falling back to local storage");
            }
        }
    }
    tracing::info!("using local storage backend");
    Arc::new(MemoryStore::new())
}

#[cfg(test)]
mod tests {
    use super::{open_store, StorageOptions, StoreBackend};

    #[test]
    fn selects_synced_backend_when_data_dir_is_usable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&StorageOptions {
            data_dir: Some(dir.path().to_path_buf()),
        });
        assert_eq!(store.backend(), StoreBackend::Synced);
        assert!(store.changes().is_some());
    }

    #[test]
    fn falls_back_to_local_backend() {
        let store = open_store(&StorageOptions::default());
        assert_eq!(store.backend(), StoreBackend::Local);
        assert!(store.changes().is_none());
    }

    #[test]
    fn falls_back_when_data_dir_cannot_be_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").expect("write blocker");
        let store = open_store(&StorageOptions {
            data_dir: Some(blocker),
        });
        assert_eq!(store.backend(), StoreBackend::Local);
    }
}
