use super::{KeyValueStore, StoreBackend};
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::Duration;

/// In-process fallback area. Keeps read/write counters for diagnostics.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
    available: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
    latency: Option<Duration>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            latency: None,
        }
    }

    /// Every call suspends for `latency` before touching the map.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::new()
        }
    }

    pub fn with_entry(self, key: &str, value: Value) -> Self {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value);
        }
        self
    }

    /// Simulates the backing area disappearing (e.g. an invalidated extension context).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn raw(&self, key: &str) -> Option<Value> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn ensure_available(&self) -> AppResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::StorageUnavailable("local storage area is not accessible".to_string()))
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Local
    }

    async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.ensure_available()?;
        let entries = self
            .entries
            .lock()
            .map_err(|_| AppError::StorageUnavailable("memory store mutex poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> AppResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.ensure_available()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AppError::StorageUnavailable("memory store mutex poisoned".to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
}
