//! Highlight drawer engine: persistence, observable drawer state, launcher and
//! drawer geometry, selection capture and grouped navigation for a
//! browser-extension annotation UI.

pub mod app;
pub mod coalesce;
pub mod config;
pub mod controller;
pub mod dedup;
pub mod errors;
pub mod layout;
pub mod migration;
pub mod models;
pub mod navigator;
pub mod repository;
pub mod selection;
pub mod shortcuts;
pub mod store;

pub use app::DrawerApp;
pub use config::{EngineConfig, LayoutConfig, SelectionConfig};
pub use controller::{DrawerController, DrawerPhase, DrawerState, NoteEdit};
pub use errors::{AppError, AppResult};
pub use models::{Highlight, HighlightPatch, Note, Settings};
pub use repository::HighlightRepository;
pub use selection::{HostPage, SelectionController, SelectionSnapshot};
pub use store::{open_store, KeyValueStore, StorageOptions, StoreBackend};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs JSON logging into a daily-rolling file under `log_dir`.
/// Filtering follows `RUST_LOG`, defaulting to `info`.
pub fn init_tracing(log_dir: &Path) -> AppResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "drawer.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(format!("failed to install log subscriber: {error}")))
}
