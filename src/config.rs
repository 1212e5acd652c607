use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

/// Geometry shared by the launcher and the drawer, in CSS pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutConfig {
    pub edge_margin: f64,
    pub launcher_size: f64,
    pub drawer_width: f64,
    pub drawer_height: f64,
    pub visual_gap: f64,
    /// Pointer travel below which a launcher gesture counts as a click.
    pub drag_threshold: f64,
    /// Extra room required before the drawer flips sides. Zero flips exactly at the threshold.
    pub side_hysteresis: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            edge_margin: 24.0,
            launcher_size: 40.0,
            drawer_width: 376.0,
            drawer_height: 270.0,
            visual_gap: 10.0,
            drag_threshold: 5.0,
            side_hysteresis: 0.0,
        }
    }
}

impl LayoutConfig {
    /// Distance from the launcher center to the near drawer edge.
    pub fn gap(&self) -> f64 {
        self.launcher_size / 2.0 + self.visual_gap
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectionConfig {
    pub settle_delay_ms: u64,
    pub saved_display_ms: u64,
    pub dismiss_ms: u64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub right_edge_reserve: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 10,
            saved_display_ms: 500,
            dismiss_ms: 150,
            offset_x: 8.0,
            offset_y: 12.0,
            right_edge_reserve: 40.0,
        }
    }
}

impl SelectionConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn saved_display(&self) -> Duration {
        Duration::from_millis(self.saved_display_ms)
    }

    pub fn dismiss(&self) -> Duration {
        Duration::from_millis(self.dismiss_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub layout: LayoutConfig,
    pub selection: SelectionConfig,
    pub throttle_interval_ms: u64,
    pub scroll_failsafe_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            layout: LayoutConfig::default(),
            selection: SelectionConfig::default(),
            throttle_interval_ms: 50,
            scroll_failsafe_ms: 800,
        }
    }
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> AppResult<Self> {
        serde_json::from_str(raw).map_err(|err| AppError::InvalidFormat(format!("invalid engine config: {err}")))
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    pub fn scroll_failsafe(&self) -> Duration {
        Duration::from_millis(self.scroll_failsafe_ms)
    }
}
