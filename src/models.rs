use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const EXPORT_VERSION: &str = "1.0";
pub const DEFAULT_HIGHLIGHT_COLOR: &str = "#FFEB3B";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HighlightColor {
    Yellow,
    Green,
    Blue,
    Pink,
    Purple,
}

impl HighlightColor {
    pub const ALL: [Self; 5] = [Self::Yellow, Self::Green, Self::Blue, Self::Pink, Self::Purple];

    pub fn hex(self) -> &'static str {
        match self {
            Self::Yellow => "#FFEB3B",
            Self::Green => "#4CAF50",
            Self::Blue => "#2196F3",
            Self::Pink => "#E91E63",
            Self::Purple => "#9C27B0",
        }
    }

    pub fn from_hex(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|color| color.hex().eq_ignore_ascii_case(raw.trim()))
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Screen-space rectangle as reported by the host page for a selection range.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub text: String,
    pub timestamp: i64,
}

impl Note {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            timestamp: now_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextContext {
    pub before: String,
    pub after: String,
}

/// DOM anchor descriptor. Always zeroed today; carried through storage untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HighlightPosition {
    pub start_x_path: String,
    pub end_x_path: String,
    pub start_offset: u32,
    pub end_offset: u32,
    pub text_context: TextContext,
}

pub(crate) fn default_color() -> String {
    DEFAULT_HIGHLIGHT_COLOR.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub id: String,
    pub text: String,
    pub url: String,
    #[serde(default)]
    pub page_title: String,
    pub notes: Vec<Note>,
    #[serde(default = "default_color")]
    pub color: String,
    pub timestamp: i64,
    #[serde(default)]
    pub position: HighlightPosition,
}

impl Highlight {
    pub fn new(
        text: impl Into<String>,
        url: impl Into<String>,
        page_title: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            url: url.into(),
            page_title: page_title.into(),
            notes: Vec::new(),
            color: color.into(),
            timestamp: now_millis(),
            position: HighlightPosition::default(),
        }
    }

    /// Merges the mutable fields of `patch`. Identity, text, url and timestamp never change.
    pub fn apply_patch(&mut self, patch: &HighlightPatch) {
        if let Some(page_title) = &patch.page_title {
            self.page_title = page_title.clone();
        }
        if let Some(notes) = &patch.notes {
            self.notes = notes.clone();
        }
        if let Some(color) = &patch.color {
            self.color = color.clone();
        }
        if let Some(position) = &patch.position {
            self.position = position.clone();
        }
    }

    pub fn push_note(&mut self, note: Note) {
        self.notes.push(note);
    }

    /// Replaces a note's text, keeping its creation timestamp.
    pub fn set_note_text(&mut self, note_id: &str, text: &str) -> bool {
        match self.notes.iter_mut().find(|note| note.id == note_id) {
            Some(note) => {
                note.text = text.to_string();
                true
            }
            None => false,
        }
    }

    pub fn remove_note(&mut self, note_id: &str) -> bool {
        let before = self.notes.len();
        self.notes.retain(|note| note.id != note_id);
        self.notes.len() != before
    }

    pub fn note(&self, note_id: &str) -> Option<&Note> {
        self.notes.iter().find(|note| note.id == note_id)
    }

    /// Detail-view ordering: newest note first.
    pub fn notes_newest_first(&self) -> Vec<Note> {
        let mut notes = self.notes.clone();
        notes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        notes
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightPatch {
    pub page_title: Option<String>,
    pub notes: Option<Vec<Note>>,
    pub color: Option<String>,
    pub position: Option<HighlightPosition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub drawer_position: Point,
    pub drawer_visible: bool,
    pub default_color: String,
    pub highlight_shortcut: String,
    pub drawer_shortcut: String,
    pub auto_sync: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_endpoint: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            drawer_position: Point::default(),
            drawer_visible: true,
            default_color: DEFAULT_HIGHLIGHT_COLOR.to_string(),
            highlight_shortcut: "Ctrl+Shift+H".to_string(),
            drawer_shortcut: "Ctrl+Shift+D".to_string(),
            auto_sync: false,
            sync_endpoint: None,
        }
    }
}

impl Settings {
    pub fn default_for_viewport(viewport: Size) -> Self {
        Self {
            drawer_position: Point::new(viewport.width - 420.0, viewport.height - 600.0),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub total_count: usize,
    pub page_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub version: String,
    pub export_date: String,
    pub highlights: Vec<Highlight>,
    pub metadata: ExportMetadata,
}

impl ExportDocument {
    pub fn new(highlights: Vec<Highlight>) -> Self {
        let page_count = highlights
            .iter()
            .map(|highlight| highlight.url.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        Self {
            version: EXPORT_VERSION.to_string(),
            export_date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            metadata: ExportMetadata {
                total_count: highlights.len(),
                page_count,
            },
            highlights,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped_duplicates: usize,
    pub skipped_invalid: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub url: String,
    pub title: String,
}
