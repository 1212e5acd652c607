use crate::errors::{AppError, AppResult};
use crate::models::{Highlight, HighlightPatch, Settings};
use crate::navigator::NavDirection;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

static SHORTCUT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(?:ctrl|control|alt|option|shift|cmd|command|meta)\+)+(?:[a-z0-9]|f[1-9]|f1[0-2])$")
        .expect("valid regex")
});

/// A modifier chord such as `Ctrl+Shift+H`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortcut {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
    pub key: String,
}

impl Shortcut {
    pub fn parse(raw: &str) -> AppResult<Self> {
        let compact: String = raw.chars().filter(|ch| !ch.is_whitespace()).collect();
        if !SHORTCUT_PATTERN.is_match(&compact) {
            return Err(AppError::InvalidFormat(format!("unsupported shortcut: {raw}")));
        }

        let mut shortcut = Self {
            ctrl: false,
            alt: false,
            shift: false,
            meta: false,
            key: String::new(),
        };
        let mut parts = compact.split('+').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                shortcut.key = part.to_ascii_uppercase();
                break;
            }
            match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => shortcut.ctrl = true,
                "alt" | "option" => shortcut.alt = true,
                "shift" => shortcut.shift = true,
                _ => shortcut.meta = true,
            }
        }
        Ok(shortcut)
    }

    pub fn ctrl_shift(key: &str) -> Self {
        Self {
            ctrl: true,
            alt: false,
            shift: true,
            meta: false,
            key: key.to_ascii_uppercase(),
        }
    }

    pub fn matches(&self, press: &KeyPress) -> bool {
        self.ctrl == press.ctrl
            && self.alt == press.alt
            && self.shift == press.shift
            && self.meta == press.meta
            && self.key.eq_ignore_ascii_case(&press.key)
    }
}

impl fmt::Display for Shortcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (held, name) in [
            (self.ctrl, "Ctrl"),
            (self.alt, "Alt"),
            (self.shift, "Shift"),
            (self.meta, "Meta"),
        ] {
            if held {
                write!(f, "{name}+")?;
            }
        }
        f.write_str(&self.key)
    }
}

/// A key-down event from the host page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyPress {
    pub key: String,
    #[serde(alias = "ctrlKey")]
    pub ctrl: bool,
    #[serde(alias = "altKey")]
    pub alt: bool,
    #[serde(alias = "shiftKey")]
    pub shift: bool,
    #[serde(alias = "metaKey")]
    pub meta: bool,
}

impl KeyPress {
    pub fn plain(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn ctrl_shift(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ctrl: true,
            shift: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    ToggleDrawer,
    CreateHighlight,
    CloseDrawer,
    Navigate(NavDirection),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShortcutMap {
    pub toggle_drawer: Shortcut,
    pub create_highlight: Shortcut,
}

impl ShortcutMap {
    /// Invalid stored shortcuts fall back to the defaults.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            toggle_drawer: parse_or(&settings.drawer_shortcut, Shortcut::ctrl_shift("D")),
            create_highlight: parse_or(&settings.highlight_shortcut, Shortcut::ctrl_shift("H")),
        }
    }

    pub fn resolve(&self, press: &KeyPress, drawer_open: bool) -> Option<HostCommand> {
        if drawer_open {
            if press.key == "Escape" {
                return Some(HostCommand::CloseDrawer);
            }
            if let Some(direction) = NavDirection::from_key(&press.key) {
                return Some(HostCommand::Navigate(direction));
            }
        }
        if self.toggle_drawer.matches(press) {
            return Some(HostCommand::ToggleDrawer);
        }
        if self.create_highlight.matches(press) {
            return Some(HostCommand::CreateHighlight);
        }
        None
    }
}

impl Default for ShortcutMap {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

fn parse_or(raw: &str, fallback: Shortcut) -> Shortcut {
    Shortcut::parse(raw).unwrap_or_else(|error| {
        tracing::warn!(error = %error, shortcut = %raw, fallback = %fallback, "ignoring invalid shortcut");
        fallback
    })
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightUpdate {
    pub id: String,
    #[serde(flatten)]
    pub patch: HighlightPatch,
}

/// `{ "type": ..., "payload": ... }` messages from the extension's background context.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    ToggleDrawer,
    CreateHighlight,
    SaveHighlight(Highlight),
    DeleteHighlight(String),
    UpdateHighlight(HighlightUpdate),
    GetHighlights,
    UpdateSettings(Value),
}

impl HostMessage {
    pub fn from_value(value: Value) -> AppResult<Self> {
        serde_json::from_value(value).map_err(|err| AppError::InvalidFormat(format!("unrecognized message: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::{HostCommand, HostMessage, KeyPress, Shortcut, ShortcutMap};
    use crate::models::Settings;
    use crate::navigator::NavDirection;
    use serde_json::json;

    #[test]
    fn parses_and_renders_shortcuts() {
        let shortcut = Shortcut::parse("ctrl + shift + h").expect("shortcut");
        assert!(shortcut.ctrl && shortcut.shift && !shortcut.alt && !shortcut.meta);
        assert_eq!(shortcut.key, "H");
        assert_eq!(shortcut.to_string(), "Ctrl+Shift+H");
        assert!(Shortcut::parse("Cmd+Option+F12").expect("shortcut").meta);

        assert!(Shortcut::parse("H").is_err());
        assert!(Shortcut::parse("Ctrl+").is_err());
        assert!(Shortcut::parse("Hyper+K").is_err());
    }

    #[test]
    fn default_map_resolves_commands() {
        let map = ShortcutMap::default();
        assert_eq!(
            map.resolve(&KeyPress::ctrl_shift("d"), false),
            Some(HostCommand::ToggleDrawer)
        );
        assert_eq!(
            map.resolve(&KeyPress::ctrl_shift("H"), false),
            Some(HostCommand::CreateHighlight)
        );
        assert_eq!(map.resolve(&KeyPress::plain("h"), false), None);
        assert_eq!(map.resolve(&KeyPress::plain("Escape"), false), None);
        assert_eq!(
            map.resolve(&KeyPress::plain("Escape"), true),
            Some(HostCommand::CloseDrawer)
        );
        assert_eq!(
            map.resolve(&KeyPress::plain("ArrowUp"), true),
            Some(HostCommand::Navigate(NavDirection::Up))
        );
    }

    #[test]
    fn custom_and_invalid_settings() {
        let settings = Settings {
            drawer_shortcut: "Alt+K".to_string(),
            highlight_shortcut: "nonsense".to_string(),
            ..Settings::default()
        };
        let map = ShortcutMap::from_settings(&settings);
        let alt_k = KeyPress {
            key: "k".to_string(),
            alt: true,
            ..KeyPress::default()
        };
        assert_eq!(map.resolve(&alt_k, false), Some(HostCommand::ToggleDrawer));
        assert_eq!(map.create_highlight.to_string(), "Ctrl+Shift+H");
    }

    #[test]
    fn decodes_background_messages() {
        assert_eq!(
            HostMessage::from_value(json!({ "type": "TOGGLE_DRAWER" })).expect("message"),
            HostMessage::ToggleDrawer
        );
        assert_eq!(
            HostMessage::from_value(json!({ "type": "DELETE_HIGHLIGHT", "payload": "h1" })).expect("message"),
            HostMessage::DeleteHighlight("h1".to_string())
        );
        match HostMessage::from_value(json!({
            "type": "UPDATE_HIGHLIGHT",
            "payload": { "id": "h1", "color": "#2196F3" }
        }))
        .expect("message")
        {
            HostMessage::UpdateHighlight(update) => {
                assert_eq!(update.id, "h1");
                assert_eq!(update.patch.color.as_deref(), Some("#2196F3"));
                assert!(update.patch.notes.is_none());
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert!(HostMessage::from_value(json!({ "type": "REBOOT" })).is_err());

        let press: KeyPress =
            serde_json::from_value(json!({ "key": "d", "ctrlKey": true, "shiftKey": true })).expect("press");
        assert_eq!(press, KeyPress::ctrl_shift("d"));
    }
}
