//! Decoding of stored highlight records.
//!
//! Records written by early builds carry a single optional `note` string
//! instead of the `notes` array. Each record is decoded as the current shape
//! first and as the legacy shape second; legacy records are converted by
//! [`migrate_legacy`], which is pure so it can be tested without storage.

use crate::models::{default_color, Highlight, HighlightPosition, Note};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyHighlight {
    pub id: String,
    pub text: String,
    pub url: String,
    #[serde(default)]
    pub page_title: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default = "default_color")]
    pub color: String,
    pub timestamp: i64,
    #[serde(default)]
    pub position: HighlightPosition,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredHighlight {
    Current(Highlight),
    Legacy(LegacyHighlight),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedRecord {
    Current(Highlight),
    Migrated(Highlight),
}

impl DecodedRecord {
    pub fn into_highlight(self) -> Highlight {
        match self {
            Self::Current(highlight) | Self::Migrated(highlight) => highlight,
        }
    }

    pub fn was_migrated(&self) -> bool {
        matches!(self, Self::Migrated(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedCollection {
    pub highlights: Vec<Highlight>,
    pub migrated: usize,
    pub dropped: usize,
}

impl DecodedCollection {
    pub fn needs_write_back(&self) -> bool {
        self.migrated > 0 || self.dropped > 0
    }
}

/// Converts a legacy record. A blank or missing note becomes an empty `notes` list.
pub fn migrate_legacy(legacy: LegacyHighlight) -> Highlight {
    let notes = legacy
        .note
        .filter(|text| !text.trim().is_empty())
        .map(|text| {
            vec![Note {
                id: format!("{}-note", legacy.id),
                text,
                timestamp: legacy.timestamp,
            }]
        })
        .unwrap_or_default();

    Highlight {
        id: legacy.id,
        text: legacy.text,
        url: legacy.url,
        page_title: legacy.page_title,
        notes,
        color: legacy.color,
        timestamp: legacy.timestamp,
        position: legacy.position,
    }
}

pub fn decode_record(value: Value) -> Result<DecodedRecord, serde_json::Error> {
    match serde_json::from_value::<StoredHighlight>(value)? {
        StoredHighlight::Current(highlight) => Ok(DecodedRecord::Current(highlight)),
        StoredHighlight::Legacy(legacy) => Ok(DecodedRecord::Migrated(migrate_legacy(legacy))),
    }
}

/// Decodes the raw `highlights` value. Records matching neither shape are dropped.
pub fn decode_collection(raw: Option<Value>) -> DecodedCollection {
    let items = match raw {
        None | Some(Value::Null) => return DecodedCollection::default(),
        Some(Value::Array(items)) => items,
        Some(other) => {
            tracing::warn!(kind = %value_kind(&other), "stored highlights value is not a list; ignoring");
            return DecodedCollection {
                dropped: 1,
                ..DecodedCollection::default()
            };
        }
    };

    let mut decoded = DecodedCollection::default();
    for item in items {
        match decode_record(item) {
            Ok(record) => {
                if record.was_migrated() {
                    decoded.migrated += 1;
                }
                decoded.highlights.push(record.into_highlight());
            }
            Err(error) => {
                tracing::warn!(error = %error, "dropping undecodable highlight record");
                decoded.dropped += 1;
            }
        }
    }
    decoded
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
