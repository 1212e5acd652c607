use crate::errors::{AppError, AppResult};
use crate::migration::{decode_collection, decode_record};
use crate::models::{ExportDocument, Highlight, HighlightPatch, ImportSummary, Note, Settings};
use crate::store::{KeyValueStore, StoreBackend, Subscription, HIGHLIGHTS_KEY, SETTINGS_KEY};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Highlight and settings persistence over a [`KeyValueStore`].
///
/// Every mutation rewrites the whole `highlights` value. Mutations that do not
/// find their target are silent no-ops and report `false`.
pub struct HighlightRepository {
    store: Arc<dyn KeyValueStore>,
}

impl HighlightRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn backend(&self) -> StoreBackend {
        self.store.backend()
    }

    async fn read_collection(&self) -> AppResult<Vec<Highlight>> {
        let raw = self.store.get(HIGHLIGHTS_KEY).await?;
        let decoded = decode_collection(raw);
        if decoded.needs_write_back() {
            self.write_collection(&decoded.highlights).await?;
            tracing::info!(
                migrated = decoded.migrated,
                dropped = decoded.dropped,
                "rewrote stored highlights in current shape"
            );
        }
        Ok(decoded.highlights)
    }

    async fn write_collection(&self, highlights: &[Highlight]) -> AppResult<()> {
        self.store
            .set(HIGHLIGHTS_KEY, serde_json::to_value(highlights)?)
            .await
    }

    /// Locates one highlight, applies `edit`, and rewrites the collection if it changed.
    async fn modify_highlight<F>(&self, id: &str, edit: F) -> AppResult<bool>
    where
        F: FnOnce(&mut Highlight) -> bool,
    {
        let mut highlights = self.read_collection().await?;
        let Some(highlight) = highlights.iter_mut().find(|highlight| highlight.id == id) else {
            return Ok(false);
        };
        if !edit(highlight) {
            return Ok(false);
        }
        self.write_collection(&highlights).await?;
        Ok(true)
    }

    pub async fn save_highlight(&self, highlight: Highlight) -> AppResult<()> {
        let mut highlights = self.read_collection().await?;
        highlights.push(highlight);
        self.write_collection(&highlights).await
    }

    pub async fn get_highlights(&self, url_filter: Option<&str>) -> AppResult<Vec<Highlight>> {
        let highlights = self.read_collection().await?;
        Ok(match url_filter {
            Some(url) => highlights
                .into_iter()
                .filter(|highlight| highlight.url == url)
                .collect(),
            None => highlights,
        })
    }

    pub async fn get_highlight_by_id(&self, id: &str) -> AppResult<Option<Highlight>> {
        Ok(self
            .read_collection()
            .await?
            .into_iter()
            .find(|highlight| highlight.id == id))
    }

    pub async fn update_highlight(&self, id: &str, patch: &HighlightPatch) -> AppResult<bool> {
        self.modify_highlight(id, |highlight| {
            highlight.apply_patch(patch);
            true
        })
        .await
    }

    pub async fn delete_highlight(&self, id: &str) -> AppResult<bool> {
        let mut highlights = self.read_collection().await?;
        let before = highlights.len();
        highlights.retain(|highlight| highlight.id != id);
        if highlights.len() == before {
            return Ok(false);
        }
        self.write_collection(&highlights).await?;
        Ok(true)
    }

    pub async fn delete_highlights_by_url(&self, url: &str) -> AppResult<usize> {
        let mut highlights = self.read_collection().await?;
        let before = highlights.len();
        highlights.retain(|highlight| highlight.url != url);
        let removed = before - highlights.len();
        if removed > 0 {
            self.write_collection(&highlights).await?;
        }
        Ok(removed)
    }

    pub async fn add_note_to_highlight(&self, highlight_id: &str, note: Note) -> AppResult<bool> {
        if note.id.trim().is_empty() {
            return Err(AppError::InvalidNote("note id must not be empty".to_string()));
        }
        self.modify_highlight(highlight_id, |highlight| {
            if highlight.note(&note.id).is_some() {
                return false;
            }
            highlight.push_note(note);
            true
        })
        .await
    }

    pub async fn update_note_in_highlight(
        &self,
        highlight_id: &str,
        note_id: &str,
        text: &str,
    ) -> AppResult<bool> {
        self.modify_highlight(highlight_id, |highlight| highlight.set_note_text(note_id, text))
            .await
    }

    pub async fn delete_note_from_highlight(&self, highlight_id: &str, note_id: &str) -> AppResult<bool> {
        self.modify_highlight(highlight_id, |highlight| highlight.remove_note(note_id))
            .await
    }

    pub async fn export_highlights(&self) -> AppResult<String> {
        let document = ExportDocument::new(self.read_collection().await?);
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Merges a document's `highlights` into the store. On an id collision the
    /// record already stored wins, because existing records come first and the
    /// first occurrence of each id is kept. Records that decode as neither the
    /// current nor the legacy shape are skipped and counted.
    pub async fn import_highlights(&self, json: &str) -> AppResult<ImportSummary> {
        let document: Value = serde_json::from_str(json)
            .map_err(|err| AppError::InvalidFormat(format!("import is not valid JSON: {err}")))?;
        let Some(Value::Array(items)) = document.get("highlights") else {
            return Err(AppError::InvalidFormat(
                "import document has no `highlights` list".to_string(),
            ));
        };

        let mut incoming = Vec::with_capacity(items.len());
        let mut skipped_invalid = 0;
        for (index, item) in items.iter().enumerate() {
            match decode_record(item.clone()) {
                Ok(record) => incoming.push(record.into_highlight()),
                Err(error) => {
                    tracing::warn!(index, error = %error, "skipping malformed imported highlight");
                    skipped_invalid += 1;
                }
            }
        }

        let mut seen = HashSet::new();
        let mut merged: Vec<Highlight> = self
            .read_collection()
            .await?
            .into_iter()
            .filter(|highlight| seen.insert(highlight.id.clone()))
            .collect();
        let mut imported = 0;
        let mut skipped_duplicates = 0;
        for highlight in incoming {
            if seen.insert(highlight.id.clone()) {
                merged.push(highlight);
                imported += 1;
            } else {
                skipped_duplicates += 1;
            }
        }

        self.write_collection(&merged).await?;
        tracing::info!(imported, skipped_duplicates, skipped_invalid, "imported highlights");
        Ok(ImportSummary {
            imported,
            skipped_duplicates,
            skipped_invalid,
            total: merged.len(),
        })
    }

    pub async fn clear_all_highlights(&self) -> AppResult<()> {
        self.write_collection(&[]).await
    }

    /// Writes `records` only when nothing is stored yet.
    pub async fn seed_if_empty(&self, records: Vec<Highlight>) -> AppResult<bool> {
        if !self.read_collection().await?.is_empty() {
            return Ok(false);
        }
        self.write_collection(&records).await?;
        Ok(true)
    }

    pub async fn get_settings(&self) -> AppResult<Settings> {
        let raw = self.store.get(SETTINGS_KEY).await?;
        Ok(settings_from_stored(raw))
    }

    /// Deep-merges `update` into the current settings and stores the result.
    pub async fn update_settings(&self, update: Value) -> AppResult<Settings> {
        let current = self.get_settings().await?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: Settings = serde_json::from_value(merged)
            .map_err(|err| AppError::InvalidFormat(format!("invalid settings update: {err}")))?;
        self.store
            .set(SETTINGS_KEY, serde_json::to_value(&settings)?)
            .await?;
        Ok(settings)
    }

    pub fn on_highlights_changed(&self) -> Option<Subscription<Vec<Highlight>>> {
        self.store
            .changes()
            .map(|receiver| Subscription::new(receiver, HIGHLIGHTS_KEY, decode_highlights_change))
    }

    pub fn on_settings_changed(&self) -> Option<Subscription<Settings>> {
        self.store
            .changes()
            .map(|receiver| Subscription::new(receiver, SETTINGS_KEY, decode_settings_change))
    }
}

fn decode_highlights_change(value: Value) -> Option<Vec<Highlight>> {
    Some(decode_collection(Some(value)).highlights)
}

fn decode_settings_change(value: Value) -> Option<Settings> {
    Some(settings_from_stored(Some(value)))
}

fn settings_from_stored(raw: Option<Value>) -> Settings {
    let Some(raw) = raw else {
        return Settings::default();
    };
    let mut merged = match serde_json::to_value(Settings::default()) {
        Ok(value) => value,
        Err(_) => return Settings::default(),
    };
    merge_json(&mut merged, raw);
    serde_json::from_value(merged).unwrap_or_else(|error| {
        tracing::warn!(error = %error, "stored settings are invalid; using defaults");
        Settings::default()
    })
}

fn merge_json(target: &mut Value, update: Value) {
    match (target, update) {
        (Value::Object(target_map), Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
