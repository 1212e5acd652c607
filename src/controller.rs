use crate::dedup::SingleFlight;
use crate::models::{Highlight, Note, Point};
use crate::repository::HighlightRepository;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;

const ALL_HIGHLIGHTS: &str = "all-highlights";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DrawerPhase {
    #[default]
    Closed,
    Opening,
    Open,
    Closing,
}

impl DrawerPhase {
    /// Target visibility: true once an open has been requested.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Opening | Self::Open)
    }

    pub fn is_closing(self) -> bool {
        matches!(self, Self::Closing)
    }

    /// Whether the drawer element exists, including during its exit animation.
    pub fn is_mounted(self) -> bool {
        !matches!(self, Self::Closed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawerState {
    pub phase: DrawerPhase,
    pub highlights: Vec<Highlight>,
    pub is_loading: bool,
    pub logo_position: Option<Point>,
    pub selected_highlight_id: Option<String>,
    pub last_added_highlight_id: Option<String>,
    pub collapsed_group_urls: BTreeSet<String>,
}

impl DrawerState {
    pub fn is_open(&self) -> bool {
        self.phase.is_open()
    }

    pub fn highlight(&self, id: &str) -> Option<&Highlight> {
        self.highlights.iter().find(|highlight| highlight.id == id)
    }

    fn highlight_mut(&mut self, id: &str) -> Option<&mut Highlight> {
        self.highlights.iter_mut().find(|highlight| highlight.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteEdit {
    Updated(Note),
    Deleted,
    Unchanged,
    NotFound,
    Failed,
}

/// Owns the in-memory drawer state. Every mutation of the loaded highlight
/// collection goes through here; storage writes happen before the mirror.
pub struct DrawerController {
    repository: Arc<HighlightRepository>,
    state: watch::Sender<DrawerState>,
    loads: SingleFlight<Vec<Highlight>>,
}

impl DrawerController {
    pub fn new(repository: Arc<HighlightRepository>) -> Self {
        let (state, _) = watch::channel(DrawerState::default());
        Self {
            repository,
            state,
            loads: SingleFlight::new(),
        }
    }

    pub fn repository(&self) -> &Arc<HighlightRepository> {
        &self.repository
    }

    pub fn subscribe(&self) -> watch::Receiver<DrawerState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> DrawerState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> DrawerPhase {
        self.state.borrow().phase
    }

    pub fn open_drawer(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.phase.is_open() {
                return false;
            }
            state.phase = DrawerPhase::Opening;
            true
        })
    }

    /// Starts the exit animation and collapses any expanded detail view.
    pub fn close_drawer(&self) -> bool {
        self.state.send_if_modified(|state| {
            if !state.phase.is_open() {
                return false;
            }
            state.phase = DrawerPhase::Closing;
            state.selected_highlight_id = None;
            true
        })
    }

    /// Returns the new target visibility.
    pub fn toggle_drawer(&self) -> bool {
        if self.phase().is_open() {
            self.close_drawer();
            false
        } else {
            self.open_drawer();
            true
        }
    }

    /// Signal from the UI that the enter or exit animation completed.
    pub fn animation_finished(&self) {
        self.state.send_if_modified(|state| {
            let next = match state.phase {
                DrawerPhase::Opening => DrawerPhase::Open,
                DrawerPhase::Closing => DrawerPhase::Closed,
                _ => return false,
            };
            state.phase = next;
            true
        });
    }

    /// Loads every stored highlight into state. Concurrent callers share one read;
    /// a failed read leaves an empty collection.
    pub async fn load_all_highlights(&self) -> Vec<Highlight> {
        let repository = self.repository.clone();
        let state = &self.state;
        self.loads
            .run(ALL_HIGHLIGHTS, || async move {
                state.send_modify(|state| state.is_loading = true);
                let highlights = match repository.get_highlights(None).await {
                    Ok(highlights) => highlights,
                    Err(error) => {
                        tracing::warn!(error = %error, "failed to load highlights");
                        Vec::new()
                    }
                };
                state.send_modify(|state| {
                    state.highlights = highlights.clone();
                    state.is_loading = false;
                });
                highlights
            })
            .await
    }

    pub fn is_load_in_flight(&self) -> bool {
        self.loads.is_in_flight(ALL_HIGHLIGHTS)
    }

    /// Mirrors a collection written elsewhere (another context) into state.
    pub fn replace_highlights(&self, highlights: Vec<Highlight>) {
        self.state.send_modify(|state| {
            if let Some(selected) = &state.selected_highlight_id {
                if !highlights.iter().any(|highlight| &highlight.id == selected) {
                    state.selected_highlight_id = None;
                }
            }
            state.highlights = highlights;
        });
    }

    pub fn select_highlight(&self, id: &str) {
        self.state.send_if_modified(|state| {
            if state.selected_highlight_id.as_deref() == Some(id) {
                return false;
            }
            state.selected_highlight_id = Some(id.to_string());
            true
        });
    }

    pub fn clear_selected_highlight(&self) {
        self.state.send_if_modified(|state| state.selected_highlight_id.take().is_some());
    }

    /// Optimistic append of a highlight the caller already persisted.
    pub fn add_highlight(&self, highlight: Highlight) {
        self.state.send_modify(|state| {
            let id = highlight.id.clone();
            if state.highlight(&id).is_none() {
                state.highlights.push(highlight);
            }
            state.last_added_highlight_id = Some(id);
        });
    }

    pub fn clear_last_added(&self) {
        self.state.send_if_modified(|state| state.last_added_highlight_id.take().is_some());
    }

    pub fn set_logo_position(&self, position: Point) {
        self.state.send_if_modified(|state| {
            if state.logo_position == Some(position) {
                return false;
            }
            state.logo_position = Some(position);
            true
        });
    }

    /// Returns whether the group is collapsed afterwards.
    pub fn toggle_group_collapsed(&self, url: &str) -> bool {
        let mut collapsed = false;
        self.state.send_modify(|state| {
            if state.collapsed_group_urls.remove(url) {
                return;
            }
            state.collapsed_group_urls.insert(url.to_string());
            collapsed = true;
            let selected_in_group = state
                .selected_highlight_id
                .as_deref()
                .and_then(|id| state.highlight(id))
                .is_some_and(|highlight| highlight.url == url);
            if selected_in_group {
                state.selected_highlight_id = None;
            }
        });
        collapsed
    }

    /// Attaches a new note. Blank text is ignored.
    pub async fn add_note(&self, highlight_id: &str, text: &str) -> Option<Note> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let note = Note::new(text);
        match self.repository.add_note_to_highlight(highlight_id, note.clone()).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(error) => {
                tracing::warn!(error = %error, highlight_id = %highlight_id, "failed to add note");
                return None;
            }
        }
        self.state.send_modify(|state| {
            if let Some(highlight) = state.highlight_mut(highlight_id) {
                if highlight.note(&note.id).is_none() {
                    highlight.push_note(note.clone());
                }
            }
        });
        Some(note)
    }

    /// Blank text deletes the note, identical text leaves it alone, anything else
    /// replaces the text and keeps the creation timestamp.
    pub async fn update_note(&self, highlight_id: &str, note_id: &str, text: &str) -> NoteEdit {
        let text = text.trim();
        if text.is_empty() {
            return if self.delete_note(highlight_id, note_id).await {
                NoteEdit::Deleted
            } else {
                NoteEdit::NotFound
            };
        }

        let current = match self.current_note(highlight_id, note_id).await {
            Some(note) => note,
            None => return NoteEdit::NotFound,
        };
        if current.text == text {
            return NoteEdit::Unchanged;
        }

        match self
            .repository
            .update_note_in_highlight(highlight_id, note_id, text)
            .await
        {
            Ok(true) => {}
            Ok(false) => return NoteEdit::NotFound,
            Err(error) => {
                tracing::warn!(error = %error, highlight_id = %highlight_id, note_id = %note_id, "failed to update note");
                return NoteEdit::Failed;
            }
        }
        self.state.send_modify(|state| {
            if let Some(highlight) = state.highlight_mut(highlight_id) {
                highlight.set_note_text(note_id, text);
            }
        });
        NoteEdit::Updated(Note {
            text: text.to_string(),
            ..current
        })
    }

    pub async fn delete_note(&self, highlight_id: &str, note_id: &str) -> bool {
        match self
            .repository
            .delete_note_from_highlight(highlight_id, note_id)
            .await
        {
            Ok(removed) => {
                let mirrored = self.state.send_if_modified(|state| {
                    state
                        .highlight_mut(highlight_id)
                        .is_some_and(|highlight| highlight.remove_note(note_id))
                });
                removed || mirrored
            }
            Err(error) => {
                tracing::warn!(error = %error, highlight_id = %highlight_id, note_id = %note_id, "failed to delete note");
                false
            }
        }
    }

    pub async fn delete_highlight(&self, highlight_id: &str) -> bool {
        match self.repository.delete_highlight(highlight_id).await {
            Ok(removed) => {
                let mirrored = self.state.send_if_modified(|state| {
                    let before = state.highlights.len();
                    state.highlights.retain(|highlight| highlight.id != highlight_id);
                    if state.selected_highlight_id.as_deref() == Some(highlight_id) {
                        state.selected_highlight_id = None;
                    }
                    if state.last_added_highlight_id.as_deref() == Some(highlight_id) {
                        state.last_added_highlight_id = None;
                    }
                    state.highlights.len() != before
                });
                removed || mirrored
            }
            Err(error) => {
                tracing::warn!(error = %error, highlight_id = %highlight_id, "failed to delete highlight");
                false
            }
        }
    }

    async fn current_note(&self, highlight_id: &str, note_id: &str) -> Option<Note> {
        let in_memory = self
            .state
            .borrow()
            .highlight(highlight_id)
            .and_then(|highlight| highlight.note(note_id).cloned());
        if in_memory.is_some() {
            return in_memory;
        }
        match self.repository.get_highlight_by_id(highlight_id).await {
            Ok(highlight) => highlight.and_then(|highlight| highlight.note(note_id).cloned()),
            Err(error) => {
                tracing::warn!(error = %error, highlight_id = %highlight_id, "failed to read highlight");
                None
            }
        }
    }
}
