//! Turns a finished text selection into a saved highlight.
//!
//! The affordance moves `Idle -> Pending -> Saving -> Saved -> Dismissing -> Idle`.
//! Scrolling only cancels `Pending`; the success feedback always runs out.

use crate::config::SelectionConfig;
use crate::controller::DrawerController;
use crate::errors::AppResult;
use crate::models::{Highlight, PageInfo, Point, Rect, Size, DEFAULT_HIGHLIGHT_COLOR};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// A text selection as reported by the host page.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionSnapshot {
    pub text: String,
    pub bounds: Rect,
    /// The selection's common ancestor lives inside the drawer.
    pub inside_drawer: bool,
}

/// Capabilities consumed from the page the engine is mounted on.
pub trait HostPage: Send + Sync {
    fn current_selection(&self) -> Option<SelectionSnapshot>;
    fn clear_selection(&self);
    fn viewport(&self) -> Size;
    fn page(&self) -> PageInfo;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AffordancePhase {
    #[default]
    Idle,
    Pending,
    Saving,
    Saved,
    Dismissing,
}

impl AffordancePhase {
    fn is_feedback(self) -> bool {
        matches!(self, Self::Saving | Self::Saved | Self::Dismissing)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AffordanceState {
    pub phase: AffordancePhase,
    pub anchor: Option<Point>,
    pub text: String,
}

impl AffordanceState {
    pub fn is_visible(&self) -> bool {
        self.phase != AffordancePhase::Idle
    }

    fn hidden() -> Self {
        Self::default()
    }
}

pub struct SelectionController {
    config: SelectionConfig,
    host: Arc<dyn HostPage>,
    controller: Arc<DrawerController>,
    state: watch::Sender<AffordanceState>,
    generation: AtomicU64,
}

impl SelectionController {
    pub fn new(config: SelectionConfig, host: Arc<dyn HostPage>, controller: Arc<DrawerController>) -> Self {
        let (state, _) = watch::channel(AffordanceState::default());
        Self {
            config,
            host,
            controller,
            state,
            generation: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AffordanceState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> AffordanceState {
        self.state.borrow().clone()
    }

    /// Pointer release anywhere on the page. Releases on the affordance itself are ignored.
    pub async fn on_pointer_up(&self, on_affordance: bool) -> bool {
        if on_affordance {
            return self.snapshot().is_visible();
        }
        tokio::time::sleep(self.config.settle_delay()).await;
        self.evaluate_selection()
    }

    /// Shows or hides the affordance for the current selection. Returns visibility.
    pub fn evaluate_selection(&self) -> bool {
        if self.state.borrow().phase.is_feedback() {
            return true;
        }

        let candidate = self
            .host
            .current_selection()
            .map(|selection| (selection.text.trim().to_string(), selection))
            .filter(|(text, selection)| {
                !text.is_empty() && !selection.inside_drawer && !selection.bounds.is_empty()
            });

        let Some((text, selection)) = candidate else {
            self.bump_generation();
            self.state.send_if_modified(|state| {
                if state.phase == AffordancePhase::Idle {
                    return false;
                }
                *state = AffordanceState::hidden();
                true
            });
            return false;
        };

        let anchor = self.anchor_for(selection.bounds, self.host.viewport());
        self.bump_generation();
        self.state.send_replace(AffordanceState {
            phase: AffordancePhase::Pending,
            anchor: Some(anchor),
            text,
        });
        true
    }

    fn anchor_for(&self, bounds: Rect, viewport: Size) -> Point {
        Point::new(
            (bounds.right() + self.config.offset_x).min(viewport.width - self.config.right_edge_reserve),
            bounds.bottom() - self.config.offset_y,
        )
    }

    /// Any page scroll. Returns whether a pending affordance was cancelled.
    pub fn on_scroll(&self) -> bool {
        let cancelled = self.state.send_if_modified(|state| {
            if state.phase != AffordancePhase::Pending {
                return false;
            }
            *state = AffordanceState::hidden();
            true
        });
        if cancelled {
            self.bump_generation();
        }
        cancelled
    }

    /// Saves the pending selection. A second confirm while saving is a no-op.
    pub async fn confirm(self: &Arc<Self>) -> Option<Highlight> {
        let mut text = String::new();
        let claimed = self.state.send_if_modified(|state| {
            if state.phase != AffordancePhase::Pending {
                return false;
            }
            state.phase = AffordancePhase::Saving;
            text = state.text.clone();
            true
        });
        if !claimed {
            return None;
        }

        match self.save_text(&text).await {
            Ok(highlight) => {
                self.state.send_modify(|state| state.phase = AffordancePhase::Saved);
                self.host.clear_selection();
                self.schedule_dismiss();
                Some(highlight)
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to save highlight");
                self.bump_generation();
                self.state.send_replace(AffordanceState::hidden());
                None
            }
        }
    }

    /// Keyboard path: saves whatever is selected without going through the affordance.
    pub async fn highlight_current_selection(&self) -> Option<Highlight> {
        if self.state.borrow().phase == AffordancePhase::Saving {
            return None;
        }
        let selection = self.host.current_selection()?;
        let text = selection.text.trim();
        if text.is_empty() || selection.inside_drawer {
            return None;
        }

        match self.save_text(text).await {
            Ok(highlight) => {
                self.host.clear_selection();
                self.on_scroll();
                Some(highlight)
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to save highlight from shortcut");
                None
            }
        }
    }

    async fn save_text(&self, text: &str) -> AppResult<Highlight> {
        let repository = self.controller.repository();
        let color = match repository.get_settings().await {
            Ok(settings) => settings.default_color,
            Err(error) => {
                tracing::warn!(error = %error, "settings unavailable, using default color");
                DEFAULT_HIGHLIGHT_COLOR.to_string()
            }
        };
        let page = self.host.page();
        let highlight = Highlight::new(text, page.url, page.title, color);
        repository.save_highlight(highlight.clone()).await?;
        tracing::info!(highlight_id = %highlight.id, url = %highlight.url, "saved highlight");

        if self.controller.snapshot().is_open() {
            self.controller.add_highlight(highlight.clone());
        }
        Ok(highlight)
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn schedule_dismiss(self: &Arc<Self>) {
        let generation = self.bump_generation();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.config.saved_display()).await;
            if !this.advance(generation, AffordancePhase::Saved, AffordancePhase::Dismissing) {
                return;
            }
            tokio::time::sleep(this.config.dismiss()).await;
            if this.generation.load(Ordering::SeqCst) == generation {
                this.state.send_if_modified(|state| {
                    if state.phase != AffordancePhase::Dismissing {
                        return false;
                    }
                    *state = AffordanceState::hidden();
                    true
                });
            }
        });
    }

    fn advance(&self, generation: u64, from: AffordancePhase, to: AffordancePhase) -> bool {
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        self.state.send_if_modified(|state| {
            if state.phase != from {
                return false;
            }
            state.phase = to;
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{AffordancePhase, HostPage, SelectionController, SelectionSnapshot};
    use crate::config::SelectionConfig;
    use crate::controller::DrawerController;
    use crate::models::{PageInfo, Point, Rect, Size};
    use crate::repository::HighlightRepository;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Duration;

    struct FakePage {
        selection: Mutex<Option<SelectionSnapshot>>,
        cleared: AtomicBool,
    }

    impl FakePage {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                selection: Mutex::new(None),
                cleared: AtomicBool::new(false),
            })
        }

        fn select(&self, text: &str, bounds: Rect) {
            *self.selection.lock().expect("selection lock") = Some(SelectionSnapshot {
                text: text.to_string(),
                bounds,
                inside_drawer: false,
            });
            self.cleared.store(false, Ordering::SeqCst);
        }
    }

    impl HostPage for FakePage {
        fn current_selection(&self) -> Option<SelectionSnapshot> {
            self.selection.lock().expect("selection lock").clone()
        }

        fn clear_selection(&self) {
            *self.selection.lock().expect("selection lock") = None;
            self.cleared.store(true, Ordering::SeqCst);
        }

        fn viewport(&self) -> Size {
            Size::new(1000.0, 800.0)
        }

        fn page(&self) -> PageInfo {
            PageInfo {
                url: "https://a.test/".to_string(),
                title: "A test".to_string(),
            }
        }
    }

    fn build(store: Arc<MemoryStore>) -> (Arc<FakePage>, Arc<DrawerController>, Arc<SelectionController>) {
        let page = FakePage::new();
        let controller = Arc::new(DrawerController::new(Arc::new(HighlightRepository::new(store))));
        let selection = Arc::new(SelectionController::new(
            SelectionConfig::default(),
            page.clone(),
            controller.clone(),
        ));
        (page, controller, selection)
    }

    #[tokio::test(start_paused = true)]
    async fn affordance_sits_bottom_right_of_selection() {
        let (page, _, selection) = build(Arc::new(MemoryStore::new()));

        page.select("  hello world ", Rect::new(100.0, 200.0, 50.0, 20.0));
        assert!(selection.on_pointer_up(false).await);
        let state = selection.snapshot();
        assert_eq!(state.phase, AffordancePhase::Pending);
        assert_eq!(state.anchor, Some(Point::new(158.0, 208.0)));
        assert_eq!(state.text, "hello world");

        page.select("edge", Rect::new(900.0, 100.0, 90.0, 20.0));
        assert!(selection.on_pointer_up(false).await);
        assert_eq!(selection.snapshot().anchor, Some(Point::new(960.0, 108.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn unusable_selections_hide_affordance() {
        let (page, _, selection) = build(Arc::new(MemoryStore::new()));
        page.select("text", Rect::new(10.0, 10.0, 40.0, 10.0));
        assert!(selection.on_pointer_up(false).await);

        page.select("   ", Rect::new(10.0, 10.0, 40.0, 10.0));
        assert!(!selection.on_pointer_up(false).await);
        assert!(!selection.snapshot().is_visible());

        page.select("text", Rect::new(10.0, 10.0, 0.0, 0.0));
        assert!(!selection.on_pointer_up(false).await);

        page.select("text", Rect::new(10.0, 10.0, 0.0, 18.0));
        assert!(!selection.on_pointer_up(false).await);
        assert!(!selection.snapshot().is_visible());

        page.select("text", Rect::new(10.0, 10.0, 40.0, 10.0));
        if let Some(snapshot) = page.selection.lock().expect("selection lock").as_mut() {
            snapshot.inside_drawer = true;
        }
        assert!(!selection.on_pointer_up(false).await);

        page.clear_selection();
        assert!(!selection.on_pointer_up(false).await);
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_cancels_only_pending() {
        let (page, _, selection) = build(Arc::new(MemoryStore::new()));
        page.select("text", Rect::new(10.0, 10.0, 40.0, 10.0));
        selection.on_pointer_up(false).await;
        assert!(selection.on_scroll());
        assert_eq!(selection.snapshot().phase, AffordancePhase::Idle);

        page.select("text", Rect::new(10.0, 10.0, 40.0, 10.0));
        selection.on_pointer_up(false).await;
        selection.confirm().await.expect("saved");
        assert!(!selection.on_scroll());
        assert_eq!(selection.snapshot().phase, AffordancePhase::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_runs_feedback_then_returns_to_idle() {
        let store = Arc::new(MemoryStore::new());
        let (page, controller, selection) = build(store);
        controller.open_drawer();

        page.select("hello world", Rect::new(10.0, 10.0, 40.0, 10.0));
        selection.on_pointer_up(false).await;
        let highlight = selection.confirm().await.expect("saved");

        assert_eq!(highlight.text, "hello world");
        assert_eq!(highlight.url, "https://a.test/");
        assert_eq!(highlight.page_title, "A test");
        assert!(highlight.notes.is_empty());
        assert_eq!(highlight.color, "#FFEB3B");
        assert!(page.cleared.load(Ordering::SeqCst));
        assert_eq!(selection.snapshot().phase, AffordancePhase::Saved);

        let state = controller.snapshot();
        assert_eq!(state.highlights, vec![highlight.clone()]);
        assert_eq!(state.last_added_highlight_id.as_deref(), Some(highlight.id.as_str()));

        selection.on_pointer_up(false).await;
        assert_eq!(selection.snapshot().phase, AffordancePhase::Saved);
        tokio::time::sleep(Duration::from_millis(501)).await;
        assert_eq!(selection.snapshot().phase, AffordancePhase::Dismissing);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(selection.snapshot().phase, AffordancePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn second_confirm_while_saving_is_ignored() {
        let store = Arc::new(MemoryStore::with_latency(Duration::from_millis(10)));
        let (page, _, selection) = build(store.clone());

        page.select("once", Rect::new(10.0, 10.0, 40.0, 10.0));
        selection.on_pointer_up(false).await;
        let (first, second) = tokio::join!(selection.confirm(), selection.confirm());
        assert!(first.is_some());
        assert!(second.is_none());

        let repository = HighlightRepository::new(store);
        assert_eq!(repository.get_highlights(None).await.expect("read").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_aborts_to_idle() {
        let store = Arc::new(MemoryStore::new());
        let (page, controller, selection) = build(store.clone());
        controller.open_drawer();

        page.select("text", Rect::new(10.0, 10.0, 40.0, 10.0));
        selection.on_pointer_up(false).await;
        store.set_available(false);

        assert!(selection.confirm().await.is_none());
        assert_eq!(selection.snapshot().phase, AffordancePhase::Idle);
        assert!(!page.cleared.load(Ordering::SeqCst));
        assert!(controller.snapshot().highlights.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_drawer_is_not_updated_and_color_follows_settings() {
        let store = Arc::new(MemoryStore::new());
        let (page, controller, selection) = build(store);
        controller
            .repository()
            .update_settings(serde_json::json!({ "defaultColor": "#4CAF50" }))
            .await
            .expect("settings");

        page.select("green", Rect::new(10.0, 10.0, 40.0, 10.0));
        let highlight = selection.highlight_current_selection().await.expect("saved");
        assert_eq!(highlight.color, "#4CAF50");
        assert!(controller.snapshot().highlights.is_empty());
        assert!(page.cleared.load(Ordering::SeqCst));
        assert!(selection.highlight_current_selection().await.is_none());
    }
}
