use crate::coalesce::CoalescingChannel;
use crate::config::EngineConfig;
use crate::controller::{DrawerController, DrawerState};
use crate::errors::AppResult;
use crate::layout::{DragOutcome, DrawerPlacement, LayoutEngine};
use crate::models::{Highlight, Point, Settings, Size};
use crate::navigator::{flatten_ids, group_by_page, position_of, NavDirection, Navigator, PageGroup, ScrollSource};
use crate::repository::HighlightRepository;
use crate::selection::{HostPage, SelectionController};
use crate::shortcuts::{HostCommand, HostMessage, KeyPress, ShortcutMap};
use crate::store::{open_store, KeyValueStore, StorageOptions};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// One page context: storage, state, layout and input handling wired together.
///
/// Created once when the content context starts and dropped at teardown;
/// dropping aborts the background change listeners.
pub struct DrawerApp {
    config: EngineConfig,
    host: Arc<dyn HostPage>,
    repository: Arc<HighlightRepository>,
    controller: Arc<DrawerController>,
    selection: Arc<SelectionController>,
    layout: Mutex<LayoutEngine>,
    navigator: Mutex<Navigator>,
    shortcuts: Arc<Mutex<ShortcutMap>>,
    drag_updates: Mutex<Option<CoalescingChannel<Point>>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DrawerApp {
    pub async fn start(config: EngineConfig, options: &StorageOptions, host: Arc<dyn HostPage>) -> Arc<Self> {
        Self::with_store(config, open_store(options), host).await
    }

    pub async fn with_store(
        config: EngineConfig,
        store: Arc<dyn KeyValueStore>,
        host: Arc<dyn HostPage>,
    ) -> Arc<Self> {
        let repository = Arc::new(HighlightRepository::new(store));
        let settings = match repository.get_settings().await {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(error = %error, "settings unavailable at startup, using defaults");
                Settings::default()
            }
        };
        let controller = Arc::new(DrawerController::new(repository.clone()));
        let selection = Arc::new(SelectionController::new(
            config.selection.clone(),
            host.clone(),
            controller.clone(),
        ));
        let layout = LayoutEngine::new(config.layout.clone(), host.viewport());
        let navigator = Navigator::new(config.scroll_failsafe());

        let app = Arc::new(Self {
            config,
            host,
            repository,
            controller,
            selection,
            layout: Mutex::new(layout),
            navigator: Mutex::new(navigator),
            shortcuts: Arc::new(Mutex::new(ShortcutMap::from_settings(&settings))),
            drag_updates: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        });
        app.spawn_change_listeners();
        tracing::info!(backend = ?app.repository.backend(), "drawer context started");
        app
    }

    fn spawn_change_listeners(&self) {
        let mut listeners = lock(&self.listeners);

        if let Some(mut changes) = self.repository.on_highlights_changed() {
            let controller = self.controller.clone();
            listeners.push(tokio::spawn(async move {
                while let Some(highlights) = changes.next().await {
                    controller.replace_highlights(highlights);
                }
            }));
        }

        if let Some(mut changes) = self.repository.on_settings_changed() {
            let shortcuts = self.shortcuts.clone();
            listeners.push(tokio::spawn(async move {
                while let Some(settings) = changes.next().await {
                    *lock(&shortcuts) = ShortcutMap::from_settings(&settings);
                }
            }));
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<HighlightRepository> {
        &self.repository
    }

    pub fn controller(&self) -> &Arc<DrawerController> {
        &self.controller
    }

    pub fn selection(&self) -> &Arc<SelectionController> {
        &self.selection
    }

    pub fn state(&self) -> DrawerState {
        self.controller.snapshot()
    }

    pub async fn open_drawer(&self) {
        if self.controller.open_drawer() {
            self.refresh_after_open().await;
        }
    }

    pub fn close_drawer(&self) -> bool {
        self.controller.close_drawer()
    }

    /// Returns the new target visibility.
    pub async fn toggle_drawer(&self) -> bool {
        let open = self.controller.toggle_drawer();
        if open {
            self.refresh_after_open().await;
        }
        open
    }

    async fn refresh_after_open(&self) {
        let highlights = self.controller.load_all_highlights().await;
        lock(&self.navigator).reset(highlights.len());
    }

    pub fn begin_launcher_drag(&self, pointer: Point) {
        lock(&self.layout).begin_drag(pointer);
        let controller = self.controller.clone();
        let channel = CoalescingChannel::spawn(self.config.throttle_interval(), move |center: Point| {
            controller.set_logo_position(center);
        });
        if let Some(previous) = lock(&self.drag_updates).replace(channel) {
            previous.cancel();
        }
    }

    /// Moves the launcher. The center is published immediately on the layout
    /// watch and at a bounded rate into the drawer state.
    pub fn drag_launcher(&self, pointer: Point) -> Option<Point> {
        let center = lock(&self.layout).drag_to(pointer)?;
        if let Some(channel) = lock(&self.drag_updates).as_ref() {
            channel.push(center);
        }
        Some(center)
    }

    /// Ends the gesture, flushing the last throttled position. A click toggles the drawer.
    pub async fn end_launcher_drag(&self) -> Option<DragOutcome> {
        let outcome = lock(&self.layout).end_drag();
        let channel = lock(&self.drag_updates).take();
        if let Some(channel) = channel {
            channel.close().await;
        }
        if let Some(DragOutcome::Click { center }) = outcome {
            self.controller.set_logo_position(center);
            self.toggle_drawer().await;
        }
        outcome
    }

    pub fn watch_launcher_center(&self) -> watch::Receiver<Point> {
        lock(&self.layout).watch_center()
    }

    pub fn launcher_position(&self) -> Point {
        lock(&self.layout).launcher_position()
    }

    /// Re-clamps the launcher to the new viewport and records its center so the
    /// drawer and any later placement derive from where the launcher now is.
    pub fn resize_viewport(&self, viewport: Size) -> DrawerPlacement {
        let (placement, center) = {
            let mut layout = lock(&self.layout);
            let placement = layout.resize(viewport);
            (placement, layout.launcher_center())
        };
        self.controller.set_logo_position(center);
        placement
    }

    /// Placement for the recorded launcher position, or the resting spot if none was recorded.
    pub fn drawer_placement(&self) -> DrawerPlacement {
        let anchor = self.controller.snapshot().logo_position;
        lock(&self.layout).placement_for(anchor)
    }

    /// Placement following the launcher while it is being dragged.
    pub fn live_drawer_placement(&self) -> DrawerPlacement {
        lock(&self.layout).placement()
    }

    pub async fn on_pointer_up(&self, on_affordance: bool) -> bool {
        self.selection.on_pointer_up(on_affordance).await
    }

    pub fn on_page_scroll(&self) -> bool {
        self.selection.on_scroll()
    }

    pub async fn confirm_selection(&self) -> Option<Highlight> {
        self.selection.confirm().await
    }

    pub async fn handle_key(&self, press: &KeyPress) -> Option<HostCommand> {
        let drawer_open = self.controller.phase().is_open();
        let command = lock(&self.shortcuts).resolve(press, drawer_open)?;
        self.dispatch(command).await;
        Some(command)
    }

    pub async fn dispatch(&self, command: HostCommand) {
        match command {
            HostCommand::ToggleDrawer => {
                self.toggle_drawer().await;
            }
            HostCommand::CreateHighlight => {
                self.selection.highlight_current_selection().await;
            }
            HostCommand::CloseDrawer => {
                self.close_drawer();
            }
            HostCommand::Navigate(direction) => {
                self.navigate(direction);
            }
        }
    }

    /// Handles a background-context message and returns its JSON reply.
    pub async fn handle_message(&self, message: Value) -> AppResult<Value> {
        match HostMessage::from_value(message)? {
            HostMessage::ToggleDrawer => {
                let open = self.toggle_drawer().await;
                Ok(json!({ "open": open }))
            }
            HostMessage::CreateHighlight => {
                let highlight = self.selection.highlight_current_selection().await;
                Ok(json!({ "highlight": highlight }))
            }
            HostMessage::SaveHighlight(highlight) => {
                self.repository.save_highlight(highlight.clone()).await?;
                if self.controller.phase().is_open() {
                    self.controller.add_highlight(highlight);
                }
                Ok(json!({ "saved": true }))
            }
            HostMessage::DeleteHighlight(id) => {
                let deleted = self.controller.delete_highlight(&id).await;
                Ok(json!({ "deleted": deleted }))
            }
            HostMessage::UpdateHighlight(update) => {
                let updated = self.repository.update_highlight(&update.id, &update.patch).await?;
                if updated {
                    self.controller.load_all_highlights().await;
                }
                Ok(json!({ "updated": updated }))
            }
            HostMessage::GetHighlights => {
                let highlights = self.repository.get_highlights(None).await?;
                Ok(serde_json::to_value(highlights)?)
            }
            HostMessage::UpdateSettings(patch) => {
                let settings = self.update_settings(patch).await?;
                Ok(serde_json::to_value(settings)?)
            }
        }
    }

    pub async fn update_settings(&self, patch: Value) -> AppResult<Settings> {
        let settings = self.repository.update_settings(patch).await?;
        *lock(&self.shortcuts) = ShortcutMap::from_settings(&settings);
        Ok(settings)
    }

    pub fn shortcuts(&self) -> ShortcutMap {
        lock(&self.shortcuts).clone()
    }

    pub fn page_groups(&self) -> Vec<PageGroup> {
        let state = self.controller.snapshot();
        group_by_page(&state.highlights, &self.host.page().url)
    }

    /// Moves keyboard focus and returns the focused highlight id.
    pub fn navigate(&self, direction: NavDirection) -> Option<String> {
        let ids = flatten_ids(&self.page_groups());
        let mut navigator = lock(&self.navigator);
        navigator.set_total(ids.len());
        let index = navigator.move_focus(direction, Instant::now())?;
        ids.get(index).cloned()
    }

    /// Reconciles focus with the collection and moves it onto a freshly added highlight.
    pub fn sync_navigation(&self) -> Option<usize> {
        let state = self.controller.snapshot();
        let groups = group_by_page(&state.highlights, &self.host.page().url);
        let mut navigator = lock(&self.navigator);
        navigator.set_total(flatten_ids(&groups).len());

        let added = state.last_added_highlight_id.as_deref()?;
        let index = position_of(&groups, added)?;
        let focused = navigator.focus_index(index, Instant::now());
        drop(navigator);
        self.controller.clear_last_added();
        focused
    }

    pub fn focused_index(&self) -> usize {
        lock(&self.navigator).focused()
    }

    pub fn on_list_scroll(&self, centers: &[f64], viewport_center: f64) -> ScrollSource {
        lock(&self.navigator).on_scroll(Instant::now(), centers, viewport_center)
    }

    /// Wheel or pointer-down inside the list.
    pub fn on_list_input(&self) {
        lock(&self.navigator).cancel_programmatic();
    }

    pub fn shutdown(&self) {
        for listener in lock(&self.listeners).drain(..) {
            listener.abort();
        }
        if let Some(channel) = lock(&self.drag_updates).take() {
            channel.cancel();
        }
    }
}

impl Drop for DrawerApp {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::DrawerApp;
    use crate::config::EngineConfig;
    use crate::controller::DrawerPhase;
    use crate::layout::DragOutcome;
    use crate::models::{Highlight, PageInfo, Point, Size};
    use crate::navigator::NavDirection;
    use crate::selection::{HostPage, SelectionSnapshot};
    use crate::shortcuts::{HostCommand, KeyPress};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    struct StaticPage;

    impl HostPage for StaticPage {
        fn current_selection(&self) -> Option<SelectionSnapshot> {
            None
        }

        fn clear_selection(&self) {}

        fn viewport(&self) -> Size {
            Size::new(1280.0, 800.0)
        }

        fn page(&self) -> PageInfo {
            PageInfo {
                url: "https://current.test/".to_string(),
                title: "Current".to_string(),
            }
        }
    }

    async fn app() -> Arc<DrawerApp> {
        DrawerApp::with_store(EngineConfig::default(), Arc::new(MemoryStore::new()), Arc::new(StaticPage)).await
    }

    #[tokio::test(start_paused = true)]
    async fn launcher_click_records_position_and_toggles() {
        let app = app().await;
        let start = app.launcher_position();
        app.begin_launcher_drag(Point::new(start.x + 5.0, start.y + 5.0));
        app.drag_launcher(Point::new(start.x + 7.0, start.y + 6.0));
        let outcome = app.end_launcher_drag().await;

        assert!(matches!(outcome, Some(DragOutcome::Click { .. })));
        let state = app.state();
        assert_eq!(state.phase, DrawerPhase::Opening);
        assert!(state.logo_position.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn shrinking_viewport_reanchors_drawer_on_launcher() {
        let app = app().await;
        let start = app.launcher_position();
        app.begin_launcher_drag(Point::new(start.x + 5.0, start.y + 5.0));
        let outcome = app.end_launcher_drag().await;
        let Some(DragOutcome::Click { center: before }) = outcome else {
            panic!("expected a click, got {outcome:?}");
        };
        assert_eq!(app.state().logo_position, Some(before));

        let placement = app.resize_viewport(Size::new(800.0, 600.0));
        let center = *app.watch_launcher_center().borrow();
        assert_ne!(center, before);
        assert!(center.x <= 800.0 - 24.0 - 20.0 && center.y <= 600.0 - 24.0 - 20.0);
        assert_eq!(placement.anchor, center);
        assert_eq!(app.state().logo_position, Some(center));
        assert_eq!(app.drawer_placement(), placement);

        let gap = EngineConfig::default().layout.gap();
        let pivot = placement.transform_origin;
        assert_eq!(pivot.x, center.x - placement.origin.x);
        assert_eq!(pivot.y, center.y - placement.origin.y);
        assert!(pivot.x >= -gap && pivot.x <= placement.size.width + gap, "{pivot:?}");
        assert!(pivot.y >= 0.0 && pivot.y <= placement.size.height, "{pivot:?}");
    }

    #[tokio::test]
    async fn keyboard_opens_before_any_launcher_position() {
        let app = app().await;
        assert_eq!(
            app.handle_key(&KeyPress::ctrl_shift("D")).await,
            Some(HostCommand::ToggleDrawer)
        );
        assert!(app.state().phase.is_open());
        let placement = app.drawer_placement();
        assert!(placement.origin.x >= 24.0 && placement.origin.x <= 1280.0 - 376.0 - 24.0);

        assert_eq!(
            app.handle_key(&KeyPress::plain("Escape")).await,
            Some(HostCommand::CloseDrawer)
        );
        assert!(app.state().phase.is_closing());
    }

    #[tokio::test]
    async fn navigation_focuses_newly_added_highlight() {
        let app = app().await;
        for (id, url, timestamp) in [
            ("a", "https://other.test/", 300),
            ("b", "https://current.test/", 100),
            ("c", "https://current.test/", 200),
        ] {
            let highlight = Highlight {
                id: id.to_string(),
                timestamp,
                ..Highlight::new("text", url, "", "#FFEB3B")
            };
            app.repository().save_highlight(highlight).await.expect("save");
        }
        app.open_drawer().await;

        let extra = Highlight {
            id: "d".to_string(),
            ..Highlight::new("new", "https://other.test/", "", "#FFEB3B")
        };
        app.handle_message(json!({ "type": "SAVE_HIGHLIGHT", "payload": extra }))
            .await
            .expect("saved");

        assert_eq!(app.sync_navigation(), Some(3));
        assert_eq!(app.state().last_added_highlight_id, None);
        assert_eq!(app.navigate(NavDirection::Up).as_deref(), Some("a"));
        assert_eq!(app.navigate(NavDirection::Up).as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn settings_update_rebinds_shortcuts() {
        let app = app().await;
        app.handle_message(json!({ "type": "UPDATE_SETTINGS", "payload": { "drawerShortcut": "Alt+K" } }))
            .await
            .expect("settings");
        assert_eq!(app.shortcuts().toggle_drawer.to_string(), "Alt+K");
        assert_eq!(app.handle_key(&KeyPress::ctrl_shift("D")).await, None);
        assert!(app.handle_message(json!({ "type": "UNKNOWN" })).await.is_err());
    }
}
