//! Launcher and drawer geometry.
//!
//! The launcher is a fixed-size square the user drags around; the drawer is
//! derived from the launcher's center. Both stay inside the viewport.

use crate::config::LayoutConfig;
use crate::models::{Point, Size};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DrawerSide {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawerPlacement {
    pub side: DrawerSide,
    /// Signed horizontal offset from the launcher center to the drawer's left edge, before clamping.
    pub offset: f64,
    /// Clamped top-left corner.
    pub origin: Point,
    pub size: Size,
    /// Scale-animation pivot, relative to `origin`. Always the launcher center.
    pub transform_origin: Point,
    pub anchor: Point,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragOutcome {
    Click { center: Point },
    Moved { center: Point },
}

#[derive(Debug, Clone, Copy)]
struct DragSession {
    pointer_start: Point,
    launcher_start: Point,
    moved: bool,
}

/// Keeps `value` in `[min, max]`; `min` wins when the range is inverted.
fn clamp_axis(value: f64, min: f64, max: f64) -> f64 {
    value.min(max).max(min)
}

pub fn clamp_launcher(position: Point, viewport: Size, config: &LayoutConfig) -> Point {
    Point::new(
        clamp_axis(
            position.x,
            config.edge_margin,
            viewport.width - config.edge_margin - config.launcher_size,
        ),
        clamp_axis(
            position.y,
            config.edge_margin,
            viewport.height - config.edge_margin - config.launcher_size,
        ),
    )
}

pub fn launcher_center(top_left: Point, config: &LayoutConfig) -> Point {
    let half = config.launcher_size / 2.0;
    Point::new(top_left.x + half, top_left.y + half)
}

/// Resting spot used before the launcher has ever been placed: bottom-right corner.
pub fn default_launcher_position(viewport: Size, config: &LayoutConfig) -> Point {
    clamp_launcher(
        Point::new(
            viewport.width - config.edge_margin - config.launcher_size,
            viewport.height - config.edge_margin - config.launcher_size,
        ),
        viewport,
        config,
    )
}

pub fn choose_side(
    center: Point,
    viewport: Size,
    config: &LayoutConfig,
    previous: Option<DrawerSide>,
) -> DrawerSide {
    let space_on_right = viewport.width - center.x;
    let needed = config.edge_margin + config.drawer_width + config.gap();
    let threshold = match previous {
        Some(DrawerSide::Right) => needed - config.side_hysteresis,
        Some(DrawerSide::Left) => needed + config.side_hysteresis,
        None => needed,
    };
    if space_on_right >= threshold {
        DrawerSide::Right
    } else {
        DrawerSide::Left
    }
}

/// Derives the drawer rectangle from the launcher center. Without an anchor the
/// launcher's resting spot is used.
pub fn place_drawer(
    anchor: Option<Point>,
    viewport: Size,
    config: &LayoutConfig,
    previous: Option<DrawerSide>,
) -> DrawerPlacement {
    let anchor = anchor
        .unwrap_or_else(|| launcher_center(default_launcher_position(viewport, config), config));
    let side = choose_side(anchor, viewport, config, previous);
    let gap = config.gap();
    let offset = match side {
        DrawerSide::Right => gap,
        DrawerSide::Left => -config.drawer_width - gap,
    };

    let origin = Point::new(
        clamp_axis(
            anchor.x + offset,
            config.edge_margin,
            viewport.width - config.drawer_width - config.edge_margin,
        ),
        clamp_axis(
            anchor.y - config.drawer_height / 2.0,
            config.edge_margin,
            viewport.height - config.drawer_height - config.edge_margin,
        ),
    );

    DrawerPlacement {
        side,
        offset,
        origin,
        size: Size::new(config.drawer_width, config.drawer_height),
        transform_origin: Point::new(anchor.x - origin.x, anchor.y - origin.y),
        anchor,
    }
}

/// Stateful launcher tracker. Publishes the launcher center on every move so a
/// frame-rate consumer can follow it; the throttled copy is the caller's concern.
#[derive(Debug)]
pub struct LayoutEngine {
    config: LayoutConfig,
    viewport: Size,
    launcher: Point,
    side: Option<DrawerSide>,
    drag: Option<DragSession>,
    center: watch::Sender<Point>,
}

impl LayoutEngine {
    pub fn new(config: LayoutConfig, viewport: Size) -> Self {
        let launcher = default_launcher_position(viewport, &config);
        let (center, _) = watch::channel(launcher_center(launcher, &config));
        Self {
            config,
            viewport,
            launcher,
            side: None,
            drag: None,
            center,
        }
    }

    pub fn with_launcher(mut self, position: Point) -> Self {
        self.move_launcher(position);
        self
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn viewport(&self) -> Size {
        self.viewport
    }

    pub fn launcher_position(&self) -> Point {
        self.launcher
    }

    pub fn launcher_center(&self) -> Point {
        launcher_center(self.launcher, &self.config)
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn watch_center(&self) -> watch::Receiver<Point> {
        self.center.subscribe()
    }

    fn move_launcher(&mut self, position: Point) -> Point {
        self.launcher = clamp_launcher(position, self.viewport, &self.config);
        let center = self.launcher_center();
        self.center.send_replace(center);
        center
    }

    pub fn begin_drag(&mut self, pointer: Point) {
        self.drag = Some(DragSession {
            pointer_start: pointer,
            launcher_start: self.launcher,
            moved: false,
        });
    }

    /// Moves the launcher with the pointer. Returns the new center, or `None` outside a drag.
    pub fn drag_to(&mut self, pointer: Point) -> Option<Point> {
        let mut session = self.drag?;
        if pointer.distance_to(session.pointer_start) > self.config.drag_threshold {
            session.moved = true;
        }
        self.drag = Some(session);
        let target = Point::new(
            session.launcher_start.x + (pointer.x - session.pointer_start.x),
            session.launcher_start.y + (pointer.y - session.pointer_start.y),
        );
        Some(self.move_launcher(target))
    }

    pub fn end_drag(&mut self) -> Option<DragOutcome> {
        let session = self.drag.take()?;
        let center = self.launcher_center();
        Some(if session.moved {
            DragOutcome::Moved { center }
        } else {
            DragOutcome::Click { center }
        })
    }

    /// Re-clamps the launcher to the new viewport and re-derives the drawer.
    pub fn resize(&mut self, viewport: Size) -> DrawerPlacement {
        self.viewport = viewport;
        self.move_launcher(self.launcher);
        self.placement()
    }

    /// Drawer placement for the launcher's live position.
    pub fn placement(&mut self) -> DrawerPlacement {
        let center = self.launcher_center();
        self.placement_for(Some(center))
    }

    pub fn placement_for(&mut self, anchor: Option<Point>) -> DrawerPlacement {
        let placement = place_drawer(anchor, self.viewport, &self.config, self.side);
        self.side = Some(placement.side);
        placement
    }
}
