use crate::models::Highlight;
use chrono::{DateTime, Datelike, TimeZone, Timelike};
use serde::Serialize;
use std::fmt;
use tokio::time::{Duration, Instant};

/// Highlights that share a URL, in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageGroup {
    pub url: String,
    pub page_title: String,
    pub highlights: Vec<Highlight>,
    pub is_current_page: bool,
    pub most_recent_timestamp: i64,
}

impl PageGroup {
    pub fn display_title(&self) -> &str {
        if self.page_title.is_empty() {
            &self.url
        } else {
            &self.page_title
        }
    }

    /// Headers are hidden when the only group belongs to another page.
    pub fn shows_header(&self, group_count: usize) -> bool {
        group_count > 1 || self.is_current_page
    }
}

/// Current page first, then by most recent highlight, newest first.
pub fn group_by_page(highlights: &[Highlight], current_url: &str) -> Vec<PageGroup> {
    let mut groups: Vec<PageGroup> = Vec::new();
    for highlight in highlights {
        let index = match groups.iter().position(|group| group.url == highlight.url) {
            Some(index) => index,
            None => {
                groups.push(PageGroup {
                    url: highlight.url.clone(),
                    page_title: highlight.page_title.clone(),
                    highlights: Vec::new(),
                    is_current_page: highlight.url == current_url,
                    most_recent_timestamp: 0,
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[index];
        group.most_recent_timestamp = group.most_recent_timestamp.max(highlight.timestamp);
        group.highlights.push(highlight.clone());
    }

    groups.sort_by(|a, b| {
        b.is_current_page
            .cmp(&a.is_current_page)
            .then(b.most_recent_timestamp.cmp(&a.most_recent_timestamp))
    });
    groups
}

/// Highlight ids in display order with group headers removed.
pub fn flatten_ids(groups: &[PageGroup]) -> Vec<String> {
    groups
        .iter()
        .flat_map(|group| group.highlights.iter().map(|highlight| highlight.id.clone()))
        .collect()
}

pub fn position_of(groups: &[PageGroup], highlight_id: &str) -> Option<usize> {
    groups
        .iter()
        .flat_map(|group| group.highlights.iter())
        .position(|highlight| highlight.id == highlight_id)
}

/// Whether the current page's section must be scrolled into view after a load.
pub fn needs_section_scroll(groups: &[PageGroup]) -> bool {
    match groups.first() {
        Some(first) if !first.is_current_page => groups.iter().any(|group| group.is_current_page),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavDirection {
    Up,
    Down,
}

impl NavDirection {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "ArrowUp" => Some(Self::Up),
            "ArrowDown" => Some(Self::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollSource {
    /// Caused by our own scroll animation; focus is left alone.
    Programmatic,
    User { focused: usize },
}

/// Keyboard focus over the flattened highlight list plus scroll-intent tracking.
#[derive(Debug)]
pub struct Navigator {
    focused: usize,
    total: usize,
    programmatic_until: Option<Instant>,
    failsafe: Duration,
}

impl Navigator {
    pub fn new(failsafe: Duration) -> Self {
        Self {
            focused: 0,
            total: 0,
            programmatic_until: None,
            failsafe,
        }
    }

    pub fn focused(&self) -> usize {
        self.focused
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Drawer opened: focus the top and forget any scroll intent.
    pub fn reset(&mut self, total: usize) {
        self.focused = 0;
        self.total = total;
        self.programmatic_until = None;
    }

    pub fn set_total(&mut self, total: usize) {
        self.total = total;
        self.focused = self.focused.min(total.saturating_sub(1));
    }

    pub fn move_focus(&mut self, direction: NavDirection, now: Instant) -> Option<usize> {
        if self.total == 0 {
            return None;
        }
        let next = match direction {
            NavDirection::Up => self.focused.saturating_sub(1),
            NavDirection::Down => (self.focused + 1).min(self.total - 1),
        };
        Some(self.focus(next, now))
    }

    /// Focuses a specific position, e.g. a freshly added highlight.
    pub fn focus_index(&mut self, index: usize, now: Instant) -> Option<usize> {
        (index < self.total).then(|| self.focus(index, now))
    }

    fn focus(&mut self, index: usize, now: Instant) -> usize {
        self.focused = index;
        self.programmatic_until = Some(now + self.failsafe);
        index
    }

    pub fn is_programmatic(&self, now: Instant) -> bool {
        self.programmatic_until.is_some_and(|until| now < until)
    }

    /// Wheel or pointer input inside the list.
    pub fn cancel_programmatic(&mut self) {
        self.programmatic_until = None;
    }

    /// Classifies a scroll event. User scrolls move focus to the item whose
    /// center is nearest `viewport_center`; `centers` are in scroll coordinates.
    pub fn on_scroll(&mut self, now: Instant, centers: &[f64], viewport_center: f64) -> ScrollSource {
        if self.is_programmatic(now) {
            return ScrollSource::Programmatic;
        }
        self.programmatic_until = None;

        let nearest = centers
            .iter()
            .take(self.total)
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (*a - viewport_center)
                    .abs()
                    .total_cmp(&(*b - viewport_center).abs())
            })
            .map(|(index, _)| index);
        if let Some(index) = nearest {
            self.focused = index;
        }
        ScrollSource::User {
            focused: self.focused,
        }
    }
}

/// Formats a timestamp as `SUN JAN 5  3PM`, adding minutes only when non-zero.
pub fn format_display_date<Tz>(timestamp_ms: i64, zone: &Tz) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let date = DateTime::from_timestamp_millis(timestamp_ms)?.with_timezone(zone);
    let weekday = date.weekday().to_string().to_uppercase();
    let month = date.format("%b").to_string().to_uppercase();
    let (is_pm, hour) = date.hour12();
    let minutes = match date.minute() {
        0 => String::new(),
        minute => format!(":{minute:02}"),
    };
    let meridiem = if is_pm { "PM" } else { "AM" };
    Some(format!(
        "{weekday} {month} {day}  {hour}{minutes}{meridiem}",
        day = date.day()
    ))
}

#[cfg(test)]
mod tests {
    use super::{
        flatten_ids, format_display_date, group_by_page, needs_section_scroll, position_of, NavDirection,
        Navigator, ScrollSource,
    };
    use crate::models::Highlight;
    use chrono::{FixedOffset, TimeZone, Utc};
    use tokio::time::{Duration, Instant};

    fn highlight(id: &str, url: &str, timestamp: i64) -> Highlight {
        Highlight {
            id: id.to_string(),
            timestamp,
            ..Highlight::new(format!("text {id}"), url, "", "#FFEB3B")
        }
    }

    #[test]
    fn current_page_group_comes_first_despite_older_timestamp() {
        let highlights = vec![
            highlight("old", "https://current.test/", 100),
            highlight("new", "https://other.test/", 200),
        ];
        let groups = group_by_page(&highlights, "https://current.test/");
        assert_eq!(groups[0].url, "https://current.test/");
        assert!(groups[0].is_current_page);
        assert_eq!(groups[1].url, "https://other.test/");
        assert!(!needs_section_scroll(&groups));
    }

    #[test]
    fn other_groups_sort_by_most_recent_and_keep_insertion_order() {
        let highlights = vec![
            highlight("a1", "https://a.test/", 300),
            highlight("b1", "https://b.test/", 100),
            highlight("a2", "https://a.test/", 50),
            highlight("b2", "https://b.test/", 900),
            highlight("c1", "https://c.test/", 500),
        ];
        let groups = group_by_page(&highlights, "https://elsewhere.test/");
        let urls: Vec<&str> = groups.iter().map(|group| group.url.as_str()).collect();
        assert_eq!(urls, vec!["https://b.test/", "https://c.test/", "https://a.test/"]);
        assert_eq!(groups[0].most_recent_timestamp, 900);
        assert_eq!(flatten_ids(&groups), vec!["b1", "b2", "c1", "a1", "a2"]);
        assert_eq!(position_of(&groups, "a2"), Some(4));
        assert_eq!(groups[0].display_title(), "https://b.test/");
        assert!(!groups[0].shows_header(1));
        assert!(groups[0].shows_header(3));
    }

    #[test]
    fn section_scroll_needed_when_current_page_is_not_first() {
        let mut highlights = vec![highlight("x", "https://other.test/", 10)];
        assert!(!needs_section_scroll(&group_by_page(&highlights, "https://current.test/")));
        highlights.push(highlight("y", "https://current.test/", 5));
        let groups = group_by_page(&highlights, "https://current.test/");
        assert!(groups[0].is_current_page);

        let mut reordered = groups.clone();
        reordered.reverse();
        assert!(needs_section_scroll(&reordered));
    }

    #[test]
    fn focus_is_clamped_and_shrinks_with_collection() {
        let start = Instant::now();
        let mut navigator = Navigator::new(Duration::from_millis(800));
        assert_eq!(navigator.move_focus(NavDirection::Down, start), None);

        navigator.reset(3);
        assert_eq!(navigator.move_focus(NavDirection::Up, start), Some(0));
        assert_eq!(navigator.move_focus(NavDirection::Down, start), Some(1));
        assert_eq!(navigator.move_focus(NavDirection::Down, start), Some(2));
        assert_eq!(navigator.move_focus(NavDirection::Down, start), Some(2));

        navigator.set_total(2);
        assert_eq!(navigator.focused(), 1);
        navigator.set_total(0);
        assert_eq!(navigator.focused(), 0);
        assert_eq!(navigator.focus_index(4, start), None);
    }

    #[test]
    fn programmatic_scroll_is_not_mistaken_for_user_scroll() {
        let start = Instant::now();
        let centers = [50.0, 150.0, 250.0, 350.0];
        let mut navigator = Navigator::new(Duration::from_millis(800));
        navigator.reset(centers.len());

        navigator.move_focus(NavDirection::Down, start);
        assert_eq!(
            navigator.on_scroll(start + Duration::from_millis(100), &centers, 340.0),
            ScrollSource::Programmatic
        );
        assert_eq!(navigator.focused(), 1);

        navigator.cancel_programmatic();
        assert_eq!(
            navigator.on_scroll(start + Duration::from_millis(120), &centers, 340.0),
            ScrollSource::User { focused: 3 }
        );

        navigator.move_focus(NavDirection::Up, start);
        assert!(navigator.is_programmatic(start + Duration::from_millis(799)));
        assert_eq!(
            navigator.on_scroll(start + Duration::from_millis(800), &centers, 140.0),
            ScrollSource::User { focused: 1 }
        );
        assert_eq!(NavDirection::from_key("ArrowDown"), Some(NavDirection::Down));
        assert_eq!(NavDirection::from_key("Enter"), None);
    }

    #[test]
    fn display_date_omits_zero_minutes() {
        let utc = Utc;
        let three_pm = utc
            .with_ymd_and_hms(2025, 1, 5, 15, 0, 0)
            .single()
            .expect("valid date")
            .timestamp_millis();
        assert_eq!(format_display_date(three_pm, &utc).as_deref(), Some("SUN JAN 5  3PM"));
        assert_eq!(
            format_display_date(three_pm + 7 * 60_000, &utc).as_deref(),
            Some("SUN JAN 5  3:07PM")
        );

        let late_saturday = utc
            .with_ymd_and_hms(2025, 1, 4, 23, 30, 0)
            .single()
            .expect("valid date")
            .timestamp_millis();
        let plus_one = FixedOffset::east_opt(3600).expect("offset");
        assert_eq!(
            format_display_date(late_saturday, &plus_one).as_deref(),
            Some("SUN JAN 5  12:30AM")
        );
    }
}
