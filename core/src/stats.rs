//! Reporting query and summary types.
//!
//! A report always covers `page_view` events of one site, optionally
//! restricted to one calendar day. Day boundaries are UTC: `date=D` selects
//! timestamps in the half-open interval `[D 00:00:00Z, D+1 00:00:00Z)`,
//! which matches how ingestion normalizes every timestamp to UTC.
//!
//! [`summarize`] is the reference aggregation over an already filtered set.
//! Storage backends may compute the summary however they like (the Postgres
//! store uses group-by queries) but must produce the same result, including
//! the `top_paths` tie-break: views descending, then path ascending by byte
//! order.

use crate::event::Event;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// The only event type reports count.
pub const PAGE_VIEW: &str = "page_view";

/// Maximum number of entries in [`Summary::top_paths`].
pub const TOP_PATHS_LIMIT: usize = 3;

/// Wire format of the `date` query parameter.
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// A `date` parameter that is not a `YYYY-MM-DD` calendar day.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid date, expected YYYY-MM-DD")]
pub struct InvalidDay;

/// Parse a `YYYY-MM-DD` calendar day.
///
/// Only the canonical form is accepted: the day must format back to exactly
/// `raw`, so unpadded fields, signs and surrounding whitespace are rejected.
///
/// # Errors
///
/// Returns [`InvalidDay`] for anything else.
pub fn parse_day(raw: &str) -> Result<NaiveDate, InvalidDay> {
    let day = NaiveDate::parse_from_str(raw, DAY_FORMAT).map_err(|_| InvalidDay)?;
    if day.format(DAY_FORMAT).to_string() != raw {
        return Err(InvalidDay);
    }
    Ok(day)
}

/// Half-open UTC interval covering one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    /// First instant of the day (inclusive).
    pub start: DateTime<Utc>,
    /// First instant of the next day (exclusive).
    pub end: DateTime<Utc>,
}

impl DayWindow {
    /// The UTC window for `day`.
    #[must_use]
    pub fn for_day(day: NaiveDate) -> Self {
        let start = day.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = day
            .checked_add_days(Days::new(1))
            .map_or(DateTime::<Utc>::MAX_UTC, |next| {
                next.and_time(chrono::NaiveTime::MIN).and_utc()
            });
        Self { start, end }
    }

    /// Whether `ts` falls inside the window.
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// A report request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsQuery {
    /// Site to report on.
    pub site_id: String,
    /// Optional calendar day (UTC) to restrict to.
    pub day: Option<NaiveDate>,
}

impl StatsQuery {
    /// Report over all time.
    #[must_use]
    pub fn all_time(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            day: None,
        }
    }

    /// Report over one UTC day.
    #[must_use]
    pub fn for_day(site_id: impl Into<String>, day: NaiveDate) -> Self {
        Self {
            site_id: site_id.into(),
            day: Some(day),
        }
    }

    /// The timestamp window, if a day was requested.
    #[must_use]
    pub fn window(&self) -> Option<DayWindow> {
        self.day.map(DayWindow::for_day)
    }

    /// Whether `event` belongs in this report.
    ///
    /// Site must match, type must be `page_view`, and the timestamp must fall
    /// inside the day window when one is set.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        event.site_id == self.site_id
            && event.event_type == PAGE_VIEW
            && self.window().is_none_or(|w| w.contains(event.timestamp))
    }
}

/// View count for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathViews {
    /// The path.
    pub path: String,
    /// Matching rows with this path.
    pub views: u64,
}

/// Aggregates over the events selected by a [`StatsQuery`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Number of matching rows.
    pub total_views: u64,
    /// Number of distinct `user_id` values among matching rows.
    pub unique_users: u64,
    /// Up to [`TOP_PATHS_LIMIT`] most viewed paths.
    pub top_paths: Vec<PathViews>,
}

/// Order paths by views descending, then path ascending, and keep the top N.
#[must_use]
pub fn rank_paths(counts: impl IntoIterator<Item = (String, u64)>, limit: usize) -> Vec<PathViews> {
    let mut ranked: Vec<PathViews> = counts
        .into_iter()
        .map(|(path, views)| PathViews { path, views })
        .collect();
    ranked.sort_by(|a, b| b.views.cmp(&a.views).then_with(|| a.path.cmp(&b.path)));
    ranked.truncate(limit);
    ranked
}

/// Compute a [`Summary`] over events that already match a query.
#[must_use]
pub fn summarize<'a>(events: impl IntoIterator<Item = &'a Event>) -> Summary {
    let mut total_views = 0u64;
    let mut users: HashSet<&str> = HashSet::new();
    let mut paths: HashMap<&str, u64> = HashMap::new();

    for event in events {
        total_views += 1;
        users.insert(&event.user_id);
        *paths.entry(&event.path).or_default() += 1;
    }

    Summary {
        total_views,
        unique_users: users.len() as u64,
        top_paths: rank_paths(
            paths.into_iter().map(|(path, views)| (path.to_string(), views)),
            TOP_PATHS_LIMIT,
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn event(site: &str, kind: &str, path: &str, user: &str, ts: DateTime<Utc>) -> Event {
        Event {
            site_id: site.into(),
            event_type: kind.into(),
            path: path.into(),
            user_id: user.into(),
            timestamp: ts,
        }
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn parse_day_accepts_calendar_days_only() {
        assert_eq!(parse_day("2024-01-01").unwrap(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(parse_day("2024-02-30"), Err(InvalidDay));
        assert_eq!(parse_day("01/02/2024"), Err(InvalidDay));
        assert_eq!(parse_day("2024-01-01T00:00:00Z"), Err(InvalidDay));
        assert_eq!(parse_day("2024-1-1"), Err(InvalidDay));
        assert_eq!(parse_day("+2024-01-01"), Err(InvalidDay));
        assert_eq!(parse_day(" 2024-01-01"), Err(InvalidDay));
        assert_eq!(parse_day("2024-01-01 "), Err(InvalidDay));
    }

    #[test]
    fn day_window_is_half_open() {
        let window = DayWindow::for_day(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());

        assert!(window.contains(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert!(window.contains(Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 59).unwrap()));
        assert!(!window.contains(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()));
        assert!(!window.contains(Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap()));
    }

    #[test]
    fn query_filters_site_type_and_day() {
        let query = StatsQuery::for_day("s1", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());

        assert!(query.matches(&event("s1", PAGE_VIEW, "/", "u", at(10))));
        assert!(!query.matches(&event("s2", PAGE_VIEW, "/", "u", at(10))));
        assert!(!query.matches(&event("s1", "click", "/", "u", at(10))));
        assert!(!query.matches(&event(
            "s1",
            PAGE_VIEW,
            "/",
            "u",
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
        )));
        assert!(StatsQuery::all_time("s1").matches(&event(
            "s1",
            PAGE_VIEW,
            "/",
            "u",
            Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap()
        )));
    }

    #[test]
    fn empty_set_summarizes_to_zero() {
        assert_eq!(summarize(&Vec::<Event>::new()), Summary::default());
    }

    #[test]
    fn same_user_two_paths() {
        let events = [
            event("s1", PAGE_VIEW, "/home", "u1", at(9)),
            event("s1", PAGE_VIEW, "/about", "u1", at(10)),
        ];

        let summary = summarize(&events);
        assert_eq!(summary.total_views, 2);
        assert_eq!(summary.unique_users, 1);
        assert_eq!(
            summary.top_paths,
            vec![
                PathViews { path: "/about".into(), views: 1 },
                PathViews { path: "/home".into(), views: 1 },
            ]
        );
    }

    #[test]
    fn top_paths_keeps_three_most_viewed() {
        let events: Vec<Event> = [("/a", 1), ("/b", 4), ("/c", 2), ("/d", 3), ("/e", 2)]
            .into_iter()
            .flat_map(|(path, n)| {
                (0..n).map(move |i| event("s1", PAGE_VIEW, path, &format!("u{i}"), at(1)))
            })
            .collect();

        let summary = summarize(&events);
        assert_eq!(summary.total_views, 12);
        assert_eq!(summary.unique_users, 4);
        let ranked: Vec<(&str, u64)> = summary
            .top_paths
            .iter()
            .map(|p| (p.path.as_str(), p.views))
            .collect();
        assert_eq!(ranked, vec![("/b", 4), ("/d", 3), ("/c", 2)]);
    }

    proptest! {
        #[test]
        fn top_paths_bounded_and_sorted(
            rows in prop::collection::vec(("[a-e]", "[a-z]{1,3}"), 0..60),
        ) {
            let events: Vec<Event> = rows
                .iter()
                .map(|(path, user)| event("s1", PAGE_VIEW, path, user, at(0)))
                .collect();

            let summary = summarize(&events);
            prop_assert_eq!(summary.total_views, events.len() as u64);
            prop_assert!(summary.unique_users <= summary.total_views);
            prop_assert!(summary.top_paths.len() <= TOP_PATHS_LIMIT);
            for pair in summary.top_paths.windows(2) {
                prop_assert!(
                    pair[0].views > pair[1].views
                        || (pair[0].views == pair[1].views && pair[0].path < pair[1].path)
                );
            }
        }
    }
}
