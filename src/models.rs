//! Data models shared by both event sources.
//!
//! This module defines the core data structures used throughout the application:
//! - [`EventRecord`]: The normalized event both sources produce
//! - [`EventTime`]: When an event starts, in whichever form the source knows it
//! - [`ApiEvent`]: One raw event object from the connpass search API
//! - [`ScheduleRow`]: One raw row from the arena schedule table
//! - [`Enrichment`]: A congestion prediction attached at compose time
//!
//! The two sources do not share a temporal representation. connpass gives an
//! absolute timestamp while the arena page only prints local clock strings, so
//! [`EventTime`] keeps both forms instead of forcing one into the other.

use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};

/// When an event starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTime {
    /// A precise timestamp with its original offset (API source).
    Absolute(DateTime<FixedOffset>),
    /// Raw display strings copied from the schedule table (scrape source).
    Schedule(ScheduleTimes),
}

/// The time columns of one schedule row, exactly as printed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleTimes {
    /// Date cell, e.g. `12/22(Sat)` or `22(Sat)`.
    pub date: String,
    /// Doors-open time.
    pub open: String,
    /// Show start time.
    pub start: String,
    /// Show end time.
    pub end: String,
}

/// A normalized event.
///
/// Records are built once from an upstream response and never mutated.
/// Enrichment is not part of the record; it is computed while composing the
/// message and passed alongside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Source-scoped identity. connpass ids for the API source, a synthesized
    /// `date#title` key for the scrape source.
    pub id: Option<String>,
    /// Display title.
    pub title: String,
    /// Start time in the source's native representation.
    pub start: EventTime,
    /// Venue name.
    pub place: Option<String>,
    /// Venue address.
    pub address: Option<String>,
    /// Canonical event page.
    pub url: Option<String>,
    /// Organizer display name.
    pub organizer: Option<String>,
    /// Maximum attendees.
    pub capacity: Option<u32>,
    /// Accepted attendees so far.
    pub accepted: Option<u32>,
}

impl EventRecord {
    /// Place and address joined for display and matching.
    pub fn location_text(&self) -> String {
        [self.place.as_deref(), self.address.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `true` when both capacity and accepted count are known and the event
    /// has no seats left.
    pub fn is_full(&self) -> bool {
        match (self.capacity, self.accepted) {
            (Some(capacity), Some(accepted)) => accepted >= capacity,
            _ => false,
        }
    }

    /// `true` iff the start is absolute and `now <= start <= now + window_days`.
    ///
    /// Schedule-text starts never fall in an absolute window.
    pub fn starts_within(&self, now: DateTime<FixedOffset>, window_days: i64) -> bool {
        match &self.start {
            EventTime::Absolute(start) => {
                let end = now + Duration::days(window_days);
                now <= *start && *start <= end
            }
            EventTime::Schedule(_) => false,
        }
    }

    /// `true` when any keyword is a substring of the place or the address.
    /// An empty keyword list matches everything.
    pub fn matches_location(&self, keywords: &[String]) -> bool {
        if keywords.is_empty() {
            return true;
        }
        keywords.iter().any(|k| {
            self.place.as_deref().is_some_and(|p| p.contains(k.as_str()))
                || self.address.as_deref().is_some_and(|a| a.contains(k.as_str()))
        })
    }
}

/// One event object as returned by the connpass search API.
///
/// Field names follow API v2; v1 names are accepted as aliases. Every field is
/// optional here so that a single malformed object can be reported and skipped
/// instead of failing the whole page.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiEvent {
    #[serde(alias = "event_id")]
    pub id: Option<u64>,
    pub title: Option<String>,
    pub started_at: Option<String>,
    #[serde(alias = "event_url")]
    pub url: Option<String>,
    pub owner_display_name: Option<String>,
    pub limit: Option<u32>,
    pub accepted: Option<u32>,
    pub place: Option<String>,
    pub address: Option<String>,
}

/// Envelope of a connpass search response.
#[derive(Debug, Default, Deserialize)]
pub struct ApiSearchResponse {
    /// Kept as raw values so each object is decoded on its own.
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
}

/// One data row from the arena schedule table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleRow {
    pub date_text: String,
    pub title: String,
    pub open: String,
    pub start: String,
    pub end: String,
}

impl ScheduleRow {
    /// Convert into an [`EventRecord`] with a synthesized `date#title` id.
    pub fn into_record(self) -> EventRecord {
        EventRecord {
            id: Some(format!("{}#{}", self.date_text, self.title)),
            title: self.title,
            start: EventTime::Schedule(ScheduleTimes {
                date: self.date_text,
                open: self.open,
                start: self.start,
                end: self.end,
            }),
            place: None,
            address: None,
            url: None,
            organizer: None,
            capacity: None,
            accepted: None,
        }
    }
}

/// A congestion prediction for a scraped event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Enrichment {
    /// Overall congestion level, e.g. "高".
    pub level: String,
    /// Time window of peak crowding.
    pub peak_time: String,
    /// Short justification.
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn jst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn record_at(start: DateTime<FixedOffset>) -> EventRecord {
        EventRecord {
            id: Some("1".to_string()),
            title: "Rust勉強会".to_string(),
            start: EventTime::Absolute(start),
            place: Some("渋谷スクランブルスクエア".to_string()),
            address: Some("東京都渋谷区渋谷2-24-12".to_string()),
            url: None,
            organizer: None,
            capacity: None,
            accepted: None,
        }
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let now = jst().with_ymd_and_hms(2025, 12, 1, 10, 0, 0).unwrap();
        assert!(record_at(now).starts_within(now, 7));
        assert!(record_at(now + Duration::days(7)).starts_within(now, 7));
        assert!(!record_at(now - Duration::seconds(1)).starts_within(now, 7));
        assert!(!record_at(now + Duration::days(7) + Duration::seconds(1)).starts_within(now, 7));
    }

    #[test]
    fn test_window_compares_across_offsets() {
        let now = jst().with_ymd_and_hms(2025, 12, 1, 10, 0, 0).unwrap();
        // 01:00Z is 10:00 JST, the same instant.
        let utc_start = DateTime::parse_from_rfc3339("2025-12-01T01:00:00+00:00").unwrap();
        assert!(record_at(utc_start).starts_within(now, 0));
    }

    #[test]
    fn test_schedule_time_never_in_window() {
        let now = jst().with_ymd_and_hms(2025, 12, 1, 10, 0, 0).unwrap();
        let record = ScheduleRow {
            date_text: "1(Mon)".to_string(),
            title: "ライブ".to_string(),
            ..Default::default()
        }
        .into_record();
        assert!(!record.starts_within(now, 7));
    }

    #[test]
    fn test_location_matching() {
        let now = jst().with_ymd_and_hms(2025, 12, 1, 10, 0, 0).unwrap();
        let record = record_at(now);
        assert!(record.matches_location(&[]));
        assert!(record.matches_location(&["東京都".to_string()]));
        assert!(record.matches_location(&["オンライン".to_string(), "渋谷".to_string()]));
        assert!(!record.matches_location(&["大阪府".to_string()]));
    }

    #[test]
    fn test_is_full() {
        let now = jst().with_ymd_and_hms(2025, 12, 1, 10, 0, 0).unwrap();
        let mut record = record_at(now);
        assert!(!record.is_full());
        record.capacity = Some(30);
        record.accepted = Some(29);
        assert!(!record.is_full());
        record.accepted = Some(30);
        assert!(record.is_full());
        record.capacity = None;
        assert!(!record.is_full());
    }

    #[test]
    fn test_location_text_skips_missing_parts() {
        let now = jst().with_ymd_and_hms(2025, 12, 1, 10, 0, 0).unwrap();
        let mut record = record_at(now);
        record.place = None;
        assert_eq!(record.location_text(), "東京都渋谷区渋谷2-24-12");
    }

    #[test]
    fn test_api_event_accepts_v1_field_names() {
        let json = r#"{
            "event_id": 364,
            "title": "Pythonもくもく会",
            "started_at": "2025-12-03T19:00:00+09:00",
            "event_url": "https://example.connpass.com/event/364/",
            "limit": 20,
            "accepted": 4
        }"#;
        let event: ApiEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.id, Some(364));
        assert_eq!(event.url.as_deref(), Some("https://example.connpass.com/event/364/"));
        assert_eq!(event.place, None);
    }

    #[test]
    fn test_schedule_row_into_record() {
        let record = ScheduleRow {
            date_text: "12/22(Sat)".to_string(),
            title: "冬フェス".to_string(),
            open: "16:00".to_string(),
            start: "17:00".to_string(),
            end: "20:30".to_string(),
        }
        .into_record();
        assert_eq!(record.id.as_deref(), Some("12/22(Sat)#冬フェス"));
        match record.start {
            EventTime::Schedule(times) => {
                assert_eq!(times.date, "12/22(Sat)");
                assert_eq!(times.end, "20:30");
            }
            EventTime::Absolute(_) => panic!("expected schedule time"),
        }
    }
}
