//! Utility functions for time handling and string manipulation.
//!
//! This module provides helper functions used throughout the application:
//! - The fixed UTC+9 clock every date decision is made in
//! - String truncation for logging response bodies
//! - Markdown code-fence stripping for LLM responses

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};

/// Offset of Japan Standard Time in seconds.
const JST_OFFSET_SECS: i32 = 9 * 3600;

/// The fixed UTC+9 offset, independent of the host timezone.
pub fn jst() -> FixedOffset {
    FixedOffset::east_opt(JST_OFFSET_SECS).unwrap()
}

/// Current time in UTC+9.
pub fn now_jst() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&jst())
}

/// The instant a run treats as "now".
///
/// With no override this is the wall clock. With a date override it is the
/// same wall-clock time of day moved onto that date, so windows computed for
/// a replayed day look like they would have on that morning.
pub fn reference_now(date_override: Option<NaiveDate>) -> DateTime<FixedOffset> {
    let now = now_jst();
    match date_override {
        None => now,
        Some(date) => jst()
            .from_local_datetime(&date.and_time(now.time()))
            .single()
            .unwrap_or(now),
    }
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` characters with an ellipsis and
/// byte count indicator appended. Cuts on a character boundary so that
/// Japanese text never panics.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Remove a surrounding markdown code fence, if any.
///
/// LLMs often answer with ```` ```json … ``` ```` even when asked for bare JSON.
pub fn strip_code_fence(s: &str) -> &str {
    let trimmed = s.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}
