//! Slack Block Kit payload generation.
//!
//! Turns a list of [`EventRecord`]s into the message document handed to the
//! notifier: a header block with the source title, then one `mrkdwn` section
//! and one divider per event, capped at [`MAX_EVENTS`].
//!
//! Composition is a pure transform. Enrichment, when a source uses it, is
//! resolved beforehand and passed in as a slice parallel to `events`.

use crate::models::{Enrichment, EventRecord, EventTime, ScheduleTimes};
use crate::utils::jst;
use serde::{Deserialize, Serialize};

/// Hard cap on event sections per message.
pub const MAX_EVENTS: usize = 10;

const FULL_BADGE: &str = "🔴満席";
const OPEN_BADGE: &str = "🟢";
const UNKNOWN_TIME: &str = "日時不明";
const NO_PREDICTION: &str = "混雑予想: 取得できませんでした";

/// The document posted to the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub blocks: Vec<Block>,
}

/// One Block Kit block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Header { text: TextObject },
    Section { text: TextObject },
    Divider,
}

/// A Block Kit text object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextObject {
    #[serde(rename = "type")]
    pub kind: TextKind,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextKind {
    PlainText,
    Mrkdwn,
}

/// How a source wants its events rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStyle {
    /// Absolute start times, no enrichment line.
    Api,
    /// Raw schedule strings plus a congestion forecast line.
    Schedule,
}

impl Payload {
    /// Number of event sections in the payload.
    pub fn event_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| matches!(b, Block::Section { .. }))
            .count()
    }
}

/// Build the payload for one source.
///
/// `enrichments[i]` belongs to `events[i]`; a short or empty slice means "no
/// prediction" for the remaining events. Returns `None` for an empty list so
/// that callers send nothing.
pub fn compose(
    header_title: &str,
    style: SourceStyle,
    events: &[EventRecord],
    enrichments: &[Option<Enrichment>],
) -> Option<Payload> {
    if events.is_empty() {
        return None;
    }

    let mut blocks = Vec::with_capacity(1 + 2 * events.len().min(MAX_EVENTS));
    blocks.push(Block::Header {
        text: TextObject {
            kind: TextKind::PlainText,
            text: header_title.to_string(),
            emoji: Some(true),
        },
    });

    for (i, event) in events.iter().take(MAX_EVENTS).enumerate() {
        let enrichment = enrichments.get(i).and_then(Option::as_ref);
        blocks.push(Block::Section {
            text: TextObject {
                kind: TextKind::Mrkdwn,
                text: section_text(event, style, enrichment),
                emoji: None,
            },
        });
        blocks.push(Block::Divider);
    }

    Some(Payload { blocks })
}

fn section_text(
    event: &EventRecord,
    style: SourceStyle,
    enrichment: Option<&Enrichment>,
) -> String {
    let badge = if event.is_full() { FULL_BADGE } else { OPEN_BADGE };
    let title = match &event.url {
        Some(url) => format!("<{}|{}>", url, escape(&event.title)),
        None => escape(&event.title),
    };

    let mut text = format!("*{}* {} {}", time_label(&event.start), badge, title);
    if let Some(organizer) = &event.organizer {
        text.push_str(&format!("\n主催: {}", escape(organizer)));
    }
    if style == SourceStyle::Schedule {
        text.push('\n');
        text.push_str(&enrichment_text(enrichment));
    }
    text
}

/// Display label for a start time, escaped for mrkdwn.
///
/// Absolute times render as `MM/DD HH:MM` in UTC+9; schedule times join the
/// non-empty raw columns with ` / `.
pub fn time_label(start: &EventTime) -> String {
    match start {
        EventTime::Absolute(_) => plain_time_label(start),
        EventTime::Schedule(_) => escape(&plain_time_label(start)),
    }
}

/// [`time_label`] without mrkdwn escaping, for text that never reaches Slack.
pub fn plain_time_label(start: &EventTime) -> String {
    match start {
        EventTime::Absolute(ts) => ts.with_timezone(&jst()).format("%m/%d %H:%M").to_string(),
        EventTime::Schedule(times) => schedule_label(times),
    }
}

fn schedule_label(times: &ScheduleTimes) -> String {
    let parts: Vec<String> = [
        (None, &times.date),
        (Some("開場"), &times.open),
        (Some("開演"), &times.start),
        (Some("終演"), &times.end),
    ]
    .into_iter()
    .filter(|(_, value)| !value.trim().is_empty())
    .map(|(label, value)| match label {
        Some(label) => format!("{label} {}", value.trim()),
        None => value.trim().to_string(),
    })
    .collect();

    if parts.is_empty() {
        UNKNOWN_TIME.to_string()
    } else {
        parts.join(" / ")
    }
}

fn enrichment_text(enrichment: Option<&Enrichment>) -> String {
    match enrichment {
        Some(e) => format!(
            "混雑予想: {}\nピーク: {}\n理由: {}",
            escape(&e.level),
            escape(&e.peak_time),
            escape(&e.reason)
        ),
        None => NO_PREDICTION.to_string(),
    }
}

/// Escape the three characters Slack treats as control sequences in mrkdwn.
pub fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScheduleRow;
    use chrono::DateTime;

    fn api_event(id: u32, title: &str) -> EventRecord {
        EventRecord {
            id: Some(id.to_string()),
            title: title.to_string(),
            start: EventTime::Absolute(
                DateTime::parse_from_rfc3339("2025-12-03T10:30:00Z").unwrap(),
            ),
            place: None,
            address: None,
            url: Some(format!("https://connpass.com/event/{id}/")),
            organizer: Some("PyData.Tokyo".to_string()),
            capacity: Some(50),
            accepted: Some(12),
        }
    }

    fn section_texts(payload: &Payload) -> Vec<&str> {
        payload
            .blocks
            .iter()
            .filter_map(|b| match b {
                Block::Section { text } => Some(text.text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_empty_input_is_none() {
        assert!(compose("title", SourceStyle::Api, &[], &[]).is_none());
        assert!(compose("title", SourceStyle::Schedule, &[], &[]).is_none());
    }

    #[test]
    fn test_caps_at_ten_events_in_order() {
        let events: Vec<EventRecord> = (0..15)
            .map(|i| api_event(i, &format!("event {i}")))
            .collect();
        let payload = compose("title", SourceStyle::Api, &events, &[]).unwrap();

        assert_eq!(payload.event_count(), 10);
        let dividers = payload.blocks.iter().filter(|b| **b == Block::Divider).count();
        assert_eq!(dividers, 10);
        assert_eq!(payload.blocks.len(), 21);
        assert!(matches!(payload.blocks[0], Block::Header { .. }));

        let texts = section_texts(&payload);
        for (i, text) in texts.iter().enumerate() {
            assert!(text.contains(&format!("|event {i}>")), "{text}");
        }
    }

    #[test]
    fn test_compose_is_idempotent() {
        let events = vec![api_event(1, "a"), api_event(2, "b")];
        let first = compose("title", SourceStyle::Api, &events, &[]);
        let second = compose("title", SourceStyle::Api, &events, &[]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_api_section_text() {
        let events = [api_event(7, "Kaggle入門")];
        let payload = compose("📚 勉強会", SourceStyle::Api, &events, &[]).unwrap();
        let texts = section_texts(&payload);
        assert_eq!(
            texts[0],
            "*12/03 19:30* 🟢 <https://connpass.com/event/7/|Kaggle入門>\n主催: PyData.Tokyo"
        );
    }

    #[test]
    fn test_full_badge_and_plain_title() {
        let mut event = api_event(3, "満員会");
        event.accepted = Some(50);
        event.url = None;
        event.organizer = None;
        let payload = compose("t", SourceStyle::Api, &[event], &[]).unwrap();
        assert_eq!(section_texts(&payload)[0], "*12/03 19:30* 🔴満席 満員会");
    }

    #[test]
    fn test_schedule_label_and_missing_prediction() {
        let event = ScheduleRow {
            date_text: "12/22(Sat)".to_string(),
            title: "冬フェス".to_string(),
            open: "16:00".to_string(),
            start: "17:00".to_string(),
            end: String::new(),
        }
        .into_record();
        let payload = compose("🏟️", SourceStyle::Schedule, &[event], &[]).unwrap();
        assert_eq!(
            section_texts(&payload)[0],
            "*12/22(Sat) / 開場 16:00 / 開演 17:00* 🟢 冬フェス\n混雑予想: 取得できませんでした"
        );
    }

    #[test]
    fn test_schedule_label_unknown_time() {
        let event = ScheduleRow {
            title: "謎イベント".to_string(),
            ..Default::default()
        }
        .into_record();
        assert_eq!(time_label(&event.start), "日時不明");
    }

    #[test]
    fn test_plain_label_is_not_escaped() {
        let event = ScheduleRow {
            date_text: "22(土)".to_string(),
            start: "12:00 & 17:00".to_string(),
            ..Default::default()
        }
        .into_record();
        assert_eq!(plain_time_label(&event.start), "22(土) / 開演 12:00 & 17:00");
        assert_eq!(time_label(&event.start), "22(土) / 開演 12:00 &amp; 17:00");
    }

    #[test]
    fn test_schedule_with_enrichment() {
        let event = ScheduleRow {
            date_text: "22(Sat)".to_string(),
            title: "ライブ".to_string(),
            start: "18:00".to_string(),
            ..Default::default()
        }
        .into_record();
        let enrichment = Enrichment {
            level: "高".to_string(),
            peak_time: "17:00-18:00".to_string(),
            reason: "人気アーティスト".to_string(),
        };
        let payload = compose("t", SourceStyle::Schedule, &[event], &[Some(enrichment)]).unwrap();
        let text = section_texts(&payload)[0];
        assert!(text.contains("混雑予想: 高"));
        assert!(text.contains("ピーク: 17:00-18:00"));
        assert!(text.contains("理由: 人気アーティスト"));
    }

    #[test]
    fn test_escapes_control_characters() {
        let mut event = api_event(9, "R&D <LT会>");
        event.url = None;
        let payload = compose("t", SourceStyle::Api, &[event], &[]).unwrap();
        assert!(section_texts(&payload)[0].contains("R&amp;D &lt;LT会&gt;"));
    }

    #[test]
    fn test_payload_serializes_to_block_kit() {
        let payload = compose("📚", SourceStyle::Api, &[api_event(1, "a")], &[]).unwrap();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["blocks"][0]["type"], "header");
        assert_eq!(json["blocks"][0]["text"]["type"], "plain_text");
        assert_eq!(json["blocks"][0]["text"]["emoji"], true);
        assert_eq!(json["blocks"][1]["type"], "section");
        assert_eq!(json["blocks"][1]["text"]["type"], "mrkdwn");
        assert!(json["blocks"][1]["text"].get("emoji").is_none());
        assert_eq!(json["blocks"][2], serde_json::json!({"type": "divider"}));
    }
}
