//! Yokohama Arena schedule scraper.
//!
//! The schedule page lists a month of events in `<table id="calbox">` with the
//! columns date, title, doors open, start and end. When the server sends the
//! table the page is parsed directly; when the table is built client-side the
//! same URL is rendered through a [`PageRenderer`] and the DOM is parsed
//! instead. Only rows for today survive.
//!
//! The date column comes as `22(土)` or `12/22(土)`, sometimes in full-width
//! digits. A row without a month token is taken to be in the current month.

use crate::config::YokoariConfig;
use crate::enrich::Enricher;
use crate::message::{self, MAX_EVENTS, Payload, SourceStyle, plain_time_label};
use crate::models::{EventRecord, ScheduleRow};
use crate::render::PageRenderer;
use crate::sources::EventSource;
use chrono::{Datelike, NaiveDate};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use std::error::Error;
use tracing::{debug, error, info, instrument, warn};

/// Optional `month/` prefix, then the day of month. ASCII digits only; see
/// [`to_half_width`].
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:([0-9]{1,2})\s*/\s*)?([0-9]{1,2})").unwrap());

/// Arena schedule source.
///
/// `R` renders client-side pages, `E` produces congestion forecasts; either
/// may be absent at runtime.
#[derive(Debug)]
pub struct YokoariSource<R, E> {
    client: Client,
    config: YokoariConfig,
    today: NaiveDate,
    renderer: Option<R>,
    enricher: Option<E>,
}

impl<R, E> YokoariSource<R, E>
where
    R: PageRenderer,
    E: Enricher,
{
    pub fn new(
        config: YokoariConfig,
        today: NaiveDate,
        renderer: Option<R>,
        enricher: Option<E>,
    ) -> Result<Self, Box<dyn Error>> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            config,
            today,
            renderer,
            enricher,
        })
    }

    /// Today's events from the schedule page of `year`/`month`.
    ///
    /// Network and render failures are logged and produce an empty list.
    #[instrument(level = "info", skip(self))]
    pub async fn fetch(&self, year: i32, month: u32) -> Vec<EventRecord> {
        let url = self.config.month_url(year, month);

        let mut rows = match self.fetch_html(&url).await {
            Ok(html) => self.parse(&html),
            Err(e) => {
                error!(%url, error = %e, "Schedule page fetch failed");
                Vec::new()
            }
        };

        if rows.is_empty() {
            warn!(%url, "No schedule rows in page source; page may be client-rendered");
            rows = self.render_rows(&url).await;
        } else {
            info!(count = rows.len(), "Parsed schedule from page source");
        }

        let events = todays_events(rows, self.today);
        info!(count = events.len(), today = %self.today, "Arena events today");
        events
    }

    async fn fetch_html(&self, url: &str) -> Result<String, Box<dyn Error>> {
        let html = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        debug!(bytes = html.len(), "Fetched schedule page");
        Ok(html)
    }

    async fn render_rows(&self, url: &str) -> Vec<ScheduleRow> {
        let Some(renderer) = &self.renderer else {
            warn!("No renderer available; skipping arena schedule this run");
            return Vec::new();
        };
        match renderer.render(url).await {
            Ok(html) => {
                let rows = self.parse(&html);
                if rows.is_empty() {
                    warn!("Rendered page still has no schedule rows");
                } else {
                    info!(count = rows.len(), "Parsed schedule from rendered page");
                }
                rows
            }
            Err(e) => {
                error!(error = %e, "Headless render failed");
                Vec::new()
            }
        }
    }

    fn parse(&self, html: &str) -> Vec<ScheduleRow> {
        match parse_schedule_table(html, &self.config.table_id, &self.config.ignored_titles) {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, table_id = %self.config.table_id, "Bad table selector");
                Vec::new()
            }
        }
    }
}

impl<R, E> EventSource for YokoariSource<R, E>
where
    R: PageRenderer,
    E: Enricher,
{
    fn name(&self) -> &'static str {
        "yokoari"
    }

    async fn fetch_events(&self) -> Result<Vec<EventRecord>, Box<dyn Error>> {
        Ok(self.fetch(self.today.year(), self.today.month()).await)
    }

    /// Forecasts are requested one event at a time; a failed forecast only
    /// costs that event its prediction line.
    async fn compose_message(&self, events: &[EventRecord]) -> Option<Payload> {
        let mut enrichments = Vec::new();
        if let Some(enricher) = &self.enricher {
            for event in events.iter().take(MAX_EVENTS) {
                let start = plain_time_label(&event.start);
                enrichments.push(enricher.predict(&event.title, &start).await);
            }
        }
        message::compose(&self.config.header_title, SourceStyle::Schedule, events, &enrichments)
    }
}

/// Parse the data rows of `table#<table_id>`.
///
/// The first row is the header. Rows with fewer than two cells, an empty
/// title, or a title containing one of `ignored_titles` are dropped. Missing
/// trailing time cells become empty strings. Returns an empty list when the
/// table is absent.
pub fn parse_schedule_table(
    html: &str,
    table_id: &str,
    ignored_titles: &[String],
) -> Result<Vec<ScheduleRow>, Box<dyn Error>> {
    let table_selector =
        Selector::parse(&format!("table#{table_id}")).map_err(|e| e.to_string())?;
    let row_selector = Selector::parse("tr")?;
    let cell_selector = Selector::parse("td, th")?;
    let document = Html::parse_document(html);
    let Some(table) = document.select(&table_selector).next() else {
        return Ok(Vec::new());
    };

    let rows = table
        .select(&row_selector)
        .skip(1)
        .filter_map(|tr| {
            let cells: Vec<String> = tr
                .select(&cell_selector)
                .map(|cell| cell.text().map(str::trim).collect::<String>())
                .collect();
            if cells.len() < 2 {
                return None;
            }
            let cell = |i: usize| cells.get(i).cloned().unwrap_or_default();
            let row = ScheduleRow {
                date_text: cell(0),
                title: cell(1),
                open: cell(2),
                start: cell(3),
                end: cell(4),
            };
            if row.title.is_empty()
                || ignored_titles.iter().any(|label| row.title.contains(label.as_str()))
            {
                debug!(title = %row.title, "Skipping non-event row");
                return None;
            }
            Some(row)
        })
        .collect();
    Ok(rows)
}

/// `true` when `date_text` names `today`.
///
/// The leading day must equal today's day of month. An explicit month must
/// also match; a missing month is accepted as the current one.
pub fn is_on_day(date_text: &str, today: NaiveDate) -> bool {
    let date_text = to_half_width(date_text);
    let Some(caps) = DATE_RE.captures(&date_text) else {
        return false;
    };
    let day_matches = caps
        .get(2)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .is_some_and(|day| day == today.day());
    let month_matches = match caps.get(1) {
        Some(m) => m.as_str().parse::<u32>().ok() == Some(today.month()),
        None => true,
    };
    day_matches && month_matches
}

/// Map full-width digits and slash (`１２／２２`) to ASCII.
fn to_half_width(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '０'..='９' => char::from(b'0' + (c as u32 - '０' as u32) as u8),
            '／' => '/',
            _ => c,
        })
        .collect()
}

/// Day-filter, dedupe on (date, title), and convert to records.
pub fn todays_events(rows: Vec<ScheduleRow>, today: NaiveDate) -> Vec<EventRecord> {
    rows.into_iter()
        .filter(|row| is_on_day(&row.date_text, today))
        .unique_by(|row| (row.date_text.clone(), row.title.clone()))
        .map(ScheduleRow::into_record)
        .collect()
}
