//! connpass study-group search.
//!
//! The connpass search API cannot OR several `address` values in one request,
//! so one sub-query is issued per configured location and the pages are merged.
//! A hybrid event shows up under more than one location; the first sub-query
//! that returns it wins.
//!
//! # Failure handling
//!
//! | Upstream answer | Effect |
//! |-----------------|--------|
//! | 429 | wait `(attempt + 1) * base_delay`, retry up to `max_attempts` total |
//! | 404 | this sub-query yields nothing, the others continue |
//! | other status / transport / bad JSON | this sub-query yields nothing |
//! | one malformed event object | that event is skipped |
//!
//! Nothing here returns an error to the runner once the HTTP client exists.

use crate::config::ConnpassConfig;
use crate::message::{self, Payload, SourceStyle};
use crate::models::{ApiEvent, ApiSearchResponse, EventRecord, EventTime};
use crate::sources::EventSource;
use crate::utils::truncate_for_log;
use chrono::{DateTime, FixedOffset};
use reqwest::{Client, StatusCode};
use std::collections::HashSet;
use std::error::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Why a single sub-query request failed.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("rate limited (HTTP 429)")]
    RateLimited,
    #[error("endpoint not found (HTTP 404)")]
    NotFound,
    #[error("unexpected HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed response: {source}; body: {preview}")]
    Decode {
        source: serde_json::Error,
        preview: String,
    },
}

/// Search terms sent with every sub-query.
#[derive(Debug, Clone, Copy)]
pub struct Keywords<'a> {
    /// Must match (`keyword`).
    pub all: &'a str,
    /// Any one may match (`keyword_or`, comma-joined).
    pub any: &'a [String],
}

/// connpass search aggregated over several locations.
#[derive(Debug)]
pub struct ConnpassSource {
    client: Client,
    endpoint: Url,
    config: ConnpassConfig,
    now: DateTime<FixedOffset>,
}

impl ConnpassSource {
    /// `now` anchors the date window for the whole run.
    pub fn new(config: ConnpassConfig, now: DateTime<FixedOffset>) -> Result<Self, Box<dyn Error>> {
        if config.api_key.is_none() {
            warn!("CONNPASS_API_KEY is missing; requests are unauthenticated");
        }
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(USER_AGENT)
            .build()?;
        let endpoint = Url::parse(&config.endpoint)?;
        Ok(Self {
            client,
            endpoint,
            config,
            now,
        })
    }

    /// Query every location with `keywords`, merge by id, then apply the date
    /// window and the optional location-keyword filter.
    #[instrument(
        level = "info",
        skip(self, locations),
        fields(keyword = keywords.all, locations = locations.len())
    )]
    pub async fn fetch(
        &self,
        window_days: i64,
        keywords: Keywords<'_>,
        locations: &[String],
    ) -> Vec<EventRecord> {
        let sub_queries: Vec<Option<&str>> = if locations.is_empty() {
            vec![None]
        } else {
            locations.iter().map(|l| Some(l.as_str())).collect()
        };

        let mut pages = Vec::with_capacity(sub_queries.len());
        for (i, location) in sub_queries.into_iter().enumerate() {
            if i > 0 && !self.config.request_interval().is_zero() {
                sleep(self.config.request_interval()).await;
            }
            pages.push(self.run_sub_query(keywords, location).await);
        }

        let merged = merge_unique(pages);
        let events = filter_events(
            merged,
            self.now,
            window_days,
            &self.config.location_keywords,
        );
        info!(count = events.len(), "connpass events in window");
        events
    }

    /// One sub-query with the rate-limit retry policy applied.
    #[instrument(level = "info", skip(self, keywords))]
    async fn run_sub_query(&self, keywords: Keywords<'_>, location: Option<&str>) -> Vec<ApiEvent> {
        let max_attempts = self.config.max_attempts;
        for attempt in 0..max_attempts {
            match self.fetch_page(keywords, location).await {
                Ok(events) => {
                    debug!(count = events.len(), attempt, "Fetched connpass page");
                    return events;
                }
                Err(ApiError::RateLimited) if attempt + 1 < max_attempts => {
                    let delay = self.config.retry_base_delay() * (attempt + 1);
                    warn!(attempt, ?delay, "connpass rate limited; backing off");
                    sleep(delay).await;
                }
                Err(ApiError::RateLimited) => {
                    error!(
                        attempts = max_attempts,
                        "connpass still rate limited; giving up on sub-query"
                    );
                    return Vec::new();
                }
                Err(ApiError::NotFound) => {
                    error!("connpass endpoint not found; skipping sub-query");
                    return Vec::new();
                }
                Err(e) => {
                    error!(error = %e, "connpass sub-query failed");
                    return Vec::new();
                }
            }
        }
        Vec::new()
    }

    /// Single request; decodes each event object on its own so one bad entry
    /// does not sink the page.
    async fn fetch_page(
        &self,
        keywords: Keywords<'_>,
        location: Option<&str>,
    ) -> Result<Vec<ApiEvent>, ApiError> {
        let mut params: Vec<(&str, String)> = vec![
            ("keyword", keywords.all.to_string()),
            ("count", self.config.page_size.to_string()),
            ("order", self.config.order.to_string()),
        ];
        if !keywords.any.is_empty() {
            params.push(("keyword_or", keywords.any.join(",")));
        }
        if let Some(location) = location {
            params.push(("address", location.to_string()));
        }

        let mut request = self.client.get(self.endpoint.clone()).query(&params);
        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => return Err(ApiError::RateLimited),
            StatusCode::NOT_FOUND => return Err(ApiError::NotFound),
            _ => {}
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: truncate_for_log(&body, 200),
            });
        }

        let page: ApiSearchResponse =
            serde_json::from_str(&body).map_err(|source| ApiError::Decode {
                source,
                preview: truncate_for_log(&body, 200),
            })?;
        let events = page
            .events
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<ApiEvent>(value) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable connpass event");
                    None
                }
            })
            .collect();
        Ok(events)
    }
}

impl EventSource for ConnpassSource {
    fn name(&self) -> &'static str {
        "connpass"
    }

    async fn fetch_events(&self) -> Result<Vec<EventRecord>, Box<dyn Error>> {
        let keywords = Keywords {
            all: &self.config.keyword,
            any: &self.config.keyword_or,
        };
        Ok(self
            .fetch(self.config.days_ahead, keywords, &self.config.locations)
            .await)
    }

    async fn compose_message(&self, events: &[EventRecord]) -> Option<Payload> {
        message::compose(&self.config.header_title, SourceStyle::Api, events, &[])
    }
}

/// Concatenate pages in issue order, keeping the first occurrence of each id.
/// Events without an id cannot be deduplicated and are dropped.
pub fn merge_unique(pages: Vec<Vec<ApiEvent>>) -> Vec<ApiEvent> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for event in pages.into_iter().flatten() {
        let Some(id) = event.id else {
            warn!(title = ?event.title, "Skipping connpass event without id");
            continue;
        };
        if seen.insert(id) {
            merged.push(event);
        }
    }
    merged
}

/// Normalize, then keep events starting in `[now, now + window_days]` whose
/// place or address matches one of `location_keywords` (if any are given).
pub fn filter_events(
    events: Vec<ApiEvent>,
    now: DateTime<FixedOffset>,
    window_days: i64,
    location_keywords: &[String],
) -> Vec<EventRecord> {
    events
        .into_iter()
        .filter_map(|event| match to_record(event) {
            Ok(record) => Some(record),
            Err(reason) => {
                warn!(%reason, "Dropping connpass event");
                None
            }
        })
        .filter(|record| record.starts_within(now, window_days))
        .filter(|record| {
            let matched = record.matches_location(location_keywords);
            if !matched {
                debug!(
                    id = ?record.id,
                    location = %record.location_text(),
                    "Outside configured locations"
                );
            }
            matched
        })
        .collect()
}

/// Convert an API object into an [`EventRecord`].
pub fn to_record(event: ApiEvent) -> Result<EventRecord, String> {
    let id = event.id.ok_or("missing id")?;
    let title = event.title.ok_or_else(|| format!("event {id}: missing title"))?;
    let started_at = event
        .started_at
        .ok_or_else(|| format!("event {id}: missing started_at"))?;
    let start = DateTime::parse_from_rfc3339(&started_at)
        .map_err(|e| format!("event {id}: bad started_at {started_at:?}: {e}"))?;

    Ok(EventRecord {
        id: Some(id.to_string()),
        title,
        start: EventTime::Absolute(start),
        place: event.place,
        address: event.address,
        url: event.url,
        organizer: event.owner_display_name,
        capacity: event.limit,
        accepted: event.accepted,
    })
}
