//! Event sources feeding the notification pipeline.
//!
//! Each source follows the same three-step shape, captured by [`EventSource`]:
//!
//! 1. **Fetching**: Pull raw data upstream and normalize it into [`EventRecord`]s
//!    that already satisfy the source's date window
//! 2. **Composing**: Render those records into a Slack [`Payload`]
//! 3. **Delivering**: Done by the runner through a [`crate::notify::Notifier`]
//!
//! # Supported Sources
//!
//! | Source | Module | Method | Notes |
//! |--------|--------|--------|-------|
//! | connpass | [`connpass`] | JSON search API | One sub-query per location, deduped by id |
//! | Yokohama Arena | [`yokoari`] | HTML scraping | Headless render fallback, today's rows only |
//!
//! Sources never fail because of a single bad record or sub-query; those are
//! logged and skipped. An empty result means "nothing to announce".

use crate::message::Payload;
use crate::models::EventRecord;
use std::error::Error;

pub mod connpass;
pub mod yokoari;

/// A fetch-and-compose event source.
pub trait EventSource {
    /// Short name used in logs and the run summary.
    fn name(&self) -> &'static str;

    /// Fetch, normalize, filter and dedupe this run's events.
    async fn fetch_events(&self) -> Result<Vec<EventRecord>, Box<dyn Error>>;

    /// Build the message for `events`; `None` means send nothing.
    async fn compose_message(&self, events: &[EventRecord]) -> Option<Payload>;
}
