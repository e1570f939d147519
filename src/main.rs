//! # soon_events
//!
//! Collects events happening soon and posts a digest to Slack, once per cron
//! invocation.
//!
//! ## Sources
//!
//! - **connpass**: data/ML study groups in the next week, searched per region
//!   and merged, posted to the tech channel
//! - **Yokohama Arena**: today's schedule with an LLM congestion forecast per
//!   event, posted to the life channel
//!
//! ## Usage
//!
//! ```sh
//! CONNPASS_API_KEY=... SLACK_WEBHOOK_TECH=... SLACK_WEBHOOK_LIFE=... soon_events
//! soon_events --dry-run --source yokoari --date 2025-12-22
//! ```
//!
//! ## Architecture
//!
//! Each source runs the same sequence, isolated from the others:
//! 1. **Fetching**: Query or scrape upstream, normalize into `EventRecord`s
//! 2. **Filtering**: Date window, location keywords, dedup
//! 3. **Composing**: Build the Slack Block Kit payload (≤ 10 events)
//! 4. **Delivering**: POST to the channel webhook (or print with `--dry-run`)

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod enrich;
mod message;
mod models;
mod notify;
mod render;
mod runner;
mod sources;
mod utils;

use cli::{Cli, SourceSelection};
use config::AppConfig;
use enrich::AskEnricher;
use notify::{StdoutNotifier, WebhookNotifier};
use render::ChromeRenderer;
use runner::RunReport;
use sources::EventSource;
use sources::connpass::ConnpassSource;
use sources::yokoari::YokoariSource;
use utils::reference_now;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("soon_events starting up");

    let args = Cli::parse();
    debug!(?args.config, ?args.source, ?args.date, dry_run = args.dry_run, "Parsed CLI arguments");

    let config = AppConfig::load(args.config.as_deref())?.with_secrets(
        args.connpass_api_key.clone(),
        args.tech_webhook.clone(),
        args.life_webhook.clone(),
    );
    let now = reference_now(args.date);
    info!(%now, "Reference time");

    let mut report = RunReport::default();

    // ---- connpass → tech channel ----
    if args.source.includes(SourceSelection::Connpass) {
        match ConnpassSource::new(config.connpass.clone(), now) {
            Ok(source) => {
                let webhook = config.webhooks.tech.clone();
                deliver(&mut report, &source, webhook, "tech", args.dry_run).await
            }
            Err(e) => {
                error!(error = %e, "Could not set up connpass source");
                report.record("connpass", Err(e.to_string()));
            }
        }
    }

    // ---- Yokohama Arena → life channel ----
    if args.source.includes(SourceSelection::Yokoari) {
        let renderer = ChromeRenderer::discover(
            config.yokoari.browser_path.as_deref(),
            config.yokoari.render_timeout(),
        );
        if let Some(r) = &renderer {
            info!(browser = %r.binary().display(), "Render fallback available");
        }
        let enricher = AskEnricher::from_config(&config.enrichment).await;

        match YokoariSource::new(config.yokoari.clone(), now.date_naive(), renderer, enricher) {
            Ok(source) => {
                let webhook = config.webhooks.life.clone();
                deliver(&mut report, &source, webhook, "life", args.dry_run).await
            }
            Err(e) => {
                error!(error = %e, "Could not set up arena source");
                report.record("yokoari", Err(e.to_string()));
            }
        }
    }

    report.log_summary();
    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    if report.all_failed() {
        return Err("every source failed".into());
    }
    Ok(())
}

/// Run `source` against the right notifier for this invocation.
async fn deliver<S: EventSource>(
    report: &mut RunReport,
    source: &S,
    webhook: Option<String>,
    label: &'static str,
    dry_run: bool,
) {
    if dry_run {
        report.run(source, &StdoutNotifier { label }).await;
        return;
    }
    match WebhookNotifier::new(webhook, label) {
        Ok(notifier) => report.run(source, &notifier).await,
        Err(e) => {
            error!(error = %e, "Could not build webhook client");
            report.record(source.name(), Err(e.to_string()));
        }
    }
}
