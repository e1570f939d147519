//! Command-line interface definitions for soon_events.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Credentials and webhook URLs can be provided via flags or environment
//! variables, which is how the cron job supplies them.

use chrono::NaiveDate;
use clap::{Parser, ValueEnum};

/// Which sources a run should process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceSelection {
    /// connpass study groups only.
    Connpass,
    /// Yokohama Arena schedule only.
    Yokoari,
    /// Every source, one after another.
    All,
}

/// Command-line arguments for the soon_events application.
///
/// # Examples
///
/// ```sh
/// # Normal cron invocation; secrets come from the environment
/// soon_events
///
/// # Preview today's payloads without posting
/// soon_events --dry-run
///
/// # Replay the arena digest for a given day
/// soon_events --source yokoari --date 2025-12-22 --dry-run
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML config file
    #[arg(short, long)]
    pub config: Option<String>,

    /// connpass API key
    #[arg(long, env = "CONNPASS_API_KEY", hide_env_values = true)]
    pub connpass_api_key: Option<String>,

    /// Slack webhook for the tech channel (connpass digest)
    #[arg(long, env = "SLACK_WEBHOOK_TECH", hide_env_values = true)]
    pub tech_webhook: Option<String>,

    /// Slack webhook for the life channel (arena schedule)
    #[arg(long, env = "SLACK_WEBHOOK_LIFE", hide_env_values = true)]
    pub life_webhook: Option<String>,

    /// Treat this date (YYYY-MM-DD, UTC+9) as today
    #[arg(short, long)]
    pub date: Option<NaiveDate>,

    /// Print payloads instead of posting them
    #[arg(long)]
    pub dry_run: bool,

    /// Restrict the run to one source
    #[arg(short, long, value_enum, default_value_t = SourceSelection::All)]
    pub source: SourceSelection,
}

impl SourceSelection {
    pub fn includes(self, other: SourceSelection) -> bool {
        self == SourceSelection::All || self == other
    }
}
