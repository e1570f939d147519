//! Runtime configuration for both sources and the enrichment client.
//!
//! Defaults reproduce the production setup: a data/ML study-group search on
//! connpass across Tokyo, Kanagawa and online events, and today's Yokohama
//! Arena schedule. A YAML file may override any subset of fields; secrets and
//! webhook targets come from the CLI or environment (see [`crate::cli`]) and
//! are merged in by [`AppConfig::with_secrets`].
//!
//! ```yaml
//! connpass:
//!   keyword: "データ"
//!   keyword_or: ["メルカリ", "LINE"]
//!   days_ahead: 14
//! yokoari:
//!   ignored_titles: ["搬入日"]
//! ```

use serde::Deserialize;
use std::error::Error;
use std::time::Duration;
use tracing::{info, instrument};

/// Top-level configuration, one section per collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub connpass: ConnpassConfig,
    pub yokoari: YokoariConfig,
    pub enrichment: EnrichmentConfig,
    /// Slack targets. Filled from CLI/env, never from the YAML file.
    #[serde(skip)]
    pub webhooks: Webhooks,
}

/// Slack incoming webhook URLs per channel.
#[derive(Debug, Clone, Default)]
pub struct Webhooks {
    /// Receives the connpass study-group digest.
    pub tech: Option<String>,
    /// Receives the arena schedule and congestion forecast.
    pub life: Option<String>,
}

/// Search settings for the connpass API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnpassConfig {
    pub endpoint: String,
    /// AND search term.
    pub keyword: String,
    /// OR search terms, sent comma-joined.
    pub keyword_or: Vec<String>,
    /// One sub-query is issued per entry; empty means a single unfiltered query.
    pub locations: Vec<String>,
    /// Post-filter on place/address; empty disables it.
    pub location_keywords: Vec<String>,
    pub days_ahead: i64,
    pub page_size: u32,
    /// 1 = start date, 2 = last updated, 3 = newest.
    pub order: u8,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Pause between consecutive sub-queries.
    pub request_interval_ms: u64,
    pub timeout_secs: u64,
    pub header_title: String,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ConnpassConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://connpass.com/api/v2/events/".to_string(),
            keyword: "データ".to_string(),
            keyword_or: vec!["メルカリ".to_string(), "LINE".to_string()],
            locations: vec![
                "東京都".to_string(),
                "神奈川県".to_string(),
                "オンライン".to_string(),
            ],
            location_keywords: Vec::new(),
            days_ahead: 7,
            page_size: 50,
            order: 2,
            max_attempts: 3,
            retry_base_delay_ms: 5_000,
            request_interval_ms: 1_000,
            timeout_secs: 10,
            header_title: "📚 データ系勉強会Pickup".to_string(),
            api_key: None,
        }
    }
}

impl ConnpassConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Scrape settings for the Yokohama Arena schedule page.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct YokoariConfig {
    /// Page URL with `{year}` and `{month}` placeholders; month is zero-padded.
    pub url_template: String,
    pub table_id: String,
    /// Rows whose title contains any of these are not events.
    pub ignored_titles: Vec<String>,
    pub timeout_secs: u64,
    pub render_timeout_secs: u64,
    /// Explicit headless browser binary; otherwise looked up on `PATH`.
    pub browser_path: Option<String>,
    pub header_title: String,
}

impl Default for YokoariConfig {
    fn default() -> Self {
        Self {
            url_template: "https://www.yokohama-arena.co.jp/schedule/?y={year}&m={month}"
                .to_string(),
            table_id: "calbox".to_string(),
            ignored_titles: vec![
                "搬入".to_string(),
                "設営".to_string(),
                "イベント名".to_string(),
            ],
            timeout_secs: 15,
            render_timeout_secs: 30,
            browser_path: None,
            header_title: "🏟️ 横浜アリーナ 本日のイベント".to_string(),
        }
    }
}

impl YokoariConfig {
    /// Schedule URL for one month.
    pub fn month_url(&self, year: i32, month: u32) -> String {
        self.url_template
            .replace("{year}", &year.to_string())
            .replace("{month}", &format!("{month:02}"))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }
}

/// Congestion forecast settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    /// awful_aj chat template name.
    pub template: String,
    /// awful_aj config.yaml; defaults to the one in the awful_aj config dir.
    pub config_path: Option<String>,
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            template: "congestion_forecast".to_string(),
            config_path: None,
            max_retries: 2,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
        }
    }
}

impl EnrichmentConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

impl AppConfig {
    /// Load configuration from an optional YAML file.
    ///
    /// With no path the built-in defaults are returned. Missing keys in the
    /// file keep their defaults.
    #[instrument(level = "info")]
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn Error>> {
        let Some(path) = path else {
            info!("No config file given; using defaults");
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_yaml::from_str(&raw)?;
        info!(path, "Loaded configuration");
        Ok(config)
    }

    /// Attach credentials and webhook targets supplied outside the file.
    pub fn with_secrets(
        mut self,
        connpass_api_key: Option<String>,
        tech_webhook: Option<String>,
        life_webhook: Option<String>,
    ) -> Self {
        self.connpass.api_key = connpass_api_key.filter(|k| !k.is_empty());
        self.webhooks = Webhooks {
            tech: tech_webhook.filter(|u| !u.is_empty()),
            life: life_webhook.filter(|u| !u.is_empty()),
        };
        self
    }
}
