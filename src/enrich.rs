//! Congestion forecasts for arena events via an LLM, with retry logic.
//!
//! The arena digest attaches a short crowding prediction to every event. The
//! prediction comes from an OpenAI-compatible model reached through
//! `awful_aj`; it is strictly optional, and every failure path ends in "no
//! prediction" rather than an error.
//!
//! # Architecture
//!
//! - [`AskAsync`]: Core trait defining async LLM interaction
//! - [`AwfulAsk`]: Owns the `awful_aj` config and template and calls `ask`
//! - [`RetryAsk`]: Decorator that retries any `AskAsync` per a [`RetryPolicy`]
//! - [`Enricher`]: What the arena source needs, a title/time in and an
//!   [`Enrichment`] out
//! - [`AskEnricher`]: Adapts any `AskAsync<Response = String>` into an `Enricher`
//!
//! # Retry Strategy
//!
//! - Exponential backoff from `retry_base_delay_ms` (1s), capped at
//!   `retry_max_delay_ms` (30s)
//! - 0-250ms of random jitter on every wait

use crate::config::EnrichmentConfig;
use crate::models::Enrichment;
use crate::utils::{strip_code_fence, truncate_for_log};
use awful_aj::api::ask;
use awful_aj::{config, config_dir, config::AwfulJadeConfig, template, template::ChatTemplate};
use rand::{Rng, rng};
use std::error::Error;
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Text in, model answer out.
pub trait AskAsync {
    type Response;

    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>>;
}

/// Backoff schedule for forecast requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub base_delay: StdDuration,
    pub max_delay: StdDuration,
}

impl RetryPolicy {
    pub fn from_config(settings: &EnrichmentConfig) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: settings.retry_base_delay(),
            max_delay: settings.retry_max_delay(),
        }
    }

    /// Wait before retry number `retry` (1-based), without jitter:
    /// `min(base_delay * 2^(retry-1), max_delay)`.
    pub fn delay(&self, retry: usize) -> StdDuration {
        let exp = u32::try_from(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        let factor = 2u32.checked_pow(exp).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// [`AskAsync`] decorator that retries failed forecast requests per a
/// [`RetryPolicy`], adding up to 250ms of jitter to each wait.
pub struct RetryAsk<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: AskAsync> RetryAsk<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<T: AskAsync> AskAsync for RetryAsk<T> {
    type Response = T::Response;

    #[instrument(level = "debug", skip_all, fields(max_retries = self.policy.max_retries))]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let t0 = Instant::now();
        let mut retry = 0usize;
        loop {
            let err = match self.inner.ask(text).await {
                Ok(resp) => return Ok(resp),
                Err(e) => e,
            };
            retry += 1;
            if retry > self.policy.max_retries {
                warn!(
                    attempts = retry,
                    elapsed_ms = t0.elapsed().as_millis(),
                    error = %err,
                    "Forecast request failed on every attempt"
                );
                return Err(err);
            }
            let jitter = StdDuration::from_millis(rng().random_range(0..=250));
            let delay = self.policy.delay(retry) + jitter;
            debug!(retry, ?delay, error = %err, "Forecast request failed; retrying");
            sleep(delay).await;
        }
    }
}

/// `awful_aj`-backed [`AskAsync`] holding its own config and template.
pub struct AwfulAsk {
    config: AwfulJadeConfig,
    template: ChatTemplate,
}

impl fmt::Debug for AwfulAsk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwfulAsk").finish_non_exhaustive()
    }
}

impl AwfulAsk {
    /// Load the `awful_aj` config file and the named chat template.
    #[instrument(level = "info", skip_all, fields(template = %settings.template))]
    pub async fn load(settings: &EnrichmentConfig) -> Result<Self, Box<dyn Error>> {
        let template = template::load_template(&settings.template).await?;
        let config_path = match &settings.config_path {
            Some(path) => path.clone(),
            None => config_dir()?.join("config.yaml").to_string_lossy().into_owned(),
        };
        let config = config::load_config(&config_path).map_err(|e| format!("{config_path}: {e}"))?;
        info!(%config_path, "Loaded LLM configuration");
        Ok(Self { config, template })
    }
}

impl AskAsync for AwfulAsk {
    type Response = String;

    #[instrument(level = "debug", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let t0 = Instant::now();
        let res = ask(&self.config, text.to_string(), &self.template, None, None).await;
        if let Err(e) = &res {
            warn!(elapsed_ms = t0.elapsed().as_millis(), error = %e, "LLM call failed");
        }
        res
    }
}

/// Produces a congestion forecast for one event, or nothing.
pub trait Enricher {
    async fn predict(&self, title: &str, start: &str) -> Option<Enrichment>;
}

/// [`Enricher`] over any text-in/text-out LLM client.
#[derive(Debug)]
pub struct AskEnricher<A> {
    client: A,
}

impl<A> AskEnricher<A> {
    pub fn new(client: A) -> Self {
        Self { client }
    }
}

impl AskEnricher<RetryAsk<AwfulAsk>> {
    /// Production enricher, or `None` when disabled or not configured.
    pub async fn from_config(settings: &EnrichmentConfig) -> Option<Self> {
        if !settings.enabled {
            info!("Congestion forecasts disabled");
            return None;
        }
        match AwfulAsk::load(settings).await {
            Ok(client) => Some(Self::new(RetryAsk::new(
                client,
                RetryPolicy::from_config(settings),
            ))),
            Err(e) => {
                warn!(error = %e, "LLM client unavailable; forecasts will be skipped");
                None
            }
        }
    }
}

impl<A> Enricher for AskEnricher<A>
where
    A: AskAsync<Response = String>,
{
    #[instrument(level = "info", skip_all, fields(%title))]
    async fn predict(&self, title: &str, start: &str) -> Option<Enrichment> {
        let prompt = forecast_prompt(title, start);
        let response = match self.client.ask(&prompt).await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "Forecast request failed");
                return None;
            }
        };
        match parse_forecast(&response) {
            Ok(enrichment) => {
                debug!(level = %enrichment.level, "Parsed forecast");
                Some(enrichment)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    response_preview = %truncate_for_log(&response, 200),
                    "Model returned non-conforming JSON; no forecast"
                );
                None
            }
        }
    }
}

/// Prompt sent for one event.
pub fn forecast_prompt(title: &str, start: &str) -> String {
    format!(
        "横浜アリーナで開催されるイベントの新横浜駅周辺の混雑を予想してください。\n\
         イベント名: {title}\n\
         時間: {start}\n\
         次のキーを持つJSONのみを返してください: \"level\"(低/中/高), \"peak_time\", \"reason\"(40文字以内)"
    )
}

/// Decode a model answer, tolerating a surrounding code fence.
pub fn parse_forecast(response: &str) -> Result<Enrichment, serde_json::Error> {
    serde_json::from_str(strip_code_fence(response))
}
