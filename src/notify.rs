//! Delivery of composed payloads to Slack incoming webhooks.

use crate::message::Payload;
use reqwest::Client;
use std::error::Error;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// What happened to a payload handed to a [`Notifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by the destination.
    Sent,
    /// Not sent because no destination is configured.
    Skipped,
    /// Printed to stdout instead of being sent.
    Printed,
}

/// Hands a payload to its destination.
pub trait Notifier {
    async fn send(&self, payload: &Payload) -> Result<Delivery, Box<dyn Error>>;
}

/// POSTs the payload as JSON to a Slack incoming webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: Option<String>,
    label: &'static str,
}

impl WebhookNotifier {
    /// `label` names the channel in logs; a `None` url makes every send a
    /// warning and a no-op.
    pub fn new(url: Option<String>, label: &'static str) -> Result<Self, Box<dyn Error>> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, url, label })
    }
}

impl Notifier for WebhookNotifier {
    #[instrument(level = "info", skip_all, fields(channel = self.label))]
    async fn send(&self, payload: &Payload) -> Result<Delivery, Box<dyn Error>> {
        let Some(url) = &self.url else {
            warn!("Webhook URL not set; skipping delivery");
            return Ok(Delivery::Skipped);
        };
        self.client
            .post(url)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        info!(events = payload.event_count(), "Message sent");
        Ok(Delivery::Sent)
    }
}

/// Writes the payload to stdout as pretty JSON (`--dry-run`).
#[derive(Debug, Clone, Copy)]
pub struct StdoutNotifier {
    pub label: &'static str,
}

impl Notifier for StdoutNotifier {
    async fn send(&self, payload: &Payload) -> Result<Delivery, Box<dyn Error>> {
        let json = serde_json::to_string_pretty(payload)?;
        println!("# {}\n{}", self.label, json);
        Ok(Delivery::Printed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Block, TextKind, TextObject};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> Payload {
        Payload {
            blocks: vec![
                Block::Header {
                    text: TextObject {
                        kind: TextKind::PlainText,
                        text: "📚".to_string(),
                        emoji: Some(true),
                    },
                },
                Block::Divider,
            ],
        }
    }

    #[tokio::test]
    async fn test_posts_json_payload() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/T/B/X"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({
                "blocks": [
                    {"type": "header", "text": {"type": "plain_text", "text": "📚", "emoji": true}},
                    {"type": "divider"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let url = format!("{}/services/T/B/X", mock_server.uri());
        let notifier = WebhookNotifier::new(Some(url), "tech").unwrap();
        assert_eq!(notifier.send(&payload()).await.unwrap(), Delivery::Sent);
    }

    #[tokio::test]
    async fn test_missing_url_is_noop() {
        let notifier = WebhookNotifier::new(None, "life").unwrap();
        assert_eq!(notifier.send(&payload()).await.unwrap(), Delivery::Skipped);
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("invalid_token"))
            .mount(&mock_server)
            .await;

        let notifier = WebhookNotifier::new(Some(mock_server.uri()), "tech").unwrap();
        assert!(notifier.send(&payload()).await.is_err());
    }
}
