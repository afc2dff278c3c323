use crate::config::Settings;
use crate::notify::{AlertMessage, NotificationChannel};
use anyhow::{Context, Result};
use std::time::Duration;

const DEFAULT_RETRIES: u32 = 2;
const DEFAULT_BACKOFF_MS: u64 = 500;

/// POSTs each alert as JSON to a webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    http: reqwest::Client,
    url: String,
    retries: u32,
    backoff: Duration,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build webhook http client")?;
        Ok(Self {
            http,
            url: url.into(),
            retries: DEFAULT_RETRIES,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let url = settings.require_notify_webhook_url()?.to_string();
        let retries = std::env::var("NOTIFY_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES);
        Ok(Self::new(url, Duration::from_secs(10))?.with_retries(retries))
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn post_once(&self, message: &AlertMessage) -> Result<()> {
        let res = self
            .http
            .post(&self.url)
            .json(message)
            .send()
            .await
            .context("webhook request failed")?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            anyhow::bail!("webhook HTTP {status}: {text}");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl NotificationChannel for WebhookChannel {
    fn channel_name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, message: &AlertMessage) -> bool {
        for attempt in 1..=self.retries {
            match self.post_once(message).await {
                Ok(()) => return true,
                Err(err) if attempt < self.retries => {
                    tracing::warn!(attempt, symbol = %message.symbol, error = %err, "webhook send failed; retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(err) => {
                    tracing::error!(symbol = %message.symbol, error = %err, "webhook send failed");
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alert::AlertType;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> AlertMessage {
        AlertMessage {
            symbol: "MSFT".into(),
            alert_type: AlertType::StrongBuy,
            title: "Strong buy: MSFT".into(),
            body: "Strong Buy (High confidence)".into(),
        }
    }

    #[tokio::test]
    async fn delivered_message_returns_true() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({"symbol": "MSFT", "alert_type": "strong_buy"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let channel = WebhookChannel::new(format!("{}/hook", server.uri()), Duration::from_secs(5))
            .unwrap();
        assert!(channel.send(&message()).await);
    }

    #[tokio::test]
    async fn failed_delivery_retries_then_returns_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let channel = WebhookChannel::new(server.uri(), Duration::from_secs(5))
            .unwrap()
            .with_retries(3)
            .with_backoff(Duration::from_millis(1));
        assert!(!channel.send(&message()).await);
    }
}
