use crate::config::Settings;
use crate::venue::{AccountSnapshot, ExecutionVenue, VenueOrder, VenuePosition};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Read-only JSON venue: `GET /v1/account`, `/v1/positions`, `/v1/orders?status=open`.
#[derive(Debug, Clone)]
pub struct HttpExecutionVenue {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpExecutionVenue {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build venue http client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_venue_base_url()?.to_string();
        let timeout_secs = std::env::var("VENUE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Self::new(
            base_url,
            settings.venue_api_key.clone(),
            Duration::from_secs(timeout_secs),
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut req = self.http.get(url).query(query);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let res = req.send().await.context("venue request failed")?;
        let status = res.status();
        let text = res.text().await.context("failed to read venue response")?;
        if !status.is_success() {
            anyhow::bail!("venue HTTP {status} for {path}: {text}");
        }
        serde_json::from_str(&text)
            .with_context(|| format!("venue response for {path} has unexpected shape: {text}"))
    }
}

#[async_trait::async_trait]
impl ExecutionVenue for HttpExecutionVenue {
    fn venue_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn get_account(&self) -> Result<AccountSnapshot> {
        self.get_json("/v1/account", &[]).await
    }

    async fn get_positions(&self) -> Result<Vec<VenuePosition>> {
        self.get_json("/v1/positions", &[]).await
    }

    async fn get_orders(&self) -> Result<Vec<VenueOrder>> {
        self.get_json("/v1/orders", &[("status", "open")]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trade::TradeAction;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn reads_account_positions_and_open_orders() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/account"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "account_id": "acct-9",
                "cash": 2500.5,
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/positions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "NVDA", "quantity": 4.0, "average_cost": 90.0, "market_price": 120.0}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/orders"))
            .and(query_param("status", "open"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "1", "symbol": "AMD", "side": "buy", "quantity": 2.0, "status": "open"}
            ])))
            .mount(&server)
            .await;

        let venue =
            HttpExecutionVenue::new(server.uri(), Some("secret".into()), Duration::from_secs(5))
                .unwrap();
        assert_eq!(venue.get_account().await.unwrap().cash, 2500.5);
        assert_eq!(venue.get_positions().await.unwrap()[0].symbol, "NVDA");
        assert_eq!(venue.get_orders().await.unwrap()[0].side, TradeAction::Buy);
    }

    #[tokio::test]
    async fn http_errors_surface_as_err() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/account"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let venue = HttpExecutionVenue::new(server.uri(), None, Duration::from_secs(5)).unwrap();
        let err = venue.get_account().await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
