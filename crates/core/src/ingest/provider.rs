use crate::config::Settings;
use crate::ingest::types::{FundamentalInputs, PriceQuote, SentimentSnapshot, TechnicalIndicators};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_MS: u64 = 1000;

/// Market Data Provider contract. Unknown or stale symbols come back as `Ok(None)`;
/// `Err` is reserved for transport failures.
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn get_price(&self, symbol: &str) -> Result<Option<PriceQuote>>;

    async fn get_technical_indicators(&self, symbol: &str) -> Result<Option<TechnicalIndicators>>;

    async fn get_sentiment(&self, symbols: &[String]) -> Result<Option<SentimentSnapshot>>;

    async fn get_fundamentals(&self, symbol: &str) -> Result<Option<FundamentalInputs>>;
}

#[derive(Debug, Clone)]
pub struct HttpJsonDataProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retries: u32,
    backoff: Duration,
}

impl HttpJsonDataProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build data provider http client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
            retries: DEFAULT_RETRIES,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_data_provider_base_url()?.to_string();
        let api_key = settings.data_provider_api_key.clone();

        let timeout_secs = std::env::var("DATA_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("DATA_PROVIDER_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES);

        Ok(Self::new(base_url, api_key, Duration::from_secs(timeout_secs))?.with_retries(retries))
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn fetch_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let res = self
            .http
            .get(self.url(path))
            .headers(self.headers()?)
            .query(query)
            .send()
            .await
            .context("data provider request failed")?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let text = res
            .text()
            .await
            .context("failed to read provider response")?;
        if !status.is_success() {
            anyhow::bail!("data provider HTTP {status}: {text}");
        }

        let parsed = serde_json::from_str::<T>(&text)
            .with_context(|| format!("provider response for {path} has unexpected shape: {text}"))?;
        Ok(Some(parsed))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(path, query).await {
                Ok(parsed) => return Ok(parsed),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = self.backoff * (1 << (attempt - 1));
                    tracing::warn!(attempt, path, ?backoff, error = %err, "data provider fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for HttpJsonDataProvider {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn get_price(&self, symbol: &str) -> Result<Option<PriceQuote>> {
        let quote: Option<PriceQuote> = self.get_json(&format!("/v1/quotes/{symbol}"), &[]).await?;
        // A quote without a usable price is the same as no quote.
        Ok(quote.filter(PriceQuote::is_usable))
    }

    async fn get_technical_indicators(&self, symbol: &str) -> Result<Option<TechnicalIndicators>> {
        self.get_json(&format!("/v1/indicators/{symbol}"), &[]).await
    }

    async fn get_sentiment(&self, symbols: &[String]) -> Result<Option<SentimentSnapshot>> {
        if symbols.is_empty() {
            return Ok(None);
        }
        self.get_json("/v1/sentiment", &[("symbols", symbols.join(","))])
            .await
    }

    async fn get_fundamentals(&self, symbol: &str) -> Result<Option<FundamentalInputs>> {
        self.get_json(&format!("/v1/fundamentals/{symbol}"), &[]).await
    }
}
