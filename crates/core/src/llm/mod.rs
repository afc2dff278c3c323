//! Insight Service contract: an opaque, language-model-backed scorer that also writes a
//! short qualitative thesis.

pub mod anthropic;
pub mod error;
pub mod json;

use crate::domain::signals::SignalSet;
use crate::ingest::types::{FundamentalInputs, PriceQuote, SentimentSnapshot, TechnicalIndicators};
use serde::{Deserialize, Serialize};

pub use error::InsightFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsightRequest {
    pub symbol: String,
    pub signals: SignalSet,
    pub quote: Option<PriceQuote>,
    pub financials: Option<FundamentalInputs>,
    pub news: Option<SentimentSnapshot>,
    pub technicals: Option<TechnicalIndicators>,
}

impl InsightRequest {
    pub fn from_signals(signals: SignalSet) -> Self {
        Self {
            symbol: signals.symbol.clone(),
            signals,
            quote: None,
            financials: None,
            news: None,
            technicals: None,
        }
    }

    pub fn context_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Validated Insight Service answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightOutput {
    pub overall_score: f64,
    pub confidence: f64,
    pub thesis: String,
    pub strengths: Vec<String>,
    pub risks: Vec<String>,
    pub time_horizon: Option<String>,
    pub position_size_hint_pct: Option<f64>,
    pub risk_adjusted_score: Option<f64>,
}

#[async_trait::async_trait]
pub trait InsightService: Send + Sync {
    fn provider(&self) -> Provider;

    async fn analyze(&self, request: &InsightRequest) -> Result<InsightOutput, InsightFailure>;
}
