use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub symbol: String,
    pub current: f64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: Option<f64>,
    pub previous_close: Option<f64>,
    /// Percent units.
    pub change_pct: Option<f64>,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

impl PriceQuote {
    /// A quote is usable only with a strictly positive, finite price.
    pub fn is_usable(&self) -> bool {
        self.current.is_finite() && self.current > 0.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub sma20: Option<f64>,
    pub sma50: Option<f64>,
    pub sma200: Option<f64>,
    /// Annualised volatility as a fraction.
    pub volatility: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentSnapshot {
    /// Overall sentiment in [-1, 1].
    pub overall: f64,
    pub news: Option<f64>,
    /// Provider confidence in [0, 1].
    pub confidence: Option<f64>,
    #[serde(default)]
    pub themes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundamentalInputs {
    pub roe_pct: Option<f64>,
    pub profit_margin_pct: Option<f64>,
    pub revenue_growth_pct: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub sector: Option<String>,
}

/// Everything gathered for one symbol before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub quote: PriceQuote,
    pub technicals: Option<TechnicalIndicators>,
    pub sentiment: Option<SentimentSnapshot>,
    pub fundamentals: Option<FundamentalInputs>,
}
