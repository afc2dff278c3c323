use serde::{Deserialize, Serialize};

/// Direction of the technical trend as read from moving averages and MACD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechnicalTrend {
    Bullish,
    #[default]
    Neutral,
    Bearish,
}

/// Raw metrics kept alongside the domain scores so later stages can explain a score.
/// Percentages are expressed in percent units (15.0 == 15%).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyMetrics {
    pub roe_pct: Option<f64>,
    pub profit_margin_pct: Option<f64>,
    pub revenue_growth_pct: Option<f64>,
    pub momentum_20d_pct: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub sentiment_overall: Option<f64>,
    pub volatility: Option<f64>,
}

/// Per-symbol bundle of bounded domain scores, produced once per analysis cycle.
///
/// `fundamental`, `technical` and `sentiment` are in [0, 100]; `risk_raw` is in [0, 10]
/// with higher meaning riskier. `None` marks a domain with no usable input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSet {
    pub symbol: String,
    pub current_price: f64,
    pub fundamental: Option<f64>,
    pub technical: Option<f64>,
    pub sentiment: Option<f64>,
    pub risk_raw: Option<f64>,
    #[serde(default)]
    pub trend: TechnicalTrend,
    #[serde(default)]
    pub metrics: KeyMetrics,
}

impl SignalSet {
    pub fn new(symbol: impl Into<String>, current_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            current_price,
            fundamental: None,
            technical: None,
            sentiment: None,
            risk_raw: None,
            trend: TechnicalTrend::Neutral,
            metrics: KeyMetrics::default(),
        }
    }

    pub fn with_scores(
        mut self,
        fundamental: f64,
        technical: f64,
        sentiment: f64,
        risk_raw: f64,
    ) -> Self {
        self.fundamental = Some(fundamental);
        self.technical = Some(technical);
        self.sentiment = Some(sentiment);
        self.risk_raw = Some(risk_raw);
        self
    }
}
