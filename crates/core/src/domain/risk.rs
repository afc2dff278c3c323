use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Extreme,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => f.write_str("Low"),
            RiskLevel::Medium => f.write_str("Medium"),
            RiskLevel::High => f.write_str("High"),
            RiskLevel::Extreme => f.write_str("Extreme"),
        }
    }
}

/// Per-instrument market statistics consumed by the portfolio risk assessment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketStats {
    /// Recent price change in percent units.
    pub change_pct: Option<f64>,
    /// Annualised volatility as a fraction (0.30 == 30%).
    pub volatility: Option<f64>,
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall_risk: RiskLevel,
    pub risk_score: f64,
    pub concentration_risk: f64,
    pub market_risk: f64,
    pub volatility_risk: f64,
    pub liquidity_risk: f64,
    /// Currency amount the portfolio may lose in a day before trading halts.
    pub daily_loss_limit: f64,
    /// Largest currency amount allowed in a single position.
    pub position_limit: f64,
    pub warnings: Vec<String>,
    pub mitigations: Vec<String>,
    /// True when the assessment was substituted because inputs were missing.
    pub is_default: bool,
}
