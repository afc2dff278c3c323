use crate::domain::portfolio::Position;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SellAction {
    TrimPosition,
    Sell,
    StrongSell,
}

impl fmt::Display for SellAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SellAction::TrimPosition => f.write_str("TRIM_POSITION"),
            SellAction::Sell => f.write_str("SELL"),
            SellAction::StrongSell => f.write_str("STRONG_SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellSignalKind {
    NegativeRating,
    WeakHold,
    StopLoss,
    ProfitTaking,
    BearishTrend,
    Concentration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellSignal {
    pub kind: SellSignalKind,
    pub points: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellRecommendation {
    pub symbol: String,
    pub position: Position,
    pub sell_score: f64,
    pub sell_signals: Vec<SellSignal>,
    pub suggested_action: SellAction,
    /// Fraction of the position to sell, in [0, 1].
    pub sell_fraction: f64,
    pub suggested_quantity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

/// A sized trade. Fractions (`position_size_pct`, `max_loss_pct`) are relative to portfolio
/// value in [0, 1]; `expected_return_pct` is in percent units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecommendation {
    pub symbol: String,
    pub action: TradeAction,
    pub quantity: f64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub reference_price: f64,
    pub confidence: f64,
    pub risk_score: f64,
    pub expected_return_pct: f64,
    pub position_size_pct: f64,
    pub max_loss_pct: f64,
}

impl TradeRecommendation {
    pub fn estimated_cost(&self) -> f64 {
        self.quantity * self.limit_price.unwrap_or(self.reference_price)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub validation_score: f64,
    pub risk_check_passed: bool,
    pub position_limit_check: bool,
    pub cash_check_passed: bool,
    pub market_hours_check: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggested_adjustments: Vec<String>,
}
