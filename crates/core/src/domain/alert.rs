use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    StrongBuy,
    Buy,
    Sell,
    StrongSell,
    RiskWarning,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::StrongBuy => "strong_buy",
            AlertType::Buy => "buy",
            AlertType::Sell => "sell",
            AlertType::StrongSell => "strong_sell",
            AlertType::RiskWarning => "risk_warning",
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, AlertType::StrongBuy | AlertType::Buy)
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the Alert Gate declined to trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AlertRejection {
    Excluded,
    MissingRecommendation,
    NotActionable,
    ConfidenceTooLow,
    DailyLimitReached { count: u32, max: u32 },
    SymbolCooldown { minutes_remaining: i64 },
    DeliveryPending,
    OutsideMarketHours,
    AllocationExhausted,
}

impl fmt::Display for AlertRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertRejection::Excluded => f.write_str("symbol is excluded"),
            AlertRejection::MissingRecommendation => f.write_str("no recommendation"),
            AlertRejection::NotActionable => f.write_str("rating is not actionable"),
            AlertRejection::ConfidenceTooLow => f.write_str("confidence below minimum"),
            AlertRejection::DailyLimitReached { count, max } => {
                write!(f, "daily alert limit reached ({count}/{max})")
            }
            AlertRejection::SymbolCooldown { minutes_remaining } => {
                write!(f, "symbol cooldown ({minutes_remaining}m remaining)")
            }
            AlertRejection::DeliveryPending => f.write_str("an alert for this symbol is in flight"),
            AlertRejection::OutsideMarketHours => f.write_str("outside market hours"),
            AlertRejection::AllocationExhausted => f.write_str("already at max allocation"),
        }
    }
}

/// The gate's verdict: `(should_trigger, alert_type)` plus the rejection reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDecision {
    pub should_trigger: bool,
    pub alert_type: Option<AlertType>,
    pub rejection: Option<AlertRejection>,
    /// Allocation to quote in a buy alert after the portfolio-aware check.
    pub allocation_pct: Option<f64>,
}

impl AlertDecision {
    pub fn accept(alert_type: AlertType, allocation_pct: Option<f64>) -> Self {
        Self {
            should_trigger: true,
            alert_type: Some(alert_type),
            rejection: None,
            allocation_pct,
        }
    }

    pub fn reject(alert_type: Option<AlertType>, rejection: AlertRejection) -> Self {
        Self {
            should_trigger: false,
            alert_type,
            rejection: Some(rejection),
            allocation_pct: None,
        }
    }
}
