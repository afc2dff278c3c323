use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete recommendation tier. `Avoid` only appears after a low-confidence downgrade
/// of a Sell/StrongSell rating and means "do not re-buy".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    StrongSell,
    Sell,
    Avoid,
    Hold,
    Buy,
    StrongBuy,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::StrongSell => "strong_sell",
            Rating::Sell => "sell",
            Rating::Avoid => "avoid",
            Rating::Hold => "hold",
            Rating::Buy => "buy",
            Rating::StrongBuy => "strong_buy",
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Rating::Buy | Rating::StrongBuy)
    }

    pub fn is_sell(&self) -> bool {
        matches!(self, Rating::Sell | Rating::StrongSell)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "strong_sell" | "strongsell" => Some(Rating::StrongSell),
            "sell" => Some(Rating::Sell),
            "avoid" => Some(Rating::Avoid),
            "hold" => Some(Rating::Hold),
            "buy" => Some(Rating::Buy),
            "strong_buy" | "strongbuy" => Some(Rating::StrongBuy),
            _ => None,
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Rating::StrongSell => "Strong Sell",
            Rating::Sell => "Sell",
            Rating::Avoid => "Avoid",
            Rating::Hold => "Hold",
            Rating::Buy => "Buy",
            Rating::StrongBuy => "Strong Buy",
        };
        f.write_str(label)
    }
}

/// Bucketed confidence. Ordering is Low < Medium < High.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub const HIGH_FLOOR: f64 = 70.0;
    pub const MEDIUM_FLOOR: f64 = 40.0;

    pub fn from_score(confidence: f64) -> Self {
        if confidence >= Self::HIGH_FLOOR {
            ConfidenceLevel::High
        } else if confidence >= Self::MEDIUM_FLOOR {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfidenceLevel::Low => f.write_str("Low"),
            ConfidenceLevel::Medium => f.write_str("Medium"),
            ConfidenceLevel::High => f.write_str("High"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_buckets_are_ordered() {
        assert!(ConfidenceLevel::Low < ConfidenceLevel::Medium);
        assert!(ConfidenceLevel::Medium < ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(39.9), ConfidenceLevel::Low);
        assert_eq!(ConfidenceLevel::from_score(40.0), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(85.0), ConfidenceLevel::High);
    }

    #[test]
    fn parses_loose_rating_labels() {
        assert_eq!(Rating::parse("Strong Buy"), Some(Rating::StrongBuy));
        assert_eq!(Rating::parse("strong-sell"), Some(Rating::StrongSell));
        assert_eq!(Rating::parse("HOLD"), Some(Rating::Hold));
        assert_eq!(Rating::parse("maybe"), None);
    }
}
