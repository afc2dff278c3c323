use crate::domain::rating::{ConfidenceLevel, Rating};
use serde::{Deserialize, Serialize};

/// Tolerance for the "weights sum to one" invariant.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Per-component weights. A component unused by a mode carries weight 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub fundamental: f64,
    pub technical: f64,
    #[serde(default)]
    pub sentiment: f64,
    #[serde(default)]
    pub insight: f64,
    pub risk: f64,
}

impl Weights {
    pub const TRADITIONAL: Weights = Weights {
        fundamental: 0.50,
        technical: 0.25,
        sentiment: 0.15,
        insight: 0.0,
        risk: 0.10,
    };

    pub const INSIGHT_ENHANCED: Weights = Weights {
        fundamental: 0.40,
        technical: 0.20,
        sentiment: 0.0,
        insight: 0.30,
        risk: 0.10,
    };

    pub fn sum(&self) -> f64 {
        self.fundamental + self.technical + self.sentiment + self.insight + self.risk
    }

    pub fn is_normalized(&self) -> bool {
        (self.sum() - 1.0).abs() <= WEIGHT_SUM_TOLERANCE
    }

    pub fn has_negative(&self) -> bool {
        [
            self.fundamental,
            self.technical,
            self.sentiment,
            self.insight,
            self.risk,
        ]
        .iter()
        .any(|w| *w < 0.0 || !w.is_finite())
    }
}

/// Component scores after neutral substitution, all in [0, 100].
/// `risk` is already inverted (100 == lowest risk).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub fundamental: f64,
    pub technical: f64,
    pub sentiment: f64,
    pub insight: Option<f64>,
    pub risk: f64,
}

impl ComponentScores {
    pub fn weighted(&self, weights: &Weights) -> f64 {
        self.fundamental * weights.fundamental
            + self.technical * weights.technical
            + self.sentiment * weights.sentiment
            + self.insight.unwrap_or(0.0) * weights.insight
            + self.risk * weights.risk
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    Traditional,
    InsightEnhanced,
}

impl ScoringMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMethod::Traditional => "traditional",
            ScoringMethod::InsightEnhanced => "insight_enhanced",
        }
    }
}

/// Qualitative output of the Insight Service, passed through unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightSummary {
    pub thesis: String,
    pub strengths: Vec<String>,
    pub risks: Vec<String>,
    pub time_horizon: Option<String>,
    /// Suggested allocation in percent of portfolio.
    pub position_size_hint_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ScoreDetail {
    Traditional,
    InsightEnhanced(InsightSummary),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeResult {
    pub symbol: String,
    pub composite_score: f64,
    pub risk_adjusted_score: f64,
    /// Rating after the low-confidence downgrade.
    pub rating: Rating,
    /// Rating from the score thresholds alone.
    pub base_rating: Rating,
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    pub component_scores: ComponentScores,
    pub weights_used: Weights,
    pub detail: ScoreDetail,
    /// Set when the Insight Service was configured but could not be used for this symbol.
    pub fallback_reason: Option<String>,
}

impl CompositeResult {
    pub fn method(&self) -> ScoringMethod {
        match self.detail {
            ScoreDetail::Traditional => ScoringMethod::Traditional,
            ScoreDetail::InsightEnhanced(_) => ScoringMethod::InsightEnhanced,
        }
    }

    pub fn insight(&self) -> Option<&InsightSummary> {
        match &self.detail {
            ScoreDetail::InsightEnhanced(summary) => Some(summary),
            ScoreDetail::Traditional => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        assert!(Weights::TRADITIONAL.is_normalized());
        assert!(Weights::INSIGHT_ENHANCED.is_normalized());
        assert!(!Weights::TRADITIONAL.has_negative());
    }

    #[test]
    fn score_detail_serializes_with_method_tag() {
        let v = serde_json::to_value(ScoreDetail::Traditional).unwrap();
        assert_eq!(v["method"], "traditional");
    }
}
