use crate::domain::composite::CompositeResult;
use crate::domain::rating::{ConfidenceLevel, Rating};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Allocation range in percent of portfolio value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationRange {
    pub min_pct: f64,
    pub max_pct: f64,
}

impl AllocationRange {
    pub const NONE: AllocationRange = AllocationRange {
        min_pct: 0.0,
        max_pct: 0.0,
    };

    pub fn clamp(&self, pct: f64) -> f64 {
        pct.clamp(self.min_pct, self.max_pct)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub symbol: String,
    pub rating: Rating,
    pub confidence_label: ConfidenceLevel,
    pub allocation_range: AllocationRange,
    pub suggested_allocation_pct: f64,
    pub time_horizon: String,
    pub strengths: Vec<String>,
    pub risks: Vec<String>,
    pub price_target: f64,
    pub current_price: f64,
}

/// The analysis artifact produced for one symbol in one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub as_of_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub composite: CompositeResult,
    pub recommendation: Recommendation,
}
