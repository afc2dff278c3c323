use crate::llm::InsightOutput;
use anyhow::ensure;
use serde::{Deserialize, Serialize};

const MAX_LIST_ITEMS: usize = 5;

/// Raw insight payload as emitted by the language model. Validated before use so a
/// malformed answer is a failure rather than a partial success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmInsightPayload {
    pub symbol: String,
    pub overall_score: f64,
    pub confidence: f64,
    pub thesis: String,
    pub strengths: Vec<String>,
    pub risks: Vec<String>,
    pub time_horizon: Option<String>,
    pub position_size_hint: Option<f64>,
    pub risk_adjusted_score: Option<f64>,
}

impl LlmInsightPayload {
    pub fn validate_and_into_output(self, expected_symbol: &str) -> anyhow::Result<InsightOutput> {
        ensure!(
            self.symbol.trim().eq_ignore_ascii_case(expected_symbol.trim()),
            "LLM output symbol mismatch: expected {expected_symbol}, got {}",
            self.symbol
        );

        ensure!(
            self.overall_score.is_finite() && (0.0..=100.0).contains(&self.overall_score),
            "overall_score must be between 0 and 100 (got {})",
            self.overall_score
        );
        ensure!(
            self.confidence.is_finite() && (0.0..=100.0).contains(&self.confidence),
            "confidence must be between 0 and 100 (got {})",
            self.confidence
        );

        let thesis = self.thesis.trim().to_string();
        ensure!(!thesis.is_empty(), "thesis must be non-empty");

        if let Some(hint) = self.position_size_hint {
            ensure!(
                hint.is_finite() && (0.0..=100.0).contains(&hint),
                "position_size_hint must be between 0 and 100 (got {hint})"
            );
        }

        if let Some(score) = self.risk_adjusted_score {
            ensure!(
                score.is_finite() && (0.0..=100.0).contains(&score),
                "risk_adjusted_score must be between 0 and 100 (got {score})"
            );
        }

        let time_horizon = self
            .time_horizon
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(InsightOutput {
            overall_score: self.overall_score,
            confidence: self.confidence,
            thesis,
            strengths: clean_lines(self.strengths),
            risks: clean_lines(self.risks),
            time_horizon,
            position_size_hint_pct: self.position_size_hint,
            risk_adjusted_score: self.risk_adjusted_score,
        })
    }
}

fn clean_lines(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .take(MAX_LIST_ITEMS)
        .collect()
}
