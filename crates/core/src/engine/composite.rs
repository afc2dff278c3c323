//! Composite Scorer.
//!
//! Combines the per-domain scores of a [`SignalSet`] into one composite score, a rating and a
//! confidence. Two modes exist:
//!
//! - **Traditional**: fundamental/technical/sentiment/risk with confidence derived from how
//!   much the components agree.
//! - **InsightEnhanced**: the Insight Service's score replaces sentiment and its confidence is
//!   used as-is.
//!
//! When an Insight Service is configured but fails for a symbol, that symbol alone is scored
//! in Traditional mode and the result records why.

use crate::config::ScoringConfig;
use crate::domain::composite::{
    ComponentScores, CompositeResult, InsightSummary, ScoreDetail, Weights,
};
use crate::domain::rating::{ConfidenceLevel, Rating};
use crate::domain::signals::SignalSet;
use crate::llm::{InsightFailure, InsightOutput, InsightRequest, InsightService};
use statrs::statistics::Statistics;
use std::sync::Arc;
use std::time::Duration;

pub struct CompositeScorer {
    config: ScoringConfig,
    insight: Option<Arc<dyn InsightService>>,
}

impl CompositeScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            config,
            insight: None,
        }
    }

    pub fn with_insight(mut self, insight: Arc<dyn InsightService>) -> Self {
        self.insight = Some(insight);
        self
    }

    pub fn has_insight(&self) -> bool {
        self.insight.is_some()
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Scores one symbol, consulting the Insight Service when one is configured.
    pub async fn evaluate(&self, request: InsightRequest) -> CompositeResult {
        let Some(insight) = &self.insight else {
            return self.score_traditional(&request.signals);
        };

        match self.call_insight(insight.as_ref(), &request).await {
            Ok(output) => self.score_enhanced(&request.signals, &output),
            Err(failure) => {
                tracing::warn!(
                    symbol = %request.symbol,
                    error = %failure,
                    "insight unavailable; falling back to traditional scoring"
                );
                let mut result = self.score_traditional(&request.signals);
                result.fallback_reason = Some(failure.to_string());
                result
            }
        }
    }

    async fn call_insight(
        &self,
        insight: &dyn InsightService,
        request: &InsightRequest,
    ) -> Result<InsightOutput, InsightFailure> {
        let secs = self.config.insight_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(secs), insight.analyze(request)).await {
            Ok(result) => result,
            Err(_) => Err(InsightFailure::Timeout { secs }),
        }
    }

    pub fn score_traditional(&self, signals: &SignalSet) -> CompositeResult {
        let components = self.components(signals, None);
        let weights = self.config.traditional_weights;
        let composite = components.weighted(&weights).clamp(0.0, 100.0);
        let confidence = self.dispersion_confidence(&components);
        let risk_adjusted = self.penalized_score(composite, signals);

        self.finish(
            signals,
            composite,
            risk_adjusted,
            confidence,
            components,
            weights,
            ScoreDetail::Traditional,
        )
    }

    pub fn score_enhanced(&self, signals: &SignalSet, insight: &InsightOutput) -> CompositeResult {
        let components = self.components(signals, Some(insight.overall_score));
        let weights = self.config.enhanced_weights;
        let composite = components.weighted(&weights).clamp(0.0, 100.0);
        let confidence = insight.confidence.clamp(0.0, 100.0);
        let risk_adjusted = insight
            .risk_adjusted_score
            .map(|s| s.clamp(0.0, 100.0))
            .unwrap_or_else(|| self.penalized_score(composite, signals));

        let summary = InsightSummary {
            thesis: insight.thesis.clone(),
            strengths: insight.strengths.clone(),
            risks: insight.risks.clone(),
            time_horizon: insight.time_horizon.clone(),
            position_size_hint_pct: insight.position_size_hint_pct,
        };

        self.finish(
            signals,
            composite,
            risk_adjusted,
            confidence,
            components,
            weights,
            ScoreDetail::InsightEnhanced(summary),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        signals: &SignalSet,
        composite: f64,
        risk_adjusted: f64,
        confidence: f64,
        components: ComponentScores,
        weights: Weights,
        detail: ScoreDetail,
    ) -> CompositeResult {
        let base_rating = self.rating_for(composite);
        let rating = self.apply_confidence(base_rating, confidence);

        tracing::debug!(
            symbol = %signals.symbol,
            composite,
            confidence,
            %base_rating,
            %rating,
            "composite scored"
        );

        CompositeResult {
            symbol: signals.symbol.clone(),
            composite_score: composite,
            risk_adjusted_score: risk_adjusted,
            rating,
            base_rating,
            confidence,
            confidence_level: ConfidenceLevel::from_score(confidence),
            component_scores: components,
            weights_used: weights,
            detail,
            fallback_reason: None,
        }
    }

    /// Substitutes neutral values for missing, zero or non-finite inputs and inverts risk.
    fn components(&self, signals: &SignalSet, insight: Option<f64>) -> ComponentScores {
        let neutral = self.config.neutral_score;
        let domain = |v: Option<f64>| match v {
            Some(x) if x.is_finite() && x > 0.0 => x.clamp(0.0, 100.0),
            _ => neutral,
        };
        let risk_raw = self.risk_raw(signals);

        ComponentScores {
            fundamental: domain(signals.fundamental),
            technical: domain(signals.technical),
            sentiment: domain(signals.sentiment),
            insight: insight.map(|x| domain(Some(x))),
            risk: (100.0 - risk_raw * 10.0).clamp(0.0, 100.0),
        }
    }

    fn risk_raw(&self, signals: &SignalSet) -> f64 {
        match signals.risk_raw {
            Some(r) if r.is_finite() => r.clamp(0.0, 10.0),
            _ => self.config.neutral_risk_raw,
        }
    }

    fn dispersion_confidence(&self, c: &ComponentScores) -> f64 {
        let values = [c.fundamental, c.technical, c.sentiment, c.risk];
        let std_dev = values.iter().population_std_dev();
        let std_dev = if std_dev.is_finite() { std_dev } else { 0.0 };
        (100.0 - self.config.confidence_dispersion_factor * std_dev)
            .clamp(self.config.confidence_floor, 100.0)
    }

    fn penalized_score(&self, composite: f64, signals: &SignalSet) -> f64 {
        let excess = (self.risk_raw(signals) - self.config.neutral_risk_raw).max(0.0);
        (composite - excess * self.config.risk_penalty_per_point).clamp(0.0, 100.0)
    }

    pub fn rating_for(&self, score: f64) -> Rating {
        let c = &self.config;
        if score >= c.strong_buy_threshold {
            Rating::StrongBuy
        } else if score >= c.buy_threshold {
            Rating::Buy
        } else if score >= c.hold_threshold {
            Rating::Hold
        } else if score >= c.sell_threshold {
            Rating::Sell
        } else {
            Rating::StrongSell
        }
    }

    pub fn apply_confidence(&self, rating: Rating, confidence: f64) -> Rating {
        if confidence >= self.config.low_confidence_threshold {
            return rating;
        }
        match rating {
            Rating::StrongBuy | Rating::Buy => Rating::Hold,
            Rating::Sell | Rating::StrongSell => Rating::Avoid,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::composite::ScoringMethod;
    use crate::llm::Provider;

    struct StaticInsight(Result<InsightOutput, InsightFailure>);

    #[async_trait::async_trait]
    impl InsightService for StaticInsight {
        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        async fn analyze(&self, _request: &InsightRequest) -> Result<InsightOutput, InsightFailure> {
            self.0.clone()
        }
    }

    struct SlowInsight;

    #[async_trait::async_trait]
    impl InsightService for SlowInsight {
        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        async fn analyze(&self, _request: &InsightRequest) -> Result<InsightOutput, InsightFailure> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(InsightFailure::Unavailable("never".into()))
        }
    }

    fn insight_output(score: f64, confidence: f64) -> InsightOutput {
        InsightOutput {
            overall_score: score,
            confidence,
            thesis: "Category leader".into(),
            strengths: vec!["Brand".into()],
            risks: vec!["Competition".into()],
            time_horizon: Some("1-3 years".into()),
            position_size_hint_pct: Some(6.0),
            risk_adjusted_score: None,
        }
    }

    fn scenario_signals() -> SignalSet {
        SignalSet::new("ACME", 100.0).with_scores(90.0, 80.0, 70.0, 2.0)
    }

    #[test]
    fn traditional_example_scores_strong_buy() {
        let scorer = CompositeScorer::new(ScoringConfig::default());
        let result = scorer.score_traditional(&scenario_signals());

        assert!((result.composite_score - 83.5).abs() < 1e-9);
        assert_eq!(result.rating, Rating::StrongBuy);
        assert_eq!(result.method(), ScoringMethod::Traditional);
        assert!(result.weights_used.is_normalized());
        // Components 90/80/70/80 have a std dev of ~7.07.
        assert!((result.confidence - (100.0 - 2.0 * 50f64.sqrt())).abs() < 1e-9);
    }

    #[test]
    fn low_confidence_downgrades_buy_ratings_to_hold() {
        let scorer = CompositeScorer::new(ScoringConfig::default());
        let result = scorer.score_enhanced(&scenario_signals(), &insight_output(90.0, 35.0));

        assert_eq!(result.base_rating, Rating::StrongBuy);
        assert_eq!(result.rating, Rating::Hold);
        assert_eq!(result.confidence_level, ConfidenceLevel::Low);
    }

    #[test]
    fn low_confidence_turns_sell_ratings_into_avoid() {
        let scorer = CompositeScorer::new(ScoringConfig::default());
        for base in [Rating::Sell, Rating::StrongSell] {
            assert_eq!(scorer.apply_confidence(base, 39.9), Rating::Avoid);
        }
        for base in [Rating::Buy, Rating::StrongBuy] {
            assert_eq!(scorer.apply_confidence(base, 10.0), Rating::Hold);
        }
        assert_eq!(scorer.apply_confidence(Rating::Hold, 10.0), Rating::Hold);
        assert_eq!(scorer.apply_confidence(Rating::Buy, 40.0), Rating::Buy);
    }

    #[test]
    fn rating_thresholds_are_inclusive() {
        let scorer = CompositeScorer::new(ScoringConfig::default());
        assert_eq!(scorer.rating_for(80.0), Rating::StrongBuy);
        assert_eq!(scorer.rating_for(79.99), Rating::Buy);
        assert_eq!(scorer.rating_for(70.0), Rating::Buy);
        assert_eq!(scorer.rating_for(50.0), Rating::Hold);
        assert_eq!(scorer.rating_for(30.0), Rating::Sell);
        assert_eq!(scorer.rating_for(29.99), Rating::StrongSell);
    }

    #[test]
    fn missing_and_zero_inputs_are_neutral() {
        let scorer = CompositeScorer::new(ScoringConfig::default());
        let mut signals = SignalSet::new("EMPTY", 10.0);
        signals.technical = Some(0.0);
        signals.sentiment = Some(f64::NAN);
        let result = scorer.score_traditional(&signals);

        assert_eq!(result.component_scores.fundamental, 50.0);
        assert_eq!(result.component_scores.technical, 50.0);
        assert_eq!(result.component_scores.sentiment, 50.0);
        assert_eq!(result.component_scores.risk, 50.0);
        assert!((result.composite_score - 50.0).abs() < 1e-9);
        assert_eq!(result.confidence, 100.0);
    }

    #[test]
    fn risk_adjusted_score_penalizes_only_above_neutral_risk() {
        let scorer = CompositeScorer::new(ScoringConfig::default());
        let calm = scorer.score_traditional(&SignalSet::new("A", 1.0).with_scores(60.0, 60.0, 60.0, 3.0));
        assert_eq!(calm.risk_adjusted_score, calm.composite_score);

        let wild = scorer.score_traditional(&SignalSet::new("B", 1.0).with_scores(60.0, 60.0, 60.0, 9.0));
        assert!((wild.composite_score - wild.risk_adjusted_score - 8.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn enhanced_mode_passes_insight_through() {
        let scorer = CompositeScorer::new(ScoringConfig::default())
            .with_insight(Arc::new(StaticInsight(Ok(insight_output(70.0, 80.0)))));
        let result = scorer
            .evaluate(InsightRequest::from_signals(scenario_signals()))
            .await;

        assert_eq!(result.method(), ScoringMethod::InsightEnhanced);
        // 90*.4 + 80*.2 + 70*.3 + 80*.1
        assert!((result.composite_score - 81.0).abs() < 1e-9);
        assert_eq!(result.confidence, 80.0);
        let summary = result.insight().unwrap();
        assert_eq!(summary.thesis, "Category leader");
        assert_eq!(summary.position_size_hint_pct, Some(6.0));
        assert!(!result.is_degraded());
    }

    #[tokio::test]
    async fn insight_failure_degrades_to_traditional() {
        let scorer = CompositeScorer::new(ScoringConfig::default()).with_insight(Arc::new(
            StaticInsight(Err(InsightFailure::Malformed("missing thesis".into()))),
        ));
        let result = scorer
            .evaluate(InsightRequest::from_signals(scenario_signals()))
            .await;

        assert_eq!(result.method(), ScoringMethod::Traditional);
        assert!((result.composite_score - 83.5).abs() < 1e-9);
        assert!(result.fallback_reason.unwrap().contains("missing thesis"));
    }

    #[tokio::test(start_paused = true)]
    async fn insight_timeout_degrades_to_traditional() {
        let config = ScoringConfig {
            insight_timeout_secs: 1,
            ..ScoringConfig::default()
        };
        let scorer = CompositeScorer::new(config).with_insight(Arc::new(SlowInsight));
        let result = scorer
            .evaluate(InsightRequest::from_signals(scenario_signals()))
            .await;

        assert_eq!(result.method(), ScoringMethod::Traditional);
        assert!(result.fallback_reason.unwrap().contains("timed out"));
    }
}
