//! Recommendation Generator: turns a [`CompositeResult`] into an allocation, horizon and
//! the human-readable strengths/risks that accompany it.

use crate::config::RecommendationConfig;
use crate::domain::composite::{CompositeResult, ScoreDetail};
use crate::domain::rating::Rating;
use crate::domain::recommendation::{AllocationRange, Recommendation};
use crate::domain::signals::{SignalSet, TechnicalTrend};

pub struct RecommendationGenerator<'a> {
    config: &'a RecommendationConfig,
}

impl<'a> RecommendationGenerator<'a> {
    pub fn new(config: &'a RecommendationConfig) -> Self {
        Self { config }
    }

    pub fn generate(&self, result: &CompositeResult, signals: &SignalSet) -> Recommendation {
        let range = self.allocation_range(result.rating, result.composite_score);

        let (suggested, time_horizon, mut strengths, mut risks) = match &result.detail {
            ScoreDetail::InsightEnhanced(insight) => {
                let suggested = match insight.position_size_hint_pct {
                    Some(hint) if hint.is_finite() => range.clamp(hint),
                    _ => self.scaled_allocation(range, result.confidence),
                };
                let horizon = insight
                    .time_horizon
                    .clone()
                    .filter(|h| !h.trim().is_empty())
                    .unwrap_or_else(|| self.time_horizon(signals));
                (
                    suggested,
                    horizon,
                    insight.strengths.clone(),
                    insight.risks.clone(),
                )
            }
            ScoreDetail::Traditional => (
                self.scaled_allocation(range, result.confidence),
                self.time_horizon(signals),
                Vec::new(),
                Vec::new(),
            ),
        };

        extend_unique(&mut strengths, self.signal_strengths(signals));
        extend_unique(&mut risks, self.signal_risks(signals));
        strengths.truncate(self.config.max_list_items);
        risks.truncate(self.config.max_list_items);

        Recommendation {
            symbol: result.symbol.clone(),
            rating: result.rating,
            confidence_label: result.confidence_level,
            allocation_range: range,
            suggested_allocation_pct: suggested,
            time_horizon,
            strengths,
            risks,
            price_target: self.price_target(signals.current_price, result.composite_score),
            current_price: signals.current_price,
        }
    }

    /// Band for `score`; sell-side ratings never get an allocation.
    pub fn allocation_range(&self, rating: Rating, score: f64) -> AllocationRange {
        if matches!(rating, Rating::Sell | Rating::StrongSell | Rating::Avoid) {
            return AllocationRange::NONE;
        }
        self.config
            .allocation_bands
            .iter()
            .find(|band| score >= band.min_score)
            .map(|band| AllocationRange {
                min_pct: band.min_pct,
                max_pct: band.max_pct,
            })
            .unwrap_or(AllocationRange::NONE)
    }

    fn scaled_allocation(&self, range: AllocationRange, confidence: f64) -> f64 {
        let c = confidence.clamp(0.0, 100.0) / 100.0;
        range.min_pct + (range.max_pct - range.min_pct) * c
    }

    pub fn time_horizon(&self, signals: &SignalSet) -> String {
        let growth = signals.metrics.revenue_growth_pct.unwrap_or(0.0);
        if growth > self.config.fast_growth_pct {
            "6-18 months".to_string()
        } else if growth > self.config.steady_growth_pct {
            "1-3 years".to_string()
        } else {
            "3-5 years".to_string()
        }
    }

    pub fn price_target(&self, current_price: f64, composite: f64) -> f64 {
        current_price * (1.0 + (composite - 50.0) / self.config.price_target_divisor)
    }

    fn signal_strengths(&self, signals: &SignalSet) -> Vec<String> {
        let c = self.config;
        let m = &signals.metrics;
        let mut out = Vec::new();

        if let Some(roe) = m.roe_pct.filter(|v| *v > c.strong_roe_pct) {
            out.push(format!("Strong return on equity ({roe:.1}%)"));
        }
        if let Some(margin) = m.profit_margin_pct.filter(|v| *v > c.strong_margin_pct) {
            out.push(format!("High profit margin ({margin:.1}%)"));
        }
        if let Some(growth) = m.revenue_growth_pct.filter(|v| *v > c.strong_growth_pct) {
            out.push(format!("Revenue growing {growth:.1}% year over year"));
        }
        if let Some(momentum) = m.momentum_20d_pct.filter(|v| *v > c.strong_momentum_pct) {
            out.push(format!("Positive price momentum (+{momentum:.1}% vs 20-day average)"));
        }
        if signals.sentiment.is_some_and(|s| s > c.strong_sentiment_score) {
            out.push("Favorable news sentiment".to_string());
        }
        if signals.technical.is_some_and(|t| t > c.strong_technical_score) {
            out.push("Constructive technical setup".to_string());
        }
        out
    }

    fn signal_risks(&self, signals: &SignalSet) -> Vec<String> {
        let c = self.config;
        let m = &signals.metrics;
        let mut out = Vec::new();

        if let Some(raw) = signals.risk_raw.filter(|r| *r >= c.high_risk_raw) {
            out.push(format!("Elevated volatility (risk {raw:.1}/10)"));
        }
        if let Some(de) = m.debt_to_equity.filter(|v| *v > c.high_debt_to_equity) {
            out.push(format!("High leverage (debt/equity {de:.2})"));
        }
        if let Some(pe) = m.pe_ratio.filter(|v| *v > c.high_pe_ratio) {
            out.push(format!("Rich valuation (P/E {pe:.1})"));
        }
        if let Some(growth) = m.revenue_growth_pct.filter(|v| *v < 0.0) {
            out.push(format!("Revenue shrinking ({growth:.1}%)"));
        }
        if let Some(margin) = m.profit_margin_pct.filter(|v| *v < 0.0) {
            out.push(format!("Unprofitable (margin {margin:.1}%)"));
        }
        if signals.sentiment.is_some_and(|s| s < c.weak_sentiment_score) {
            out.push("Negative news sentiment".to_string());
        }
        if signals.trend == TechnicalTrend::Bearish
            || signals.technical.is_some_and(|t| t < c.weak_technical_score)
        {
            out.push("Weak technical trend".to_string());
        }
        out
    }
}

fn extend_unique(list: &mut Vec<String>, extra: Vec<String>) {
    for item in extra {
        if !list.iter().any(|existing| existing.eq_ignore_ascii_case(&item)) {
            list.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::engine::composite::CompositeScorer;
    use crate::llm::InsightOutput;

    fn generator_config() -> RecommendationConfig {
        RecommendationConfig::default()
    }

    #[test]
    fn traditional_allocation_scales_with_confidence() {
        let config = generator_config();
        let generator = RecommendationGenerator::new(&config);
        let mut signals = SignalSet::new("ACME", 100.0).with_scores(90.0, 80.0, 70.0, 2.0);
        signals.metrics.revenue_growth_pct = Some(35.0);
        signals.metrics.roe_pct = Some(25.0);

        let scorer = CompositeScorer::new(ScoringConfig::default());
        let mut result = scorer.score_traditional(&signals);
        result.confidence = 50.0;

        let rec = generator.generate(&result, &signals);
        assert_eq!(rec.allocation_range, AllocationRange { min_pct: 8.0, max_pct: 10.0 });
        assert!((rec.suggested_allocation_pct - 9.0).abs() < 1e-9);
        assert_eq!(rec.time_horizon, "6-18 months");
        assert!(rec.strengths.iter().any(|s| s.contains("return on equity")));
        // 100 * (1 + 33.5 / 250)
        assert!((rec.price_target - 113.4).abs() < 1e-9);
    }

    #[test]
    fn insight_hint_is_clamped_to_band() {
        let config = generator_config();
        let generator = RecommendationGenerator::new(&config);
        let signals = SignalSet::new("ACME", 50.0).with_scores(75.0, 70.0, 60.0, 4.0);
        let scorer = CompositeScorer::new(ScoringConfig::default());
        let insight = InsightOutput {
            overall_score: 70.0,
            confidence: 75.0,
            thesis: "Compounder".into(),
            strengths: vec!["Moat".into()],
            risks: vec![],
            time_horizon: Some("2-4 years".into()),
            position_size_hint_pct: Some(15.0),
            risk_adjusted_score: None,
        };
        let result = scorer.score_enhanced(&signals, &insight);
        assert_eq!(result.rating, Rating::Buy);

        let rec = generator.generate(&result, &signals);
        assert_eq!(rec.suggested_allocation_pct, rec.allocation_range.max_pct);
        assert_eq!(rec.time_horizon, "2-4 years");
        assert_eq!(rec.strengths.first().map(String::as_str), Some("Moat"));
    }

    #[test]
    fn sell_side_ratings_get_no_allocation() {
        let config = generator_config();
        let generator = RecommendationGenerator::new(&config);
        for rating in [Rating::Sell, Rating::StrongSell, Rating::Avoid] {
            assert_eq!(generator.allocation_range(rating, 45.0), AllocationRange::NONE);
        }
        assert_eq!(
            generator.allocation_range(Rating::Hold, 39.0),
            AllocationRange::NONE
        );
        assert_eq!(
            generator.allocation_range(Rating::Hold, 55.0),
            AllocationRange { min_pct: 1.0, max_pct: 3.0 }
        );
    }

    #[test]
    fn lists_are_capped() {
        let config = RecommendationConfig {
            max_list_items: 2,
            ..RecommendationConfig::default()
        };
        let generator = RecommendationGenerator::new(&config);
        let mut signals = SignalSet::new("RISKY", 10.0).with_scores(20.0, 20.0, 20.0, 9.0);
        signals.trend = TechnicalTrend::Bearish;
        signals.metrics.debt_to_equity = Some(4.0);
        signals.metrics.pe_ratio = Some(90.0);
        signals.metrics.revenue_growth_pct = Some(-5.0);

        let scorer = CompositeScorer::new(ScoringConfig::default());
        let rec = generator.generate(&scorer.score_traditional(&signals), &signals);
        assert_eq!(rec.risks.len(), 2);
        assert_eq!(rec.time_horizon, "3-5 years");
        assert!(rec.price_target < 10.0);
    }
}
