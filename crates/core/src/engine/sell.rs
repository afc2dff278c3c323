//! Sell-Signal Detector.
//!
//! Accumulates points from independent exit signals on a held position and tiers the total
//! into TRIM_POSITION / SELL / STRONG_SELL.

use crate::config::SellConfig;
use crate::domain::composite::CompositeResult;
use crate::domain::portfolio::Position;
use crate::domain::rating::Rating;
use crate::domain::signals::TechnicalTrend;
use crate::domain::trade::{SellAction, SellRecommendation, SellSignal, SellSignalKind};

pub struct SellSignalDetector<'a> {
    config: &'a SellConfig,
}

impl<'a> SellSignalDetector<'a> {
    pub fn new(config: &'a SellConfig) -> Self {
        Self { config }
    }

    /// Returns `None` when the accumulated score stays below the emit threshold.
    pub fn evaluate(
        &self,
        position: &Position,
        result: &CompositeResult,
        trend: TechnicalTrend,
        portfolio_value: f64,
    ) -> Option<SellRecommendation> {
        if position.is_closed() {
            return None;
        }

        let signals = self.collect_signals(position, result, trend, portfolio_value);
        let sell_score: f64 = signals.iter().map(|s| s.points).sum();
        if sell_score < self.config.min_sell_score {
            tracing::debug!(symbol = %position.symbol, sell_score, "no sell signal");
            return None;
        }

        let action = self.action_for(sell_score);
        let sell_fraction = self.sell_fraction(action, result.rating, &signals);
        let suggested_quantity = (position.quantity * sell_fraction)
            .floor()
            .max(1.0)
            .min(position.quantity);

        tracing::info!(
            symbol = %position.symbol,
            sell_score,
            %action,
            sell_fraction,
            suggested_quantity,
            "sell signal"
        );

        Some(SellRecommendation {
            symbol: position.symbol.clone(),
            position: position.clone(),
            sell_score,
            sell_signals: signals,
            suggested_action: action,
            sell_fraction,
            suggested_quantity,
        })
    }

    fn collect_signals(
        &self,
        position: &Position,
        result: &CompositeResult,
        trend: TechnicalTrend,
        portfolio_value: f64,
    ) -> Vec<SellSignal> {
        let c = self.config;
        let score = result.composite_score;
        let mut signals = Vec::new();

        match result.rating {
            Rating::StrongSell => signals.push(SellSignal {
                kind: SellSignalKind::NegativeRating,
                points: c.negative_rating_points,
                reason: format!("Strong Sell rating (score {score:.1})"),
            }),
            Rating::Sell | Rating::Avoid => signals.push(SellSignal {
                kind: SellSignalKind::NegativeRating,
                points: self.scaled_rating_points(score),
                reason: format!("{} rating (score {score:.1})", result.rating),
            }),
            Rating::Hold if score < c.weak_hold_score => signals.push(SellSignal {
                kind: SellSignalKind::WeakHold,
                points: c.weak_hold_points,
                reason: format!("Weak Hold (score {score:.1})"),
            }),
            _ => {}
        }

        let pnl_pct = position.unrealized_pnl_pct;
        if pnl_pct < c.stop_loss_pnl_pct {
            signals.push(SellSignal {
                kind: SellSignalKind::StopLoss,
                points: c.stop_loss_points,
                reason: format!("Down {:.1}% from cost; stop-loss level", pnl_pct.abs()),
            });
        } else if pnl_pct > c.profit_taking_pnl_pct {
            signals.push(SellSignal {
                kind: SellSignalKind::ProfitTaking,
                points: c.profit_taking_points,
                reason: format!("Up {pnl_pct:.1}%; consider taking profits"),
            });
        }

        if trend == TechnicalTrend::Bearish {
            signals.push(SellSignal {
                kind: SellSignalKind::BearishTrend,
                points: c.bearish_trend_points,
                reason: "Bearish technical trend".to_string(),
            });
        }

        if portfolio_value > 0.0 {
            let allocation_pct = position.market_value / portfolio_value * 100.0;
            if allocation_pct > c.concentration_pct {
                signals.push(SellSignal {
                    kind: SellSignalKind::Concentration,
                    points: c.concentration_points,
                    reason: format!("Position is {allocation_pct:.1}% of portfolio"),
                });
            }
        }

        signals
    }

    /// Full points at the StrongSell boundary, half at the Hold boundary.
    fn scaled_rating_points(&self, score: f64) -> f64 {
        let full = self.config.negative_rating_points;
        let span = 50.0 - 30.0;
        (full * (1.0 - 0.5 * (score - 30.0) / span)).clamp(full * 0.5, full)
    }

    pub fn action_for(&self, sell_score: f64) -> SellAction {
        if sell_score >= self.config.strong_sell_tier {
            SellAction::StrongSell
        } else if sell_score >= self.config.sell_tier {
            SellAction::Sell
        } else {
            SellAction::TrimPosition
        }
    }

    fn sell_fraction(&self, action: SellAction, rating: Rating, signals: &[SellSignal]) -> f64 {
        let c = self.config;
        let has = |kind: SellSignalKind| signals.iter().any(|s| s.kind == kind);

        let mut fraction = match action {
            SellAction::StrongSell => c.strong_sell_fraction,
            SellAction::Sell => c.sell_fraction,
            SellAction::TrimPosition => c.trim_fraction,
        };
        if rating == Rating::StrongSell {
            fraction += c.strong_sell_rating_bonus;
        }
        if has(SellSignalKind::StopLoss) {
            fraction += c.stop_loss_bonus;
        }

        let thesis_driver = has(SellSignalKind::NegativeRating)
            || has(SellSignalKind::WeakHold)
            || has(SellSignalKind::StopLoss)
            || has(SellSignalKind::BearishTrend);
        if has(SellSignalKind::ProfitTaking) && !thesis_driver {
            fraction = fraction.min(c.profit_only_cap);
        }

        fraction.min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::domain::signals::SignalSet;
    use crate::engine::composite::CompositeScorer;
    use uuid::Uuid;

    fn result_with(rating: Rating, score: f64) -> CompositeResult {
        let scorer = CompositeScorer::new(ScoringConfig::default());
        let mut result = scorer.score_traditional(&SignalSet::new("HELD", 10.0));
        result.rating = rating;
        result.base_rating = rating;
        result.composite_score = score;
        result
    }

    /// 100 shares bought at `cost`, now at `price`.
    fn position(cost: f64, price: f64) -> Position {
        let mut p = Position::open(Uuid::nil(), "HELD", 100.0, cost, None).unwrap();
        p.refresh_price(price).unwrap();
        p
    }

    #[test]
    fn winner_with_sell_rating_and_concentration_is_strong_sell() {
        let config = SellConfig::default();
        let detector = SellSignalDetector::new(&config);
        let p = position(100.0, 160.0);
        // 16_000 of 80_000 is 20%.
        let rec = detector
            .evaluate(&p, &result_with(Rating::Sell, 35.0), TechnicalTrend::Neutral, 80_000.0)
            .unwrap();

        assert!((rec.sell_score - 60.0).abs() < 1e-9);
        assert_eq!(rec.suggested_action, SellAction::StrongSell);
        assert!((rec.sell_fraction - 0.75).abs() < 1e-9);
        assert_eq!(rec.suggested_quantity, 75.0);
        assert_eq!(rec.sell_signals.len(), 3);
    }

    #[test]
    fn tiers_follow_score() {
        let config = SellConfig::default();
        let detector = SellSignalDetector::new(&config);
        assert_eq!(detector.action_for(60.0), SellAction::StrongSell);
        assert_eq!(detector.action_for(59.9), SellAction::Sell);
        assert_eq!(detector.action_for(40.0), SellAction::Sell);
        assert_eq!(detector.action_for(39.9), SellAction::TrimPosition);
        assert_eq!(detector.action_for(20.0), SellAction::TrimPosition);
    }

    #[test]
    fn below_floor_emits_nothing() {
        let config = SellConfig::default();
        let detector = SellSignalDetector::new(&config);
        let p = position(100.0, 105.0);
        assert!(detector
            .evaluate(&p, &result_with(Rating::Buy, 72.0), TechnicalTrend::Bearish, 1e6)
            .is_none());
    }

    #[test]
    fn strong_sell_with_stop_loss_liquidates() {
        let config = SellConfig::default();
        let detector = SellSignalDetector::new(&config);
        let p = position(100.0, 70.0);
        let rec = detector
            .evaluate(&p, &result_with(Rating::StrongSell, 20.0), TechnicalTrend::Bearish, 1e6)
            .unwrap();

        assert_eq!(rec.suggested_action, SellAction::StrongSell);
        assert_eq!(rec.sell_fraction, 1.0);
        assert_eq!(rec.suggested_quantity, 100.0);
    }

    #[test]
    fn sell_rating_points_scale_with_score() {
        let config = SellConfig::default();
        let detector = SellSignalDetector::new(&config);
        assert!((detector.scaled_rating_points(30.0) - 40.0).abs() < 1e-9);
        assert!((detector.scaled_rating_points(35.0) - 35.0).abs() < 1e-9);
        assert!((detector.scaled_rating_points(49.9) - 20.1).abs() < 1e-9);
        assert_eq!(detector.scaled_rating_points(10.0), 40.0);
    }

    #[test]
    fn profit_taking_alone_never_sells_more_than_half() {
        let config = SellConfig {
            profit_taking_points: 65.0,
            ..SellConfig::default()
        };
        let detector = SellSignalDetector::new(&config);
        let p = position(100.0, 200.0);
        let rec = detector
            .evaluate(&p, &result_with(Rating::Hold, 60.0), TechnicalTrend::Neutral, 1e6)
            .unwrap();

        assert_eq!(rec.suggested_action, SellAction::StrongSell);
        assert_eq!(rec.sell_fraction, 0.5);
        assert_eq!(rec.suggested_quantity, 50.0);
    }

    #[test]
    fn small_positions_sell_at_least_one_share() {
        let config = SellConfig::default();
        let detector = SellSignalDetector::new(&config);
        let mut p = Position::open(Uuid::nil(), "TINY", 2.0, 100.0, None).unwrap();
        p.refresh_price(100.0).unwrap();
        let rec = detector
            .evaluate(&p, &result_with(Rating::Hold, 35.0), TechnicalTrend::Neutral, 1e6)
            .unwrap();

        assert_eq!(rec.suggested_action, SellAction::TrimPosition);
        assert_eq!(rec.suggested_quantity, 1.0);
    }
}
