//! Position Sizer and the batch budget validator.

use crate::config::{RiskConfig, SizingConfig};
use crate::domain::composite::CompositeResult;
use crate::domain::rating::Rating;
use crate::domain::trade::{OrderType, TradeAction, TradeRecommendation};

pub struct PositionSizer<'a> {
    sizing: &'a SizingConfig,
    risk: &'a RiskConfig,
}

impl<'a> PositionSizer<'a> {
    pub fn new(sizing: &'a SizingConfig, risk: &'a RiskConfig) -> Self {
        Self { sizing, risk }
    }

    /// Sizes a trade for a scored symbol. Hold/Avoid ratings, unusable prices and trades
    /// that round down to zero shares produce `None`. Sells are capped at `held_quantity`.
    pub fn size(
        &self,
        result: &CompositeResult,
        price: f64,
        portfolio_value: f64,
        held_quantity: f64,
    ) -> Option<TradeRecommendation> {
        let action = match result.rating {
            Rating::StrongBuy | Rating::Buy => TradeAction::Buy,
            Rating::Sell | Rating::StrongSell => TradeAction::Sell,
            Rating::Hold | Rating::Avoid => return None,
        };
        if !(price.is_finite() && price > 0.0 && portfolio_value > 0.0) {
            return None;
        }

        let position_size_pct = self.position_size_pct(result.confidence);
        let mut quantity = (portfolio_value * position_size_pct / price).floor();
        if action == TradeAction::Sell {
            quantity = quantity.min(held_quantity.floor());
        }
        if quantity <= 0.0 {
            tracing::debug!(symbol = %result.symbol, "sized quantity is zero; dropping");
            return None;
        }

        let risk_score = (1.0 - result.component_scores.risk / 100.0).clamp(0.0, 1.0);
        let (order_type, limit_price) = if risk_score > self.sizing.limit_order_risk {
            (OrderType::Limit, Some(price))
        } else {
            (OrderType::Market, None)
        };
        let edge = (result.composite_score - 50.0) / 250.0 * 100.0;
        let expected_return_pct = match action {
            TradeAction::Buy => edge,
            TradeAction::Sell => -edge,
        };

        Some(TradeRecommendation {
            symbol: result.symbol.clone(),
            action,
            quantity,
            order_type,
            limit_price,
            reference_price: price,
            confidence: result.confidence,
            risk_score,
            expected_return_pct,
            position_size_pct,
            max_loss_pct: position_size_pct * self.sizing.stop_loss_fraction,
        })
    }

    pub fn position_size_pct(&self, confidence: f64) -> f64 {
        (confidence.max(0.0) * self.sizing.confidence_scaling).min(self.risk.max_position_size)
    }

    /// Accepts buys in confidence order while the invested total stays within budget. A buy
    /// that does not fit is clipped to the remainder when that remainder is at least
    /// `min_clip_remainder`, otherwise dropped. Sells pass through.
    pub fn fit_to_budget(
        &self,
        mut recommendations: Vec<TradeRecommendation>,
        portfolio_value: f64,
    ) -> Vec<TradeRecommendation> {
        recommendations.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let budget = self.sizing.max_portfolio_invested;
        let mut total = 0.0;
        let mut accepted = Vec::with_capacity(recommendations.len());

        for mut rec in recommendations {
            if rec.action == TradeAction::Sell {
                accepted.push(rec);
                continue;
            }
            if total + rec.position_size_pct <= budget + f64::EPSILON {
                total += rec.position_size_pct;
                accepted.push(rec);
                continue;
            }

            let remaining = budget - total;
            if remaining < self.sizing.min_clip_remainder {
                tracing::debug!(symbol = %rec.symbol, remaining, "budget exhausted; dropping");
                continue;
            }
            let price = rec.limit_price.unwrap_or(rec.reference_price);
            let quantity = (portfolio_value * remaining / price).floor();
            if quantity <= 0.0 {
                continue;
            }
            tracing::debug!(symbol = %rec.symbol, remaining, "clipping to remaining budget");
            rec.position_size_pct = remaining;
            rec.quantity = quantity;
            rec.max_loss_pct = remaining * self.sizing.stop_loss_fraction;
            total = budget;
            accepted.push(rec);
        }

        accepted
    }
}
