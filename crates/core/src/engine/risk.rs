//! Risk Assessor: portfolio-level risk assessment and the per-trade validation gate.
//!
//! Assessment never fails. When inputs are missing it returns a conservative High-risk
//! assessment flagged with `is_default` so callers can still act defensively.

use crate::config::RiskConfig;
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::risk::{MarketStats, RiskAssessment, RiskLevel};
use crate::domain::trade::{TradeAction, TradeRecommendation, ValidationResult};
use std::collections::HashMap;

const ERROR_PENALTY: f64 = 0.3;
const WARNING_PENALTY: f64 = 0.1;

pub struct RiskAssessor<'a> {
    config: &'a RiskConfig,
}

impl<'a> RiskAssessor<'a> {
    pub fn new(config: &'a RiskConfig) -> Self {
        Self { config }
    }

    /// `stats` is keyed by upper-case symbol.
    pub fn assess(
        &self,
        portfolio: &PortfolioSnapshot,
        stats: &HashMap<String, MarketStats>,
    ) -> RiskAssessment {
        let total = portfolio.total_value();
        if !total.is_finite() || total <= 0.0 {
            return self.default_assessment("Portfolio value unavailable", 0.0);
        }

        let held: Vec<_> = portfolio
            .positions
            .iter()
            .filter(|p| !p.is_closed())
            .collect();
        let held_stats: Vec<&MarketStats> = held
            .iter()
            .filter_map(|p| stats.get(&p.symbol.to_ascii_uppercase()))
            .collect();
        if !held.is_empty() && held_stats.is_empty() {
            return self.default_assessment("No market data for held positions", total);
        }

        let mut warnings = Vec::new();
        let mut mitigations = Vec::new();

        let largest = held
            .iter()
            .max_by(|a, b| a.market_value.total_cmp(&b.market_value));
        let largest_weight = largest.map(|p| p.market_value / total).unwrap_or(0.0);
        let concentration = self.concentration_risk(largest_weight);
        if let Some(p) = largest.filter(|_| largest_weight > self.config.max_concentration) {
            warnings.push(format!(
                "{} is {:.1}% of the portfolio (limit {:.0}%)",
                p.symbol,
                largest_weight * 100.0,
                self.config.max_concentration * 100.0
            ));
            mitigations.push(format!("Trim {} toward the concentration limit", p.symbol));
        }

        let changes: Vec<f64> = held_stats.iter().filter_map(|s| s.change_pct).collect();
        let market = match average(&changes.iter().map(|c| c.abs()).collect::<Vec<_>>()) {
            Some(avg) => (avg / self.config.market_move_ceiling_pct).clamp(0.0, 1.0),
            None => {
                warnings.push("Recent price changes unavailable".to_string());
                0.5
            }
        };

        let vols: Vec<f64> = held_stats.iter().filter_map(|s| s.volatility).collect();
        let volatility = match average(&vols) {
            Some(avg) => {
                if avg >= self.config.high_volatility {
                    warnings.push(format!("High average volatility ({:.0}%)", avg * 100.0));
                    mitigations.push("Favor smaller position sizes".to_string());
                }
                self.volatility_risk(avg)
            }
            None => {
                warnings.push("Volatility data unavailable".to_string());
                0.5
            }
        };

        let liquidity_scores: Vec<f64> = held_stats
            .iter()
            .filter_map(|s| s.volume)
            .map(liquidity_bucket)
            .collect();
        let liquidity = match average(&liquidity_scores) {
            Some(avg) => {
                if avg >= 0.6 {
                    warnings.push("Thinly traded holdings".to_string());
                    mitigations.push("Use limit orders on illiquid names".to_string());
                }
                avg
            }
            None => {
                warnings.push("Volume data unavailable".to_string());
                0.5
            }
        };

        let c = self.config;
        let risk_score = (c.concentration_weight * concentration
            + c.market_weight * market
            + c.volatility_weight * volatility
            + c.liquidity_weight * liquidity)
            .clamp(0.0, 1.0);
        let overall_risk = risk_level(risk_score);
        if overall_risk >= RiskLevel::High {
            mitigations.push("Reduce gross exposure or raise cash".to_string());
        }

        tracing::debug!(
            portfolio_id = %portfolio.portfolio_id,
            risk_score,
            %overall_risk,
            "portfolio risk assessed"
        );

        RiskAssessment {
            overall_risk,
            risk_score,
            concentration_risk: concentration,
            market_risk: market,
            volatility_risk: volatility,
            liquidity_risk: liquidity,
            daily_loss_limit: total * c.daily_loss_limit,
            position_limit: total * c.max_position_size,
            warnings,
            mitigations,
            is_default: false,
        }
    }

    pub fn default_assessment(&self, reason: &str, portfolio_value: f64) -> RiskAssessment {
        tracing::warn!(reason, "using conservative default risk assessment");
        let score = self.config.default_risk_score;
        RiskAssessment {
            overall_risk: RiskLevel::High,
            risk_score: score,
            concentration_risk: score,
            market_risk: score,
            volatility_risk: score,
            liquidity_risk: score,
            daily_loss_limit: portfolio_value * self.config.daily_loss_limit,
            position_limit: portfolio_value * self.config.max_position_size,
            warnings: vec![format!("{reason}; assuming elevated risk")],
            mitigations: vec!["Hold off on new positions until data is available".to_string()],
            is_default: true,
        }
    }

    /// `weight` is the largest position as a fraction of portfolio value.
    pub fn concentration_risk(&self, weight: f64) -> f64 {
        let ratio = weight / self.config.max_concentration;
        let risk = if ratio <= 1.0 {
            0.5 * ratio
        } else {
            0.5 + 0.5 * (ratio * ratio - 1.0)
        };
        risk.clamp(0.0, 1.0)
    }

    pub fn volatility_risk(&self, volatility: f64) -> f64 {
        let high = self.config.high_volatility;
        let extreme = self.config.extreme_volatility;
        let risk = if volatility >= extreme {
            1.0
        } else if volatility >= high {
            0.6 + 0.4 * (volatility - high) / (extreme - high)
        } else {
            0.6 * volatility / high
        };
        risk.clamp(0.0, 1.0)
    }

    pub fn validate_trade(
        &self,
        trade: &TradeRecommendation,
        portfolio: &PortfolioSnapshot,
        market_open: bool,
    ) -> ValidationResult {
        let c = self.config;
        let mut v = ValidationResult {
            risk_check_passed: true,
            position_limit_check: true,
            cash_check_passed: true,
            market_hours_check: true,
            ..ValidationResult::default()
        };

        if trade.quantity <= 0.0 || !trade.quantity.is_finite() {
            v.errors.push(format!("Quantity must be positive (got {})", trade.quantity));
        }

        let total = portfolio.total_value();
        let cost = trade.estimated_cost();
        if total <= 0.0 {
            v.position_limit_check = false;
            v.errors.push("Portfolio value unavailable".to_string());
        } else if trade.action == TradeAction::Buy {
            let size = cost / total;
            if size > c.max_position_size + f64::EPSILON {
                v.position_limit_check = false;
                v.errors.push(format!(
                    "Position size {:.1}% exceeds limit {:.1}%",
                    size * 100.0,
                    c.max_position_size * 100.0
                ));
                let price = trade.limit_price.unwrap_or(trade.reference_price);
                if price > 0.0 {
                    let max_qty = (total * c.max_position_size / price).floor();
                    v.suggested_adjustments
                        .push(format!("Reduce quantity to {max_qty} shares"));
                }
            }
        }

        if trade.risk_score > c.max_trade_risk {
            v.risk_check_passed = false;
            v.errors.push(format!(
                "Trade risk {:.2} exceeds limit {:.2}",
                trade.risk_score, c.max_trade_risk
            ));
        }

        match trade.action {
            TradeAction::Buy => {
                if cost > portfolio.cash {
                    v.cash_check_passed = false;
                    v.errors.push(format!(
                        "Estimated cost {cost:.2} exceeds available cash {:.2}",
                        portfolio.cash
                    ));
                    let price = trade.limit_price.unwrap_or(trade.reference_price);
                    if price > 0.0 {
                        let affordable = (portfolio.cash / price).floor();
                        v.suggested_adjustments
                            .push(format!("Reduce quantity to {affordable} shares to fit cash"));
                    }
                }
            }
            TradeAction::Sell => {
                let held = portfolio
                    .position(&trade.symbol)
                    .map(|p| p.quantity)
                    .unwrap_or(0.0);
                if trade.quantity > held {
                    v.errors.push(format!(
                        "Cannot sell {} shares of {} (held {held})",
                        trade.quantity, trade.symbol
                    ));
                }
            }
        }

        if !market_open {
            v.market_hours_check = false;
            v.warnings.push("Market is closed; order will queue".to_string());
        }

        v.is_valid = v.errors.is_empty();
        v.validation_score = (1.0
            - ERROR_PENALTY * v.errors.len() as f64
            - WARNING_PENALTY * v.warnings.len() as f64)
            .max(0.0);
        v
    }
}

fn average(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    Some(finite.iter().sum::<f64>() / finite.len() as f64)
}

pub fn liquidity_bucket(volume: f64) -> f64 {
    if volume >= 10_000_000.0 {
        0.1
    } else if volume >= 1_000_000.0 {
        0.3
    } else if volume >= 100_000.0 {
        0.6
    } else {
        0.9
    }
}

pub fn risk_level(score: f64) -> RiskLevel {
    if score >= 0.8 {
        RiskLevel::Extreme
    } else if score >= 0.6 {
        RiskLevel::High
    } else if score >= 0.4 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::portfolio::Position;
    use crate::domain::trade::OrderType;
    use uuid::Uuid;

    fn portfolio(cash: f64, holdings: &[(&str, f64, f64)]) -> PortfolioSnapshot {
        PortfolioSnapshot {
            portfolio_id: Uuid::nil(),
            cash,
            positions: holdings
                .iter()
                .map(|(s, q, p)| Position::open(Uuid::nil(), *s, *q, *p, None).unwrap())
                .collect(),
        }
    }

    fn stats(change: f64, vol: f64, volume: f64) -> MarketStats {
        MarketStats {
            change_pct: Some(change),
            volatility: Some(vol),
            volume: Some(volume),
        }
    }

    fn buy(symbol: &str, quantity: f64, price: f64, risk: f64) -> TradeRecommendation {
        TradeRecommendation {
            symbol: symbol.to_string(),
            action: TradeAction::Buy,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            reference_price: price,
            confidence: 70.0,
            risk_score: risk,
            expected_return_pct: 5.0,
            position_size_pct: 0.05,
            max_loss_pct: 0.004,
        }
    }

    #[test]
    fn concentration_rises_superlinearly_above_limit() {
        let config = RiskConfig::default();
        let assessor = RiskAssessor::new(&config);
        assert!((assessor.concentration_risk(0.10) - 0.25).abs() < 1e-9);
        assert!((assessor.concentration_risk(0.20) - 0.5).abs() < 1e-9);
        // ratio 1.2 => 0.5 + 0.5 * 0.44
        assert!((assessor.concentration_risk(0.24) - 0.72).abs() < 1e-9);
        assert_eq!(assessor.concentration_risk(0.9), 1.0);
    }

    #[test]
    fn assessment_combines_weighted_subscores() {
        let config = RiskConfig::default();
        let assessor = RiskAssessor::new(&config);
        let p = portfolio(80_000.0, &[("AAA", 100.0, 100.0), ("BBB", 100.0, 100.0)]);
        let mut s = HashMap::new();
        s.insert("AAA".to_string(), stats(2.0, 0.20, 20_000_000.0));
        s.insert("BBB".to_string(), stats(-3.0, 0.20, 20_000_000.0));

        let a = assessor.assess(&p, &s);
        // 10% largest => 0.25; |2|,|3| avg 2.5 => 0.5; 0.2 vol => 0.4; liquidity 0.1
        let expected = 0.30 * 0.25 + 0.25 * 0.5 + 0.25 * 0.4 + 0.20 * 0.1;
        assert!((a.risk_score - expected).abs() < 1e-9);
        assert_eq!(a.overall_risk, RiskLevel::Low);
        assert!((a.daily_loss_limit - 2_000.0).abs() < 1e-9);
        assert!((a.position_limit - 10_000.0).abs() < 1e-9);
        assert!(!a.is_default);
    }

    #[test]
    fn missing_data_yields_conservative_default() {
        let config = RiskConfig::default();
        let assessor = RiskAssessor::new(&config);
        let p = portfolio(1_000.0, &[("AAA", 10.0, 10.0)]);

        let a = assessor.assess(&p, &HashMap::new());
        assert!(a.is_default);
        assert_eq!(a.overall_risk, RiskLevel::High);
        assert_eq!(a.risk_score, 0.65);
        assert!(!a.warnings.is_empty());

        assert!(assessor.assess(&PortfolioSnapshot::default(), &HashMap::new()).is_default);
    }

    #[test]
    fn risk_levels_bucket_at_boundaries() {
        assert_eq!(risk_level(0.8), RiskLevel::Extreme);
        assert_eq!(risk_level(0.6), RiskLevel::High);
        assert_eq!(risk_level(0.4), RiskLevel::Medium);
        assert_eq!(risk_level(0.39), RiskLevel::Low);
        assert_eq!(liquidity_bucket(50_000.0), 0.9);
        assert_eq!(liquidity_bucket(1_000_000.0), 0.3);
    }

    #[test]
    fn valid_trade_passes_every_check() {
        let config = RiskConfig::default();
        let assessor = RiskAssessor::new(&config);
        let p = portfolio(100_000.0, &[]);
        let v = assessor.validate_trade(&buy("AAA", 50.0, 100.0, 0.3), &p, true);
        assert!(v.is_valid);
        assert_eq!(v.validation_score, 1.0);
    }

    #[test]
    fn oversized_and_risky_buy_collects_errors() {
        let config = RiskConfig::default();
        let assessor = RiskAssessor::new(&config);
        let p = portfolio(10_000.0, &[("HELD", 100.0, 100.0)]);
        // 150 * 100 = 15_000 of 20_000: too large, too risky, more than cash.
        let v = assessor.validate_trade(&buy("AAA", 150.0, 100.0, 0.9), &p, false);

        assert!(!v.is_valid);
        assert!(!v.position_limit_check);
        assert!(!v.risk_check_passed);
        assert!(!v.cash_check_passed);
        assert!(!v.market_hours_check);
        assert_eq!(v.errors.len(), 3);
        assert_eq!(v.warnings.len(), 1);
        assert!(v.validation_score.abs() < 1e-9);
        assert!(v
            .suggested_adjustments
            .iter()
            .any(|s| s.contains("20 shares")));
    }

    #[test]
    fn closed_market_is_only_a_warning() {
        let config = RiskConfig::default();
        let assessor = RiskAssessor::new(&config);
        let p = portfolio(100_000.0, &[]);
        let v = assessor.validate_trade(&buy("AAA", 10.0, 100.0, 0.2), &p, false);
        assert!(v.is_valid);
        assert!((v.validation_score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn selling_more_than_held_is_an_error() {
        let config = RiskConfig::default();
        let assessor = RiskAssessor::new(&config);
        let p = portfolio(1_000.0, &[("HELD", 5.0, 100.0)]);
        let mut trade = buy("held", 6.0, 100.0, 0.2);
        trade.action = TradeAction::Sell;

        let v = assessor.validate_trade(&trade, &p, true);
        assert!(!v.is_valid);
        assert!((v.validation_score - 0.7).abs() < 1e-9);
    }
}
