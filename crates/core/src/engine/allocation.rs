//! Portfolio-aware allocation check for proposed buys.

use crate::config::AllocationConfig;
use crate::domain::portfolio::PortfolioSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationAction {
    Buy,
    Add,
    Skip,
}

impl fmt::Display for AllocationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationAction::Buy => f.write_str("BUY"),
            AllocationAction::Add => f.write_str("ADD"),
            AllocationAction::Skip => f.write_str("SKIP"),
        }
    }
}

/// All percentages are of total portfolio value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationCheck {
    pub symbol: String,
    pub action: AllocationAction,
    pub current_allocation_pct: f64,
    pub suggested_allocation_pct: f64,
    pub final_allocation_pct: f64,
    pub reason: String,
}

pub struct AllocationChecker<'a> {
    config: &'a AllocationConfig,
}

impl<'a> AllocationChecker<'a> {
    pub fn new(config: &'a AllocationConfig) -> Self {
        Self { config }
    }

    pub fn check(
        &self,
        symbol: &str,
        suggested_pct: f64,
        portfolio: &PortfolioSnapshot,
    ) -> AllocationCheck {
        let current = portfolio.allocation_pct(symbol);
        let headroom = self.config.max_single_position_pct - current;
        let final_pct = suggested_pct.min(headroom).max(0.0);

        let (action, reason) = if final_pct <= 0.0 {
            (
                AllocationAction::Skip,
                format!("already at max allocation ({current:.1}%)"),
            )
        } else if current > 0.0 {
            (
                AllocationAction::Add,
                format!("add {final_pct:.1}% to existing {current:.1}%"),
            )
        } else {
            (AllocationAction::Buy, format!("new position at {final_pct:.1}%"))
        };

        AllocationCheck {
            symbol: symbol.to_string(),
            action,
            current_allocation_pct: current,
            suggested_allocation_pct: suggested_pct,
            final_allocation_pct: final_pct,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::portfolio::Position;
    use uuid::Uuid;

    /// Holds `pct`% of a 100_000 portfolio in `symbol`.
    fn holding(symbol: &str, pct: f64) -> PortfolioSnapshot {
        let value = 100_000.0 * pct / 100.0;
        PortfolioSnapshot {
            portfolio_id: Uuid::nil(),
            cash: 100_000.0 - value,
            positions: vec![Position::open(Uuid::nil(), symbol, value / 50.0, 50.0, None).unwrap()],
        }
    }

    #[test]
    fn adds_only_the_remaining_headroom() {
        let config = AllocationConfig::default();
        let checker = AllocationChecker::new(&config);
        let check = checker.check("AAPL", 10.0, &holding("AAPL", 15.0));

        assert_eq!(check.action, AllocationAction::Add);
        assert!((check.final_allocation_pct - 5.0).abs() < 1e-9);
    }

    #[test]
    fn new_symbol_is_a_buy_at_suggested_size() {
        let config = AllocationConfig::default();
        let checker = AllocationChecker::new(&config);
        let check = checker.check("MSFT", 7.0, &holding("AAPL", 15.0));

        assert_eq!(check.action, AllocationAction::Buy);
        assert_eq!(check.final_allocation_pct, 7.0);
        assert_eq!(check.current_allocation_pct, 0.0);
    }

    #[test]
    fn full_or_over_allocated_symbols_skip_without_going_negative() {
        let config = AllocationConfig::default();
        let checker = AllocationChecker::new(&config);
        for held in [20.0, 35.0] {
            let check = checker.check("AAPL", 5.0, &holding("AAPL", held));
            assert_eq!(check.action, AllocationAction::Skip);
            assert_eq!(check.final_allocation_pct, 0.0);
            assert!(check.reason.contains("max allocation"));
        }
    }

    #[test]
    fn final_allocation_never_exceeds_headroom() {
        let config = AllocationConfig::default();
        let checker = AllocationChecker::new(&config);
        for held in [0.0_f64, 5.0, 12.5, 19.0] {
            for suggested in [0.5, 3.0, 10.0, 40.0] {
                let check = checker.check("X", suggested, &holding("X", held.max(0.01)));
                assert!(check.final_allocation_pct >= 0.0);
                assert!(
                    check.final_allocation_pct
                        <= config.max_single_position_pct - check.current_allocation_pct + 1e-9
                );
            }
        }
    }
}
