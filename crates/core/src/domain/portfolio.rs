use anyhow::ensure;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A held position. Derived fields (`market_value`, `unrealized_pnl`,
/// `unrealized_pnl_pct`) are always recomputed together from quantity, cost and price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub portfolio_id: Uuid,
    pub symbol: String,
    pub quantity: f64,
    pub average_cost: f64,
    pub current_price: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
    /// Percent units (25.0 == +25%).
    pub unrealized_pnl_pct: f64,
    pub sector: Option<String>,
}

impl Position {
    /// Creates a position from its first buy.
    pub fn open(
        portfolio_id: Uuid,
        symbol: impl Into<String>,
        quantity: f64,
        price: f64,
        sector: Option<String>,
    ) -> anyhow::Result<Self> {
        ensure!(quantity > 0.0, "opening quantity must be positive (got {quantity})");
        ensure!(price > 0.0, "opening price must be positive (got {price})");

        let mut position = Self {
            portfolio_id,
            symbol: symbol.into(),
            quantity,
            average_cost: price,
            current_price: price,
            market_value: 0.0,
            unrealized_pnl: 0.0,
            unrealized_pnl_pct: 0.0,
            sector,
        };
        position.recompute();
        Ok(position)
    }

    pub fn apply_buy(&mut self, quantity: f64, price: f64) -> anyhow::Result<()> {
        ensure!(quantity > 0.0, "buy quantity must be positive (got {quantity})");
        ensure!(price > 0.0, "buy price must be positive (got {price})");

        let total_cost = self.average_cost * self.quantity + price * quantity;
        self.quantity += quantity;
        self.average_cost = total_cost / self.quantity;
        self.current_price = price;
        self.recompute();
        Ok(())
    }

    /// Applies a sell and returns the realized P&L of the sold quantity.
    pub fn apply_sell(&mut self, quantity: f64, price: f64) -> anyhow::Result<f64> {
        ensure!(quantity > 0.0, "sell quantity must be positive (got {quantity})");
        ensure!(price > 0.0, "sell price must be positive (got {price})");
        ensure!(
            quantity <= self.quantity + f64::EPSILON,
            "cannot sell {quantity} of {} (held {})",
            self.symbol,
            self.quantity
        );

        let realized = (price - self.average_cost) * quantity;
        self.quantity = (self.quantity - quantity).max(0.0);
        self.current_price = price;
        self.recompute();
        Ok(realized)
    }

    pub fn refresh_price(&mut self, price: f64) -> anyhow::Result<()> {
        ensure!(price > 0.0, "refresh price must be positive (got {price})");
        self.current_price = price;
        self.recompute();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.quantity <= 0.0
    }

    fn recompute(&mut self) {
        self.market_value = self.quantity * self.current_price;
        let cost_basis = self.quantity * self.average_cost;
        self.unrealized_pnl = self.market_value - cost_basis;
        self.unrealized_pnl_pct = if cost_basis > 0.0 {
            self.unrealized_pnl / cost_basis * 100.0
        } else {
            0.0
        };
    }
}

/// Point-in-time view of a portfolio used by the decision stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub portfolio_id: Uuid,
    pub cash: f64,
    pub positions: Vec<Position>,
}

impl PortfolioSnapshot {
    pub fn invested_value(&self) -> f64 {
        self.positions.iter().map(|p| p.market_value).sum()
    }

    pub fn total_value(&self) -> f64 {
        self.cash + self.invested_value()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions
            .iter()
            .find(|p| p.symbol.eq_ignore_ascii_case(symbol))
    }

    /// Allocation of `symbol` in percent of total value; 0 when not held.
    pub fn allocation_pct(&self, symbol: &str) -> f64 {
        let total = self.total_value();
        if total <= 0.0 {
            return 0.0;
        }
        self.position(symbol)
            .map(|p| p.market_value / total * 100.0)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_then_refresh_recomputes_derived_fields_together() {
        let mut p = Position::open(Uuid::nil(), "AAPL", 10.0, 100.0, None).unwrap();
        p.apply_buy(10.0, 120.0).unwrap();
        assert!((p.average_cost - 110.0).abs() < 1e-9);

        p.refresh_price(132.0).unwrap();
        assert!((p.market_value - 2640.0).abs() < 1e-9);
        assert!((p.unrealized_pnl - 440.0).abs() < 1e-9);
        assert!((p.unrealized_pnl_pct - 20.0).abs() < 1e-9);
    }

    #[test]
    fn full_sell_closes_position() {
        let mut p = Position::open(Uuid::nil(), "MSFT", 5.0, 200.0, None).unwrap();
        let realized = p.apply_sell(5.0, 250.0).unwrap();
        assert!((realized - 250.0).abs() < 1e-9);
        assert!(p.is_closed());
        assert_eq!(p.market_value, 0.0);
    }

    #[test]
    fn rejects_negative_and_oversized_quantities() {
        assert!(Position::open(Uuid::nil(), "X", -1.0, 10.0, None).is_err());
        let mut p = Position::open(Uuid::nil(), "X", 1.0, 10.0, None).unwrap();
        assert!(p.apply_sell(2.0, 10.0).is_err());
        assert!(p.refresh_price(0.0).is_err());
    }

    #[test]
    fn allocation_is_relative_to_total_value() {
        let p = Position::open(Uuid::nil(), "NVDA", 10.0, 150.0, Some("Tech".into())).unwrap();
        let snapshot = PortfolioSnapshot {
            portfolio_id: Uuid::nil(),
            cash: 8_500.0,
            positions: vec![p],
        };
        assert!((snapshot.allocation_pct("nvda") - 15.0).abs() < 1e-9);
        assert_eq!(snapshot.allocation_pct("TSLA"), 0.0);
    }
}
