//! Execution Venue contract. Read-only: account, positions and open orders supply context
//! for trade validation. Order placement is not part of this crate.

pub mod http;

use crate::domain::portfolio::{PortfolioSnapshot, Position};
use crate::domain::trade::TradeAction;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use http::HttpExecutionVenue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: String,
    pub cash: f64,
    #[serde(default)]
    pub buying_power: Option<f64>,
    #[serde(default)]
    pub equity: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenuePosition {
    pub symbol: String,
    pub quantity: f64,
    pub average_cost: f64,
    #[serde(default)]
    pub market_price: Option<f64>,
    #[serde(default)]
    pub sector: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueOrder {
    pub id: String,
    pub symbol: String,
    pub side: TradeAction,
    pub quantity: f64,
    #[serde(default)]
    pub limit_price: Option<f64>,
    pub status: String,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
pub trait ExecutionVenue: Send + Sync {
    fn venue_name(&self) -> &'static str;

    async fn get_account(&self) -> Result<AccountSnapshot>;

    async fn get_positions(&self) -> Result<Vec<VenuePosition>>;

    async fn get_orders(&self) -> Result<Vec<VenueOrder>>;
}

/// Builds a [`PortfolioSnapshot`] from the venue's account and positions. Cash already
/// committed to open buy orders is subtracted. Positions with no quantity are skipped.
pub async fn portfolio_snapshot(
    venue: &dyn ExecutionVenue,
    portfolio_id: Uuid,
) -> Result<PortfolioSnapshot> {
    let account = venue.get_account().await?;
    let held = venue.get_positions().await?;
    let orders = venue.get_orders().await?;

    let committed: f64 = orders
        .iter()
        .filter(|o| o.side == TradeAction::Buy)
        .filter_map(|o| o.limit_price.map(|p| p * o.quantity))
        .sum();

    let mut positions = Vec::with_capacity(held.len());
    for p in held.into_iter().filter(|p| p.quantity > 0.0) {
        let mut position =
            Position::open(portfolio_id, p.symbol, p.quantity, p.average_cost, p.sector)?;
        if let Some(price) = p.market_price.filter(|px| *px > 0.0) {
            position.refresh_price(price)?;
        }
        positions.push(position);
    }

    Ok(PortfolioSnapshot {
        portfolio_id,
        cash: (account.cash - committed).max(0.0),
        positions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedVenue;

    #[async_trait::async_trait]
    impl ExecutionVenue for FixedVenue {
        fn venue_name(&self) -> &'static str {
            "fixed"
        }

        async fn get_account(&self) -> Result<AccountSnapshot> {
            Ok(AccountSnapshot {
                account_id: "acct-1".into(),
                cash: 10_000.0,
                buying_power: None,
                equity: None,
                currency: Some("USD".into()),
            })
        }

        async fn get_positions(&self) -> Result<Vec<VenuePosition>> {
            Ok(vec![
                VenuePosition {
                    symbol: "AAPL".into(),
                    quantity: 10.0,
                    average_cost: 150.0,
                    market_price: Some(180.0),
                    sector: Some("Technology".into()),
                },
                VenuePosition {
                    symbol: "GONE".into(),
                    quantity: 0.0,
                    average_cost: 10.0,
                    market_price: None,
                    sector: None,
                },
            ])
        }

        async fn get_orders(&self) -> Result<Vec<VenueOrder>> {
            Ok(vec![VenueOrder {
                id: "o-1".into(),
                symbol: "MSFT".into(),
                side: TradeAction::Buy,
                quantity: 5.0,
                limit_price: Some(400.0),
                status: "open".into(),
                submitted_at: None,
            }])
        }
    }

    #[tokio::test]
    async fn snapshot_nets_out_open_buys_and_marks_to_market() {
        let snapshot = portfolio_snapshot(&FixedVenue, Uuid::nil()).await.unwrap();
        assert_eq!(snapshot.cash, 8_000.0);
        assert_eq!(snapshot.positions.len(), 1);
        let aapl = snapshot.position("AAPL").unwrap();
        assert_eq!(aapl.market_value, 1_800.0);
        assert!((aapl.unrealized_pnl_pct - 20.0).abs() < 1e-9);
    }
}
