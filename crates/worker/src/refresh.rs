use serde_json::json;
use signaldesk_core::domain::portfolio::PortfolioSnapshot;
use signaldesk_core::ingest::provider::MarketDataProvider;
use signaldesk_core::storage;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshSummary {
    pub requested: usize,
    pub refreshed: usize,
    pub missing: Vec<String>,
    pub failed: Vec<String>,
}

impl RefreshSummary {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "requested": self.requested,
            "refreshed": self.refreshed,
            "missing": self.missing,
            "failed": self.failed,
        })
    }
}

/// Fetches a current quote for every open position. Symbols with no usable quote land in
/// `missing`; transport errors land in `failed`.
pub async fn fetch_prices(
    provider: &dyn MarketDataProvider,
    portfolio: &PortfolioSnapshot,
    summary: &mut RefreshSummary,
) -> Vec<(String, f64)> {
    let mut out = Vec::new();
    for position in portfolio.positions.iter().filter(|p| !p.is_closed()) {
        summary.requested += 1;
        match provider.get_price(&position.symbol).await {
            Ok(Some(quote)) if quote.is_usable() => out.push((position.symbol.clone(), quote.current)),
            Ok(_) => {
                tracing::warn!(symbol = %position.symbol, "no usable quote; keeping stored price");
                summary.missing.push(position.symbol.clone());
            }
            Err(err) => {
                tracing::error!(symbol = %position.symbol, error = %err, "quote fetch failed");
                summary.failed.push(position.symbol.clone());
            }
        }
    }
    out
}

/// Re-prices every open position of `portfolio`. Each row is updated under its own lock;
/// with `dry_run` nothing is written.
pub async fn refresh_portfolio_prices(
    pool: &sqlx::PgPool,
    provider: &dyn MarketDataProvider,
    portfolio: &PortfolioSnapshot,
    dry_run: bool,
) -> anyhow::Result<RefreshSummary> {
    let mut summary = RefreshSummary::default();
    let prices = fetch_prices(provider, portfolio, &mut summary).await;

    for (symbol, price) in prices {
        if dry_run {
            tracing::info!(symbol = %symbol, price, dry_run = true, "would refresh price");
            continue;
        }
        match storage::positions::refresh_price(pool, portfolio.portfolio_id, &symbol, price).await? {
            Some(position) => {
                tracing::debug!(
                    symbol = %symbol,
                    price,
                    unrealized_pnl_pct = position.unrealized_pnl_pct,
                    "price refreshed"
                );
                summary.refreshed += 1;
            }
            // Sold between load and refresh.
            None => summary.missing.push(symbol),
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use signaldesk_core::domain::portfolio::Position;
    use signaldesk_core::ingest::types::{
        FundamentalInputs, PriceQuote, SentimentSnapshot, TechnicalIndicators,
    };
    use uuid::Uuid;

    struct Quotes;

    #[async_trait::async_trait]
    impl MarketDataProvider for Quotes {
        fn provider_name(&self) -> &'static str {
            "quotes"
        }

        async fn get_price(&self, symbol: &str) -> anyhow::Result<Option<PriceQuote>> {
            let current = match symbol {
                "AAPL" => 190.0,
                "DEAD" => 0.0,
                "DOWN" => anyhow::bail!("connection reset"),
                _ => return Ok(None),
            };
            Ok(Some(PriceQuote {
                symbol: symbol.to_string(),
                current,
                open: None,
                high: None,
                low: None,
                volume: None,
                previous_close: None,
                change_pct: None,
                as_of: None,
            }))
        }

        async fn get_technical_indicators(&self, _: &str) -> anyhow::Result<Option<TechnicalIndicators>> {
            Ok(None)
        }

        async fn get_sentiment(&self, _: &[String]) -> anyhow::Result<Option<SentimentSnapshot>> {
            Ok(None)
        }

        async fn get_fundamentals(&self, _: &str) -> anyhow::Result<Option<FundamentalInputs>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn sorts_quotes_into_usable_missing_and_failed() {
        let id = Uuid::new_v4();
        let positions = ["AAPL", "DEAD", "DOWN", "GONE"]
            .iter()
            .map(|s| Position::open(id, *s, 10.0, 100.0, None).unwrap())
            .collect();
        let portfolio = PortfolioSnapshot {
            portfolio_id: id,
            cash: 0.0,
            positions,
        };

        let mut summary = RefreshSummary::default();
        let prices = fetch_prices(&Quotes, &portfolio, &mut summary).await;

        assert_eq!(prices, vec![("AAPL".to_string(), 190.0)]);
        assert_eq!(summary.requested, 4);
        assert_eq!(summary.missing, vec!["DEAD", "GONE"]);
        assert_eq!(summary.failed, vec!["DOWN"]);
    }
}
