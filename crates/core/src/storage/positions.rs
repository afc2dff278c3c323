//! Portfolio aggregate persistence. Every mutation of a position row happens inside a
//! transaction holding that row's lock, so concurrent refreshes of one symbol serialize.

use crate::domain::portfolio::{PortfolioSnapshot, Position};
use anyhow::Context;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

type PositionRow = (
    Uuid,
    String,
    f64,
    f64,
    f64,
    f64,
    f64,
    f64,
    Option<String>,
);

const POSITION_COLUMNS: &str = "portfolio_id, symbol, quantity, average_cost, current_price, \
     market_value, unrealized_pnl, unrealized_pnl_pct, sector";

fn from_row(row: PositionRow) -> Position {
    let (
        portfolio_id,
        symbol,
        quantity,
        average_cost,
        current_price,
        market_value,
        unrealized_pnl,
        unrealized_pnl_pct,
        sector,
    ) = row;
    Position {
        portfolio_id,
        symbol,
        quantity,
        average_cost,
        current_price,
        market_value,
        unrealized_pnl,
        unrealized_pnl_pct,
        sector,
    }
}

pub async fn create_portfolio(pool: &sqlx::PgPool, name: &str, cash: f64) -> anyhow::Result<Uuid> {
    anyhow::ensure!(cash >= 0.0, "starting cash must be non-negative (got {cash})");
    let id: Uuid = sqlx::query_scalar("INSERT INTO portfolios (name, cash) VALUES ($1, $2) RETURNING id")
        .persistent(false)
        .bind(name)
        .bind(cash)
        .fetch_one(pool)
        .await
        .context("insert portfolios failed")?;
    Ok(id)
}

pub async fn load_portfolio(
    pool: &sqlx::PgPool,
    portfolio_id: Uuid,
) -> anyhow::Result<Option<PortfolioSnapshot>> {
    let cash: Option<f64> = sqlx::query_scalar("SELECT cash FROM portfolios WHERE id = $1")
        .persistent(false)
        .bind(portfolio_id)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("select portfolio {portfolio_id} failed"))?;
    let Some(cash) = cash else {
        return Ok(None);
    };

    let rows: Vec<PositionRow> = sqlx::query_as(&format!(
        "SELECT {POSITION_COLUMNS} FROM portfolio_positions WHERE portfolio_id = $1 ORDER BY symbol"
    ))
    .persistent(false)
    .bind(portfolio_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("select positions for {portfolio_id} failed"))?;

    Ok(Some(PortfolioSnapshot {
        portfolio_id,
        cash,
        positions: rows.into_iter().map(from_row).collect(),
    }))
}

async fn lock_cash(tx: &mut Transaction<'_, Postgres>, portfolio_id: Uuid) -> anyhow::Result<f64> {
    let cash: Option<f64> =
        sqlx::query_scalar("SELECT cash FROM portfolios WHERE id = $1 FOR UPDATE")
            .persistent(false)
            .bind(portfolio_id)
            .fetch_optional(&mut **tx)
            .await
            .context("lock portfolio failed")?;
    cash.with_context(|| format!("portfolio {portfolio_id} not found"))
}

async fn lock_position(
    tx: &mut Transaction<'_, Postgres>,
    portfolio_id: Uuid,
    symbol: &str,
) -> anyhow::Result<Option<Position>> {
    let row: Option<PositionRow> = sqlx::query_as(&format!(
        "SELECT {POSITION_COLUMNS} FROM portfolio_positions \
         WHERE portfolio_id = $1 AND symbol = $2 FOR UPDATE"
    ))
    .persistent(false)
    .bind(portfolio_id)
    .bind(symbol)
    .fetch_optional(&mut **tx)
    .await
    .with_context(|| format!("lock position {symbol} failed"))?;
    Ok(row.map(from_row))
}

async fn write_position(tx: &mut Transaction<'_, Postgres>, p: &Position) -> anyhow::Result<()> {
    sqlx::query(&format!(
        "INSERT INTO portfolio_positions ({POSITION_COLUMNS}, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now()) \
         ON CONFLICT (portfolio_id, symbol) DO UPDATE SET \
           quantity = EXCLUDED.quantity, average_cost = EXCLUDED.average_cost, \
           current_price = EXCLUDED.current_price, market_value = EXCLUDED.market_value, \
           unrealized_pnl = EXCLUDED.unrealized_pnl, \
           unrealized_pnl_pct = EXCLUDED.unrealized_pnl_pct, \
           sector = COALESCE(EXCLUDED.sector, portfolio_positions.sector), updated_at = now()"
    ))
    .persistent(false)
    .bind(p.portfolio_id)
    .bind(&p.symbol)
    .bind(p.quantity)
    .bind(p.average_cost)
    .bind(p.current_price)
    .bind(p.market_value)
    .bind(p.unrealized_pnl)
    .bind(p.unrealized_pnl_pct)
    .bind(&p.sector)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("upsert position {} failed", p.symbol))?;
    Ok(())
}

async fn set_cash(tx: &mut Transaction<'_, Postgres>, portfolio_id: Uuid, cash: f64) -> anyhow::Result<()> {
    sqlx::query("UPDATE portfolios SET cash = $2 WHERE id = $1")
        .persistent(false)
        .bind(portfolio_id)
        .bind(cash)
        .execute(&mut **tx)
        .await
        .context("update portfolio cash failed")?;
    Ok(())
}

/// Opens or adds to a position and debits cash.
pub async fn record_buy(
    pool: &sqlx::PgPool,
    portfolio_id: Uuid,
    symbol: &str,
    quantity: f64,
    price: f64,
    sector: Option<String>,
) -> anyhow::Result<Position> {
    let symbol = symbol.trim().to_ascii_uppercase();
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let cash = lock_cash(&mut tx, portfolio_id).await?;
    let cost = quantity * price;
    anyhow::ensure!(
        cost <= cash,
        "buy of {quantity} {symbol} costs {cost:.2}, only {cash:.2} available"
    );

    let position = match lock_position(&mut tx, portfolio_id, &symbol).await? {
        Some(mut existing) => {
            existing.apply_buy(quantity, price)?;
            if existing.sector.is_none() {
                existing.sector = sector;
            }
            existing
        }
        None => Position::open(portfolio_id, symbol.clone(), quantity, price, sector)?,
    };
    write_position(&mut tx, &position).await?;
    set_cash(&mut tx, portfolio_id, cash - cost).await?;

    tx.commit().await.context("commit transaction failed")?;
    tracing::info!(%portfolio_id, symbol = %symbol, quantity, price, "buy recorded");
    Ok(position)
}

/// Reduces a position, credits proceeds and deletes the row once nothing is left. Returns
/// the realized P&L.
pub async fn record_sell(
    pool: &sqlx::PgPool,
    portfolio_id: Uuid,
    symbol: &str,
    quantity: f64,
    price: f64,
) -> anyhow::Result<f64> {
    let symbol = symbol.trim().to_ascii_uppercase();
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let cash = lock_cash(&mut tx, portfolio_id).await?;
    let mut position = lock_position(&mut tx, portfolio_id, &symbol)
        .await?
        .with_context(|| format!("no position in {symbol}"))?;
    let realized = position.apply_sell(quantity, price)?;

    if position.is_closed() {
        sqlx::query("DELETE FROM portfolio_positions WHERE portfolio_id = $1 AND symbol = $2")
            .persistent(false)
            .bind(portfolio_id)
            .bind(&symbol)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("delete position {symbol} failed"))?;
    } else {
        write_position(&mut tx, &position).await?;
    }
    set_cash(&mut tx, portfolio_id, cash + quantity * price).await?;

    tx.commit().await.context("commit transaction failed")?;
    tracing::info!(%portfolio_id, symbol = %symbol, quantity, price, realized, "sell recorded");
    Ok(realized)
}

/// Re-prices one position. Market value and P&L are recomputed from the locked row, never
/// from a stale copy.
pub async fn refresh_price(
    pool: &sqlx::PgPool,
    portfolio_id: Uuid,
    symbol: &str,
    price: f64,
) -> anyhow::Result<Option<Position>> {
    let symbol = symbol.trim().to_ascii_uppercase();
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let Some(mut position) = lock_position(&mut tx, portfolio_id, &symbol).await? else {
        return Ok(None);
    };
    position.refresh_price(price)?;
    write_position(&mut tx, &position).await?;

    tx.commit().await.context("commit transaction failed")?;
    Ok(Some(position))
}
