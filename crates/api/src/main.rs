use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use signaldesk_core::config::{EngineConfig, Settings};
use signaldesk_core::domain::portfolio::{PortfolioSnapshot, Position};
use signaldesk_core::domain::recommendation::AnalysisRecord;
use signaldesk_core::domain::risk::RiskAssessment;
use signaldesk_core::domain::trade::{TradeAction, TradeRecommendation, ValidationResult};
use signaldesk_core::engine::risk::RiskAssessor;
use signaldesk_core::engine::{AlertGate, DecisionEngine, HoldingsReport};
use signaldesk_core::ingest::provider::HttpJsonDataProvider;
use signaldesk_core::notify::LogChannel;
use signaldesk_core::storage;
use signaldesk_core::time::clock::SystemClock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let config = Arc::new(settings.load_engine_config()?);

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let engine = match build_engine(&settings, &config) {
        Ok(engine) => Some(Arc::new(engine)),
        Err(e) => {
            tracing::warn!(error = %e, "market data provider unavailable; sell-signal and risk routes disabled");
            None
        }
    };

    let state = AppState {
        pool,
        config,
        engine,
    };

    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/analyses/latest/:symbol", get(get_latest_analysis))
        .route("/analyses/date/:as_of_date", get(get_analyses_by_date))
        .route("/portfolios", post(create_portfolio))
        .route("/portfolios/:id/positions", get(get_positions))
        .route("/portfolios/:id/trades", post(record_trade))
        .route("/portfolios/:id/sell-signals", get(get_sell_signals))
        .route("/portfolios/:id/risk", get(get_risk))
        .route("/trades/validate", post(validate_trade))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Engine used for on-demand evaluation. Alerts are never delivered from the API, so the
/// notifier only logs.
fn build_engine(settings: &Settings, config: &EngineConfig) -> anyhow::Result<DecisionEngine> {
    let provider = Arc::new(HttpJsonDataProvider::from_settings(settings)?);
    let gate = Arc::new(AlertGate::new(
        config.alert.clone(),
        config.allocation.clone(),
        config.market.clone(),
        Arc::new(SystemClock),
    ));
    Ok(DecisionEngine::new(
        config.clone(),
        provider,
        gate,
        Arc::new(LogChannel),
    ))
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    pool: Option<PgPool>,
    config: Arc<EngineConfig>,
    engine: Option<Arc<DecisionEngine>>,
}

impl AppState {
    fn pool(&self) -> Result<&PgPool, StatusCode> {
        self.pool.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }

    fn engine(&self) -> Result<&DecisionEngine, StatusCode> {
        self.engine.as_deref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

fn internal(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %e, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn fetch_portfolio(pool: &PgPool, id: Uuid) -> Result<PortfolioSnapshot, StatusCode> {
    storage::positions::load_portfolio(pool, id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_latest_analysis(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<AnalysisRecord>, StatusCode> {
    let pool = state.pool()?;
    let record = storage::analyses::latest_analysis(pool, &symbol)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(record))
}

async fn get_analyses_by_date(
    State(state): State<AppState>,
    Path(as_of_date): Path<String>,
) -> Result<Json<Vec<AnalysisRecord>>, StatusCode> {
    let pool = state.pool()?;
    let as_of_date =
        NaiveDate::parse_from_str(&as_of_date, "%Y-%m-%d").map_err(|_| StatusCode::BAD_REQUEST)?;
    let records = storage::analyses::analyses_for_date(pool, as_of_date)
        .await
        .map_err(internal)?;
    Ok(Json(records))
}

#[derive(Debug, Deserialize)]
struct CreatePortfolio {
    name: String,
    cash: f64,
}

#[derive(Debug, Serialize)]
struct Created {
    id: Uuid,
}

async fn create_portfolio(
    State(state): State<AppState>,
    Json(body): Json<CreatePortfolio>,
) -> Result<(StatusCode, Json<Created>), StatusCode> {
    let pool = state.pool()?;
    if body.name.trim().is_empty() || !body.cash.is_finite() || body.cash < 0.0 {
        return Err(StatusCode::BAD_REQUEST);
    }
    let id = storage::positions::create_portfolio(pool, body.name.trim(), body.cash)
        .await
        .map_err(internal)?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

async fn get_positions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PortfolioSnapshot>, StatusCode> {
    let pool = state.pool()?;
    Ok(Json(fetch_portfolio(pool, id).await?))
}

#[derive(Debug, Deserialize)]
struct TradeFill {
    symbol: String,
    action: TradeAction,
    quantity: f64,
    price: f64,
    #[serde(default)]
    sector: Option<String>,
}

#[derive(Debug, Serialize)]
struct FillResult {
    position: Option<Position>,
    realized_pnl: Option<f64>,
}

/// Records an executed fill against the stored portfolio.
async fn record_trade(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(fill): Json<TradeFill>,
) -> Result<Json<FillResult>, StatusCode> {
    let pool = state.pool()?;
    if fill.symbol.trim().is_empty()
        || !(fill.quantity.is_finite() && fill.quantity > 0.0)
        || !(fill.price.is_finite() && fill.price > 0.0)
    {
        return Err(StatusCode::BAD_REQUEST);
    }

    let portfolio = fetch_portfolio(pool, id).await?;
    if let Some(reason) = fill_rejection(&portfolio, &fill) {
        tracing::warn!(portfolio_id = %id, symbol = %fill.symbol, reason, "fill rejected");
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let result = match fill.action {
        TradeAction::Buy => {
            let position = storage::positions::record_buy(
                pool,
                id,
                &fill.symbol,
                fill.quantity,
                fill.price,
                fill.sector.clone(),
            )
            .await
            .map_err(internal)?;
            FillResult {
                position: Some(position),
                realized_pnl: None,
            }
        }
        TradeAction::Sell => {
            let realized =
                storage::positions::record_sell(pool, id, &fill.symbol, fill.quantity, fill.price)
                    .await
                    .map_err(internal)?;
            let position = storage::positions::load_portfolio(pool, id)
                .await
                .map_err(internal)?
                .and_then(|p| p.position(&fill.symbol).cloned());
            FillResult {
                position,
                realized_pnl: Some(realized),
            }
        }
    };
    Ok(Json(result))
}

// Checked against the loaded snapshot so obvious overdrafts answer 422 instead of 500.
fn fill_rejection(portfolio: &PortfolioSnapshot, fill: &TradeFill) -> Option<&'static str> {
    match fill.action {
        TradeAction::Buy if fill.quantity * fill.price > portfolio.cash => Some("insufficient cash"),
        TradeAction::Sell => {
            let held = portfolio
                .position(&fill.symbol)
                .map(|p| p.quantity)
                .unwrap_or(0.0);
            (fill.quantity > held).then_some("sell exceeds held quantity")
        }
        TradeAction::Buy => None,
    }
}

async fn get_sell_signals(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<HoldingsReport>, StatusCode> {
    let engine = state.engine()?;
    let portfolio = fetch_portfolio(state.pool()?, id).await?;
    Ok(Json(engine.evaluate_holdings(&portfolio).await))
}

async fn get_risk(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RiskAssessment>, StatusCode> {
    let engine = state.engine()?;
    let portfolio = fetch_portfolio(state.pool()?, id).await?;
    Ok(Json(engine.assess_portfolio(&portfolio).await))
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    portfolio_id: Uuid,
    trade: TradeRecommendation,
}

/// Always answers 200 with the validation outcome; a failed check is data, not an error.
async fn validate_trade(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> Result<Json<ValidationResult>, StatusCode> {
    let portfolio = fetch_portfolio(state.pool()?, req.portfolio_id).await?;
    let open = state.config.market.is_open(Utc::now());
    let result = RiskAssessor::new(&state.config.risk).validate_trade(&req.trade, &portfolio, open);
    Ok(Json(result))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portfolio() -> PortfolioSnapshot {
        let id = Uuid::new_v4();
        PortfolioSnapshot {
            portfolio_id: id,
            cash: 1_000.0,
            positions: vec![Position::open(id, "AAPL", 10.0, 100.0, None).unwrap()],
        }
    }

    fn fill(action: TradeAction, symbol: &str, quantity: f64, price: f64) -> TradeFill {
        TradeFill {
            symbol: symbol.into(),
            action,
            quantity,
            price,
            sector: None,
        }
    }

    #[test]
    fn buys_beyond_cash_are_rejected() {
        let p = portfolio();
        assert_eq!(fill_rejection(&p, &fill(TradeAction::Buy, "MSFT", 5.0, 200.0)), None);
        assert_eq!(
            fill_rejection(&p, &fill(TradeAction::Buy, "MSFT", 6.0, 200.0)),
            Some("insufficient cash")
        );
    }

    #[test]
    fn sells_beyond_holding_are_rejected() {
        let p = portfolio();
        assert_eq!(fill_rejection(&p, &fill(TradeAction::Sell, "aapl", 10.0, 90.0)), None);
        assert_eq!(
            fill_rejection(&p, &fill(TradeAction::Sell, "AAPL", 11.0, 90.0)),
            Some("sell exceeds held quantity")
        );
        assert_eq!(
            fill_rejection(&p, &fill(TradeAction::Sell, "MSFT", 1.0, 90.0)),
            Some("sell exceeds held quantity")
        );
    }
}
