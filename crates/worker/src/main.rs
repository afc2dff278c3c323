use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use signaldesk_core::config::{EngineConfig, Settings};
use signaldesk_core::domain::portfolio::PortfolioSnapshot;
use signaldesk_core::engine::{AlertGate, DecisionEngine};
use signaldesk_core::ingest::provider::{HttpJsonDataProvider, MarketDataProvider};
use signaldesk_core::llm::anthropic::AnthropicClient;
use signaldesk_core::notify::{LogChannel, NotificationChannel, WebhookChannel};
use signaldesk_core::storage;
use signaldesk_core::storage::alert_log::PgAlertLog;
use signaldesk_core::storage::scan_runs::RunStatus;
use signaldesk_core::time::clock::SystemClock;
use signaldesk_core::venue::http::HttpExecutionVenue;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod refresh;
mod symbols;

#[derive(Debug, Parser)]
#[command(name = "signaldesk_worker")]
struct Args {
    /// Market as-of date (YYYY-MM-DD). Defaults to the last completed session.
    #[arg(long, global = true)]
    as_of_date: Option<String>,

    /// Skip database writes and log alerts instead of delivering them.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze symbols, dispatch alerts and persist the analyses.
    Scan {
        /// Symbols to scan (comma or space separated). Falls back to SCAN_SYMBOLS.
        symbols: Vec<String>,

        /// File with one symbol per line.
        #[arg(long)]
        symbols_file: Option<PathBuf>,

        #[command(flatten)]
        portfolio: PortfolioArgs,
    },
    /// Evaluate held positions for exit signals.
    SellCheck {
        #[command(flatten)]
        portfolio: PortfolioArgs,
    },
    /// Assess portfolio risk.
    Risk {
        #[command(flatten)]
        portfolio: PortfolioArgs,
    },
    /// Re-price every open position of a stored portfolio.
    RefreshPrices {
        #[arg(long)]
        portfolio_id: Uuid,
    },
}

impl Command {
    fn kind(&self) -> &'static str {
        match self {
            Command::Scan { .. } => "scan",
            Command::SellCheck { .. } => "sell-check",
            Command::Risk { .. } => "risk",
            Command::RefreshPrices { .. } => "refresh-prices",
        }
    }

    fn reads_database(&self) -> bool {
        match self {
            Command::Scan { portfolio, .. }
            | Command::SellCheck { portfolio }
            | Command::Risk { portfolio } => portfolio.portfolio_id.is_some() && !portfolio.from_venue,
            Command::RefreshPrices { .. } => true,
        }
    }
}

#[derive(Debug, Clone, clap::Args)]
struct PortfolioArgs {
    /// Stored portfolio to evaluate against.
    #[arg(long)]
    portfolio_id: Option<Uuid>,

    /// Read holdings and cash from the execution venue instead of the database.
    #[arg(long)]
    from_venue: bool,
}

struct RunContext<'a> {
    settings: &'a Settings,
    config: EngineConfig,
    pool: Option<&'a sqlx::PgPool>,
    dry_run: bool,
}

struct Outcome {
    status: RunStatus,
    summary: serde_json::Value,
}

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

    let args = Args::parse();
    let config = settings.load_engine_config()?;
    let as_of_date = config
        .market
        .resolve_as_of_date(args.as_of_date.as_deref(), Utc::now())?;
    let kind = args.command.kind();

    let pool = if !args.dry_run || args.command.reads_database() {
        let db_url = settings.require_database_url()?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .context("connect DATABASE_URL failed")?;
        storage::migrate(&pool).await?;
        Some(pool)
    } else {
        None
    };

    let locked = match (&pool, args.dry_run) {
        (Some(pool), false) => {
            if !storage::lock::try_acquire_job_lock(pool, kind, as_of_date).await? {
                tracing::warn!(job = kind, %as_of_date, "job lock not acquired; another run in progress");
                return Ok(());
            }
            true
        }
        _ => false,
    };

    let started_at = Utc::now();
    let ctx = RunContext {
        settings: &settings,
        config,
        pool: pool.as_ref(),
        dry_run: args.dry_run,
    };
    let result = run(&args.command, ctx).await;

    if let (Some(pool), false) = (&pool, args.dry_run) {
        let (status, error, summary) = match &result {
            Ok(outcome) => (outcome.status, None, Some(outcome.summary.clone())),
            Err(err) => (RunStatus::Error, Some(format!("{:#}", err)), None),
        };
        match storage::scan_runs::record_run(
            pool,
            as_of_date,
            started_at,
            kind,
            status,
            error.as_deref(),
            summary,
        )
        .await
        {
            Ok(run_id) => tracing::info!(job = kind, %as_of_date, %run_id, status = status.as_str(), "run recorded"),
            Err(err) => {
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(job = kind, error = %err, "failed to record run");
            }
        }
    }

    if locked {
        if let Some(pool) = &pool {
            let _ = storage::lock::release_job_lock(pool, kind, as_of_date).await;
        }
    }

    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(job = kind, %as_of_date, error = %err, "run failed");
    }
    result.map(|_| ())
}

async fn run(command: &Command, ctx: RunContext<'_>) -> anyhow::Result<Outcome> {
    match command {
        Command::Scan {
            symbols,
            symbols_file,
            portfolio,
        } => {
            let list = symbols::resolve_symbols(
                symbols,
                symbols_file.as_deref(),
                &symbols::SymbolOptions::from_env(),
            )?;
            run_scan(&ctx, &list, portfolio).await
        }
        Command::SellCheck { portfolio } => run_sell_check(&ctx, portfolio).await,
        Command::Risk { portfolio } => run_risk(&ctx, portfolio).await,
        Command::RefreshPrices { portfolio_id } => run_refresh(&ctx, *portfolio_id).await,
    }
}

async fn run_scan(
    ctx: &RunContext<'_>,
    symbols: &[String],
    portfolio_args: &PortfolioArgs,
) -> anyhow::Result<Outcome> {
    let portfolio = load_portfolio(ctx, portfolio_args).await?;
    let engine = build_engine(ctx).await?;
    tracing::info!(symbols = symbols.len(), portfolio = portfolio.is_some(), "scan starting");

    let report = engine.run_scan(symbols, portfolio.as_ref()).await;

    for proposed in &report.trades {
        tracing::info!(
            symbol = %proposed.trade.symbol,
            action = ?proposed.trade.action,
            quantity = proposed.trade.quantity,
            valid = proposed.validation.is_valid,
            score = proposed.validation.validation_score,
            "trade proposed"
        );
    }

    match (ctx.pool, ctx.dry_run) {
        (Some(pool), false) => {
            let affected = storage::analyses::persist_analyses(pool, &report.analyses).await?;
            tracing::info!(affected, "analyses persisted");
        }
        _ => tracing::info!(analyses = report.analyses.len(), dry_run = ctx.dry_run, "analyses not persisted"),
    }

    let status = if report.errored == 0 {
        RunStatus::Success
    } else if report.succeeded > 0 {
        RunStatus::Partial
    } else {
        RunStatus::Error
    };

    Ok(Outcome {
        status,
        summary: json!({
            "scanned": report.scanned,
            "succeeded": report.succeeded,
            "no_data": report.no_data,
            "errored": report.errored,
            "degraded": report.degraded,
            "alerts_sent": report.alerts_sent,
            "alerts_suppressed": report.alerts_suppressed,
            "alerts_failed": report.alerts_failed,
            "trades": report.trades,
        }),
    })
}

async fn run_sell_check(ctx: &RunContext<'_>, portfolio_args: &PortfolioArgs) -> anyhow::Result<Outcome> {
    let portfolio = require_portfolio(ctx, portfolio_args).await?;
    let engine = build_engine(ctx).await?;

    let report = engine.evaluate_holdings(&portfolio).await;
    for rec in &report.sell_recommendations {
        tracing::info!(
            symbol = %rec.symbol,
            action = %rec.suggested_action,
            sell_score = rec.sell_score,
            quantity = rec.suggested_quantity,
            signals = rec.sell_signals.len(),
            "sell signal"
        );
    }

    let status = if report.errored == 0 {
        RunStatus::Success
    } else {
        RunStatus::Partial
    };
    Ok(Outcome {
        status,
        summary: json!({
            "evaluated": report.evaluated,
            "no_data": report.no_data,
            "errored": report.errored,
            "sell_recommendations": report.sell_recommendations,
        }),
    })
}

async fn run_risk(ctx: &RunContext<'_>, portfolio_args: &PortfolioArgs) -> anyhow::Result<Outcome> {
    let portfolio = require_portfolio(ctx, portfolio_args).await?;
    let engine = build_engine(ctx).await?;

    let assessment = engine.assess_portfolio(&portfolio).await;
    tracing::info!(
        overall = %assessment.overall_risk,
        score = assessment.risk_score,
        is_default = assessment.is_default,
        warnings = assessment.warnings.len(),
        "risk assessed"
    );
    for warning in &assessment.warnings {
        tracing::warn!(warning = %warning, "risk warning");
    }

    let status = if assessment.is_default {
        RunStatus::Partial
    } else {
        RunStatus::Success
    };
    Ok(Outcome {
        status,
        summary: serde_json::to_value(&assessment).context("serialize risk assessment failed")?,
    })
}

async fn run_refresh(ctx: &RunContext<'_>, portfolio_id: Uuid) -> anyhow::Result<Outcome> {
    let pool = ctx.pool.context("database required to refresh prices")?;
    let portfolio = storage::positions::load_portfolio(pool, portfolio_id)
        .await?
        .with_context(|| format!("portfolio {portfolio_id} not found"))?;
    let provider = HttpJsonDataProvider::from_settings(ctx.settings)?;

    let summary = refresh::refresh_portfolio_prices(pool, &provider, &portfolio, ctx.dry_run).await?;
    tracing::info!(
        %portfolio_id,
        requested = summary.requested,
        refreshed = summary.refreshed,
        missing = summary.missing.len(),
        failed = summary.failed.len(),
        "prices refreshed"
    );

    let status = if summary.failed.is_empty() {
        RunStatus::Success
    } else {
        RunStatus::Partial
    };
    Ok(Outcome {
        status,
        summary: summary.to_json(),
    })
}

async fn build_engine(ctx: &RunContext<'_>) -> anyhow::Result<DecisionEngine> {
    let settings = ctx.settings;
    let config = ctx.config.clone();

    let provider: Arc<dyn MarketDataProvider> = Arc::new(HttpJsonDataProvider::from_settings(settings)?);
    let notifier: Arc<dyn NotificationChannel> = match (&settings.notify_webhook_url, ctx.dry_run) {
        (Some(_), false) => Arc::new(WebhookChannel::from_settings(settings)?),
        _ => Arc::new(LogChannel),
    };
    let mut gate = AlertGate::new(
        config.alert.clone(),
        config.allocation.clone(),
        config.market.clone(),
        Arc::new(SystemClock),
    );
    // Each run is a fresh process; the daily cap and cooldowns live in alert_log.
    if let (Some(pool), false) = (ctx.pool, ctx.dry_run) {
        gate = gate.with_log(Arc::new(PgAlertLog::new(pool.clone())));
        let restored = gate.restore().await.context("restore alert gate failed")?;
        tracing::debug!(restored, "alert gate loaded from alert_log");
    }
    let gate = Arc::new(gate);

    let engine = DecisionEngine::new(config, provider, gate, notifier);
    if settings.anthropic_api_key.is_none() {
        tracing::info!("ANTHROPIC_API_KEY not set; scoring in traditional mode");
        return Ok(engine);
    }
    let insight = AnthropicClient::from_settings(settings)?;
    Ok(engine.with_insight(Arc::new(insight)))
}

async fn load_portfolio(
    ctx: &RunContext<'_>,
    args: &PortfolioArgs,
) -> anyhow::Result<Option<PortfolioSnapshot>> {
    if args.from_venue {
        let venue = HttpExecutionVenue::from_settings(ctx.settings)?;
        let id = args.portfolio_id.unwrap_or_else(Uuid::nil);
        let snapshot = signaldesk_core::venue::portfolio_snapshot(&venue, id).await?;
        return Ok(Some(snapshot));
    }

    let Some(id) = args.portfolio_id else {
        return Ok(None);
    };
    let pool = ctx.pool.context("database required to load a portfolio")?;
    let snapshot = storage::positions::load_portfolio(pool, id)
        .await?
        .with_context(|| format!("portfolio {id} not found"))?;
    Ok(Some(snapshot))
}

async fn require_portfolio(ctx: &RunContext<'_>, args: &PortfolioArgs) -> anyhow::Result<PortfolioSnapshot> {
    load_portfolio(ctx, args)
        .await?
        .context("--portfolio-id or --from-venue is required")
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
