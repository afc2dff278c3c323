use chrono::{TimeZone, Utc};
use signaldesk_core::config::EngineConfig;
use signaldesk_core::domain::composite::ScoringMethod;
use signaldesk_core::domain::portfolio::{PortfolioSnapshot, Position};
use signaldesk_core::domain::rating::Rating;
use signaldesk_core::domain::trade::{SellAction, SellSignalKind, TradeAction};
use signaldesk_core::engine::{AlertGate, DecisionEngine};
use signaldesk_core::ingest::provider::MarketDataProvider;
use signaldesk_core::ingest::types::{
    FundamentalInputs, PriceQuote, SentimentSnapshot, TechnicalIndicators,
};
use signaldesk_core::llm::{InsightFailure, InsightOutput, InsightRequest, InsightService, Provider};
use signaldesk_core::notify::{AlertMessage, NotificationChannel};
use signaldesk_core::time::clock::ManualClock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

fn quote(symbol: &str, current: f64) -> PriceQuote {
    PriceQuote {
        symbol: symbol.to_string(),
        current,
        open: None,
        high: None,
        low: None,
        volume: Some(2_000_000.0),
        previous_close: None,
        change_pct: Some(0.8),
        as_of: None,
    }
}

/// Canned market data:
/// - STRONG / ALPHA: excellent fundamentals, uptrend, low volatility
/// - WEAK: poor fundamentals, downtrend, high volatility and leverage
/// - EMPTY: no quote
/// - BROKEN: transport failure on the quote
struct CannedMarket;

#[async_trait::async_trait]
impl MarketDataProvider for CannedMarket {
    fn provider_name(&self) -> &'static str {
        "canned"
    }

    async fn get_price(&self, symbol: &str) -> anyhow::Result<Option<PriceQuote>> {
        match symbol {
            "STRONG" | "ALPHA" | "WEAK" => Ok(Some(quote(symbol, 100.0))),
            "BROKEN" => anyhow::bail!("connection refused"),
            _ => Ok(None),
        }
    }

    async fn get_technical_indicators(
        &self,
        symbol: &str,
    ) -> anyhow::Result<Option<TechnicalIndicators>> {
        Ok(match symbol {
            "STRONG" | "ALPHA" => Some(TechnicalIndicators {
                rsi: Some(60.0),
                macd: Some(1.2),
                macd_signal: Some(0.8),
                sma20: Some(95.0),
                sma50: Some(90.0),
                sma200: Some(80.0),
                volatility: Some(0.10),
            }),
            "WEAK" => Some(TechnicalIndicators {
                rsi: Some(25.0),
                macd: Some(-1.0),
                macd_signal: Some(0.5),
                sma20: Some(110.0),
                sma50: Some(120.0),
                sma200: Some(130.0),
                volatility: Some(0.45),
            }),
            _ => None,
        })
    }

    async fn get_sentiment(&self, symbols: &[String]) -> anyhow::Result<Option<SentimentSnapshot>> {
        let overall = match symbols.first().map(String::as_str) {
            Some("STRONG") | Some("ALPHA") => 1.0,
            Some("WEAK") => -0.9,
            _ => return Ok(None),
        };
        Ok(Some(SentimentSnapshot {
            overall,
            news: None,
            confidence: Some(0.8),
            themes: Vec::new(),
        }))
    }

    async fn get_fundamentals(&self, symbol: &str) -> anyhow::Result<Option<FundamentalInputs>> {
        Ok(match symbol {
            "STRONG" | "ALPHA" => Some(FundamentalInputs {
                roe_pct: Some(30.0),
                profit_margin_pct: Some(30.0),
                revenue_growth_pct: Some(40.0),
                pe_ratio: Some(10.0),
                debt_to_equity: Some(0.0),
                sector: Some("Technology".into()),
            }),
            "WEAK" => Some(FundamentalInputs {
                roe_pct: Some(0.0),
                profit_margin_pct: Some(0.0),
                revenue_growth_pct: Some(-10.0),
                pe_ratio: Some(-5.0),
                debt_to_equity: Some(3.0),
                sector: Some("Retail".into()),
            }),
            _ => None,
        })
    }
}

/// Answers for ALPHA only; every other symbol is "unavailable".
struct SelectiveInsight;

#[async_trait::async_trait]
impl InsightService for SelectiveInsight {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn analyze(&self, request: &InsightRequest) -> Result<InsightOutput, InsightFailure> {
        if request.symbol != "ALPHA" {
            return Err(InsightFailure::Unavailable("quota exhausted".into()));
        }
        Ok(InsightOutput {
            overall_score: 85.0,
            confidence: 80.0,
            thesis: "Compounding margins".into(),
            strengths: vec!["Pricing power".into()],
            risks: vec!["Valuation".into()],
            time_horizon: Some("2-4 years".into()),
            position_size_hint_pct: None,
            risk_adjusted_score: None,
        })
    }
}

#[derive(Default)]
struct RecordingChannel {
    fail: AtomicBool,
    sent: Mutex<Vec<AlertMessage>>,
}

impl RecordingChannel {
    fn sent_symbols(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.symbol.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl NotificationChannel for RecordingChannel {
    fn channel_name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, message: &AlertMessage) -> bool {
        if self.fail.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().unwrap().push(message.clone());
        true
    }
}

fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.scan.symbol_delay_ms = 0;
    config.alert.market_hours_only = false;
    config
}

struct Harness {
    engine: DecisionEngine,
    channel: Arc<RecordingChannel>,
    clock: Arc<ManualClock>,
}

fn harness(with_insight: bool) -> Harness {
    let config = test_config();
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap()));
    let channel = Arc::new(RecordingChannel::default());
    let gate = Arc::new(AlertGate::new(
        config.alert.clone(),
        config.allocation.clone(),
        config.market.clone(),
        clock.clone(),
    ));

    let mut engine = DecisionEngine::new(config, Arc::new(CannedMarket), gate, channel.clone())
        .with_clock(clock.clone());
    if with_insight {
        engine = engine.with_insight(Arc::new(SelectiveInsight));
    }
    Harness {
        engine,
        channel,
        clock,
    }
}

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn scan_counts_outcomes_and_alerts_accepted_symbols() {
    let h = harness(false);

    let report = h
        .engine
        .run_scan(&symbols(&["strong", "EMPTY", "BROKEN"]), None)
        .await;

    assert_eq!(report.scanned, 3);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.no_data, 1);
    assert_eq!(report.errored, 1);
    assert_eq!(report.degraded, 0);
    assert_eq!(report.alerts_sent, 1);
    assert!(report.trades.is_empty());

    let record = &report.analyses[0];
    assert_eq!(record.composite.symbol, "STRONG");
    assert_eq!(record.composite.rating, Rating::StrongBuy);
    assert_eq!(record.composite.method(), ScoringMethod::Traditional);
    assert!(record.recommendation.suggested_allocation_pct <= 10.0);

    assert_eq!(h.channel.sent_symbols(), vec!["STRONG"]);
    assert_eq!(h.engine.gate().state().await.daily_alert_count, 1);
}

#[tokio::test]
async fn repeated_alert_waits_for_cooldown() {
    let h = harness(false);
    let list = symbols(&["STRONG"]);

    assert_eq!(h.engine.run_scan(&list, None).await.alerts_sent, 1);

    let second = h.engine.run_scan(&list, None).await;
    assert_eq!(second.alerts_sent, 0);
    assert_eq!(second.alerts_suppressed, 1);

    h.clock.advance(chrono::Duration::hours(5));
    assert_eq!(h.engine.run_scan(&list, None).await.alerts_sent, 1);
    assert_eq!(h.channel.sent_symbols().len(), 2);
}

#[tokio::test]
async fn failed_delivery_is_not_recorded_by_the_gate() {
    let h = harness(false);
    h.channel.fail.store(true, Ordering::SeqCst);

    let report = h.engine.run_scan(&symbols(&["STRONG"]), None).await;
    assert_eq!(report.alerts_failed, 1);
    assert_eq!(report.alerts_sent, 0);

    let state = h.engine.gate().state().await;
    assert_eq!(state.daily_alert_count, 0);
    assert!(state.last_alert_time_per_symbol.is_empty());

    // Nothing was stamped, so a retry goes straight through.
    h.channel.fail.store(false, Ordering::SeqCst);
    assert_eq!(h.engine.run_scan(&symbols(&["STRONG"]), None).await.alerts_sent, 1);
}

#[tokio::test]
async fn insight_failure_degrades_only_that_symbol() {
    let h = harness(true);

    let report = h
        .engine
        .run_scan(&symbols(&["ALPHA", "STRONG"]), None)
        .await;
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.degraded, 1);

    let alpha = &report.analyses[0].composite;
    assert_eq!(alpha.method(), ScoringMethod::InsightEnhanced);
    assert!(alpha.fallback_reason.is_none());

    let strong = &report.analyses[1].composite;
    assert_eq!(strong.method(), ScoringMethod::Traditional);
    assert!(strong
        .fallback_reason
        .as_deref()
        .is_some_and(|r| r.contains("quota exhausted")));
}

#[tokio::test]
async fn scan_with_portfolio_proposes_validated_trades() {
    let h = harness(false);
    let portfolio = PortfolioSnapshot {
        portfolio_id: Uuid::new_v4(),
        cash: 100_000.0,
        positions: Vec::new(),
    };

    let report = h
        .engine
        .run_scan(&symbols(&["STRONG", "EMPTY"]), Some(&portfolio))
        .await;

    assert_eq!(report.trades.len(), 1);
    let proposed = &report.trades[0];
    assert_eq!(proposed.trade.symbol, "STRONG");
    assert_eq!(proposed.trade.action, TradeAction::Buy);
    assert!(proposed.trade.quantity >= 1.0);
    assert!(proposed.trade.estimated_cost() <= portfolio.cash);
    assert!(proposed.validation.is_valid, "{:?}", proposed.validation.errors);
}

#[tokio::test]
async fn holdings_review_flags_losing_downtrend_position() {
    let h = harness(false);
    let id = Uuid::new_v4();
    let portfolio = PortfolioSnapshot {
        portfolio_id: id,
        cash: 10_000.0,
        positions: vec![
            Position::open(id, "WEAK", 100.0, 130.0, Some("Retail".into())).unwrap(),
            Position::open(id, "STRONG", 50.0, 100.0, Some("Technology".into())).unwrap(),
            Position::open(id, "EMPTY", 10.0, 20.0, None).unwrap(),
        ],
    };

    let report = h.engine.evaluate_holdings(&portfolio).await;
    assert_eq!(report.evaluated, 3);
    assert_eq!(report.no_data, 1);
    assert_eq!(report.errored, 0);
    assert_eq!(report.sell_recommendations.len(), 1);

    let rec = &report.sell_recommendations[0];
    assert_eq!(rec.symbol, "WEAK");
    assert_eq!(rec.suggested_action, SellAction::StrongSell);
    // Re-priced from 130 to the live 100 before the checks ran.
    assert!((rec.position.current_price - 100.0).abs() < 1e-9);
    let kinds: Vec<SellSignalKind> = rec.sell_signals.iter().map(|s| s.kind).collect();
    assert!(kinds.contains(&SellSignalKind::NegativeRating));
    assert!(kinds.contains(&SellSignalKind::StopLoss));
    assert!(kinds.contains(&SellSignalKind::BearishTrend));
    assert!(rec.suggested_quantity >= 1.0 && rec.suggested_quantity <= 100.0);
}

#[tokio::test]
async fn holdings_concentration_uses_repriced_total() {
    let h = harness(false);
    let id = Uuid::new_v4();
    // Both holdings were bought at 100 and the stored prices lag at 50; the market is at 100.
    let stale = |symbol: &str, qty: f64| {
        let mut p = Position::open(id, symbol, qty, 100.0, None).unwrap();
        p.refresh_price(50.0).unwrap();
        p
    };
    let portfolio = PortfolioSnapshot {
        portfolio_id: id,
        cash: 4_000.0,
        positions: vec![stale("WEAK", 20.0), stale("ALPHA", 100.0)],
    };
    // Against the stale 10k total WEAK's fresh 2k would read as 20%.
    assert!((portfolio.total_value() - 10_000.0).abs() < 1e-9);

    let report = h.engine.evaluate_holdings(&portfolio).await;
    assert_eq!(report.sell_recommendations.len(), 1);

    let rec = &report.sell_recommendations[0];
    assert_eq!(rec.symbol, "WEAK");
    assert!((rec.position.market_value - 2_000.0).abs() < 1e-9);
    // 2k of a re-priced 16k total is 12.5%, under the concentration line.
    let kinds: Vec<SellSignalKind> = rec.sell_signals.iter().map(|s| s.kind).collect();
    assert!(!kinds.contains(&SellSignalKind::Concentration), "{kinds:?}");
    assert!(!kinds.contains(&SellSignalKind::StopLoss));
}

#[tokio::test]
async fn portfolio_risk_uses_live_stats() {
    let h = harness(false);
    let id = Uuid::new_v4();
    let portfolio = PortfolioSnapshot {
        portfolio_id: id,
        cash: 5_000.0,
        positions: vec![Position::open(id, "STRONG", 50.0, 100.0, None).unwrap()],
    };

    let assessment = h.engine.assess_portfolio(&portfolio).await;
    assert!(!assessment.is_default);
    assert!((0.0..=1.0).contains(&assessment.risk_score));

    let empty = PortfolioSnapshot {
        portfolio_id: id,
        cash: 0.0,
        positions: Vec::new(),
    };
    assert!(h.engine.assess_portfolio(&empty).await.is_default);
}
