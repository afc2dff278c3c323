//! Scan orchestration: runs the decision chain symbol by symbol against the collaborators.
//!
//! Symbols are evaluated sequentially in caller order with a fixed delay between them. One
//! symbol failing never aborts the batch; it is logged and counted.

use crate::config::EngineConfig;
use crate::domain::alert::AlertDecision;
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::recommendation::AnalysisRecord;
use crate::domain::risk::{MarketStats, RiskAssessment};
use crate::domain::signals::SignalSet;
use crate::domain::trade::{SellRecommendation, TradeRecommendation, ValidationResult};
use crate::engine::alert_gate::{AlertCandidate, AlertGate};
use crate::engine::composite::CompositeScorer;
use crate::engine::normalizer;
use crate::engine::recommendation::RecommendationGenerator;
use crate::engine::risk::RiskAssessor;
use crate::engine::sell::SellSignalDetector;
use crate::engine::sizing::PositionSizer;
use crate::ingest::provider::MarketDataProvider;
use crate::ingest::types::{MarketSnapshot, PriceQuote};
use crate::llm::{InsightRequest, InsightService};
use crate::notify::{AlertMessage, NotificationChannel};
use crate::time::clock::{Clock, SystemClock};
use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Everything produced for one symbol in one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolAnalysis {
    pub signals: SignalSet,
    pub quote: PriceQuote,
    pub record: AnalysisRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProposedTrade {
    pub trade: TradeRecommendation,
    pub validation: ValidationResult,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub scanned: usize,
    pub succeeded: usize,
    pub no_data: usize,
    pub errored: usize,
    /// Symbols scored in Traditional mode although an Insight Service was configured.
    pub degraded: usize,
    pub alerts_sent: usize,
    pub alerts_suppressed: usize,
    pub alerts_failed: usize,
    pub analyses: Vec<AnalysisRecord>,
    pub trades: Vec<ProposedTrade>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HoldingsReport {
    pub evaluated: usize,
    pub no_data: usize,
    pub errored: usize,
    pub sell_recommendations: Vec<SellRecommendation>,
}

pub struct DecisionEngine {
    config: EngineConfig,
    provider: Arc<dyn MarketDataProvider>,
    scorer: CompositeScorer,
    gate: Arc<AlertGate>,
    notifier: Arc<dyn NotificationChannel>,
    clock: Arc<dyn Clock>,
}

impl DecisionEngine {
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn MarketDataProvider>,
        gate: Arc<AlertGate>,
        notifier: Arc<dyn NotificationChannel>,
    ) -> Self {
        let scorer = CompositeScorer::new(config.scoring.clone());
        Self {
            config,
            provider,
            scorer,
            gate,
            notifier,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_insight(mut self, insight: Arc<dyn InsightService>) -> Self {
        self.scorer = self.scorer.with_insight(insight);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gate(&self) -> &AlertGate {
        &self.gate
    }

    async fn bounded<T, F>(&self, what: &'static str, symbol: &str, fut: F) -> Result<Option<T>>
    where
        F: Future<Output = Result<Option<T>>>,
    {
        let secs = self.config.scan.market_data_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(secs), fut).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("{what} for {symbol} timed out after {secs}s")),
        }
    }

    /// Optional domains log and degrade to `None`; only the quote is required.
    async fn optional<T, F>(&self, what: &'static str, symbol: &str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<Option<T>>>,
    {
        match self.bounded(what, symbol, fut).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(symbol, what, error = %err, "market data unavailable; treating as neutral");
                None
            }
        }
    }

    pub async fn fetch_snapshot(&self, symbol: &str) -> Result<Option<MarketSnapshot>> {
        let quote = self
            .bounded("quote", symbol, self.provider.get_price(symbol))
            .await?;
        let Some(quote) = quote.filter(PriceQuote::is_usable) else {
            return Ok(None);
        };

        let technicals = self
            .optional("indicators", symbol, self.provider.get_technical_indicators(symbol))
            .await;
        let symbols = [symbol.to_string()];
        let sentiment = self
            .optional("sentiment", symbol, self.provider.get_sentiment(&symbols))
            .await;
        let fundamentals = self
            .optional("fundamentals", symbol, self.provider.get_fundamentals(symbol))
            .await;

        Ok(Some(MarketSnapshot {
            quote,
            technicals,
            sentiment,
            fundamentals,
        }))
    }

    /// `Ok(None)` means the symbol has no usable price ("no data"), distinct from an error.
    pub async fn analyze_symbol(&self, symbol: &str) -> Result<Option<SymbolAnalysis>> {
        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Ok(None);
        }
        let Some(snapshot) = self.fetch_snapshot(&symbol).await? else {
            tracing::info!(symbol = %symbol, "no market data");
            return Ok(None);
        };

        let signals = normalizer::normalize(&snapshot);
        let request = InsightRequest {
            symbol: symbol.clone(),
            signals: signals.clone(),
            quote: Some(snapshot.quote.clone()),
            financials: snapshot.fundamentals.clone(),
            news: snapshot.sentiment.clone(),
            technicals: snapshot.technicals.clone(),
        };
        let composite = self.scorer.evaluate(request).await;
        let recommendation =
            RecommendationGenerator::new(&self.config.recommendation).generate(&composite, &signals);

        let now = self.clock.now();
        tracing::info!(
            symbol = %symbol,
            method = composite.method().as_str(),
            composite = composite.composite_score,
            confidence = composite.confidence,
            rating = %composite.rating,
            "symbol analyzed"
        );

        Ok(Some(SymbolAnalysis {
            signals,
            quote: snapshot.quote,
            record: AnalysisRecord {
                as_of_date: self.config.market.local_date(now),
                generated_at: now,
                composite,
                recommendation,
            },
        }))
    }

    pub async fn run_scan(
        &self,
        symbols: &[String],
        portfolio: Option<&PortfolioSnapshot>,
    ) -> ScanReport {
        let mut report = ScanReport::default();
        let delay = Duration::from_millis(self.config.scan.symbol_delay_ms);
        let sizer = PositionSizer::new(&self.config.sizing, &self.config.risk);
        let mut sized = Vec::new();

        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            report.scanned += 1;

            let analysis = match self.analyze_symbol(symbol).await {
                Ok(Some(a)) => a,
                Ok(None) => {
                    report.no_data += 1;
                    continue;
                }
                Err(err) => {
                    tracing::error!(symbol = %symbol, error = %err, "analysis failed");
                    report.errored += 1;
                    continue;
                }
            };
            report.succeeded += 1;
            if self.scorer.has_insight() && analysis.record.composite.is_degraded() {
                report.degraded += 1;
            }

            let decision = self
                .gate
                .evaluate(AlertCandidate {
                    symbol: &analysis.record.composite.symbol,
                    recommendation: Some(&analysis.record.recommendation),
                    portfolio,
                })
                .await;
            self.dispatch(&analysis, &decision, &mut report).await;

            if let Some(portfolio) = portfolio {
                let held = portfolio
                    .position(&analysis.record.composite.symbol)
                    .map(|p| p.quantity)
                    .unwrap_or(0.0);
                if let Some(trade) = sizer.size(
                    &analysis.record.composite,
                    analysis.quote.current,
                    portfolio.total_value(),
                    held,
                ) {
                    sized.push(trade);
                }
            }

            report.analyses.push(analysis.record);
        }

        if let Some(portfolio) = portfolio {
            let accepted = sizer.fit_to_budget(sized, portfolio.total_value());
            report.trades = accepted
                .into_iter()
                .map(|trade| {
                    let validation = self.validate_trade(&trade, portfolio);
                    ProposedTrade { trade, validation }
                })
                .collect();
        }

        tracing::info!(
            scanned = report.scanned,
            succeeded = report.succeeded,
            no_data = report.no_data,
            errored = report.errored,
            degraded = report.degraded,
            alerts_sent = report.alerts_sent,
            "scan finished"
        );
        report
    }

    async fn dispatch(
        &self,
        analysis: &SymbolAnalysis,
        decision: &AlertDecision,
        report: &mut ScanReport,
    ) {
        let alert_type = match decision.alert_type {
            Some(t) if decision.should_trigger => t,
            _ => {
                report.alerts_suppressed += 1;
                return;
            }
        };

        let symbol = &analysis.record.composite.symbol;
        let message = AlertMessage::from_recommendation(
            alert_type,
            &analysis.record.recommendation,
            decision.allocation_pct,
        );
        if self.notifier.send(&message).await {
            self.gate.record_alert_sent(symbol).await;
            report.alerts_sent += 1;
        } else {
            tracing::warn!(symbol = %symbol, channel = self.notifier.channel_name(), "alert not delivered");
            self.gate.release(symbol).await;
            report.alerts_failed += 1;
        }
    }

    /// Re-scores each held symbol and runs the sell detector against freshly priced
    /// positions. Concentration is measured against the re-priced portfolio total.
    pub async fn evaluate_holdings(&self, portfolio: &PortfolioSnapshot) -> HoldingsReport {
        let mut report = HoldingsReport::default();
        let delay = Duration::from_millis(self.config.scan.symbol_delay_ms);
        let mut priced = portfolio.clone();
        let mut analyzed = Vec::new();

        let held: Vec<usize> = (0..priced.positions.len())
            .filter(|&i| !priced.positions[i].is_closed())
            .collect();
        for (n, idx) in held.into_iter().enumerate() {
            if n > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            report.evaluated += 1;

            let position = &mut priced.positions[idx];
            let analysis = match self.analyze_symbol(&position.symbol).await {
                Ok(Some(a)) => a,
                Ok(None) => {
                    report.no_data += 1;
                    continue;
                }
                Err(err) => {
                    tracing::error!(symbol = %position.symbol, error = %err, "holding analysis failed");
                    report.errored += 1;
                    continue;
                }
            };

            if let Err(err) = position.refresh_price(analysis.quote.current) {
                tracing::warn!(symbol = %position.symbol, error = %err, "keeping stored price");
            }
            analyzed.push((idx, analysis));
        }

        let total = priced.total_value();
        let detector = SellSignalDetector::new(&self.config.sell);
        for (idx, analysis) in analyzed {
            if let Some(rec) = detector.evaluate(
                &priced.positions[idx],
                &analysis.record.composite,
                analysis.signals.trend,
                total,
            ) {
                report.sell_recommendations.push(rec);
            }
        }

        report
            .sell_recommendations
            .sort_by(|a, b| b.sell_score.total_cmp(&a.sell_score));
        report
    }

    /// Pulls per-holding market stats and assesses portfolio risk. Symbols whose data cannot
    /// be fetched are left out; if none can, the assessor falls back to its default.
    pub async fn assess_portfolio(&self, portfolio: &PortfolioSnapshot) -> RiskAssessment {
        let mut stats = HashMap::new();
        for position in portfolio.positions.iter().filter(|p| !p.is_closed()) {
            let symbol = position.symbol.to_ascii_uppercase();
            let quote = self
                .optional("quote", &symbol, self.provider.get_price(&symbol))
                .await;
            let technicals = self
                .optional("indicators", &symbol, self.provider.get_technical_indicators(&symbol))
                .await;
            if quote.is_none() && technicals.is_none() {
                continue;
            }
            stats.insert(
                symbol,
                MarketStats {
                    change_pct: quote.as_ref().and_then(|q| q.change_pct),
                    volatility: technicals.as_ref().and_then(|t| t.volatility),
                    volume: quote.as_ref().and_then(|q| q.volume),
                },
            );
        }
        RiskAssessor::new(&self.config.risk).assess(portfolio, &stats)
    }

    pub fn validate_trade(
        &self,
        trade: &TradeRecommendation,
        portfolio: &PortfolioSnapshot,
    ) -> ValidationResult {
        let open = self.config.market.is_open(self.clock.now());
        RiskAssessor::new(&self.config.risk).validate_trade(trade, portfolio, open)
    }
}
