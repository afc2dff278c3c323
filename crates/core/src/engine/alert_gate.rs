//! Alert Gate: the stateful policy deciding whether a recommendation becomes an outbound
//! notification.
//!
//! One gate is shared by every scan in a process. Its state sits behind an async mutex so
//! a manual scan and a scheduled scan cannot lose counter updates. An accepted evaluation
//! reserves its slot under that same lock; the caller then either confirms delivery with
//! `record_alert_sent` or hands the slot back with `release`.
//!
//! With an [`AlertLog`] attached, confirmed alerts are appended to it and `restore` rebuilds
//! today's counters from it, so one-shot worker runs share the daily cap and cooldowns.

use crate::config::{AlertConfig, AllocationConfig};
use crate::domain::alert::{AlertDecision, AlertRejection, AlertType};
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::rating::Rating;
use crate::domain::recommendation::Recommendation;
use crate::engine::allocation::{AllocationAction, AllocationChecker};
use crate::time::clock::Clock;
use crate::time::market_hours::MarketCalendar;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertGateState {
    pub daily_alert_count: u32,
    pub last_alert_time_per_symbol: HashMap<String, DateTime<Utc>>,
    /// Market-local date of the last reset.
    pub last_reset_date: Option<NaiveDate>,
    /// Accepted alerts whose delivery is not settled yet. They hold a slot of the daily cap
    /// and block their symbol.
    pub pending: HashMap<String, DateTime<Utc>>,
}

impl AlertGateState {
    fn used_slots(&self) -> u32 {
        self.daily_alert_count + self.pending.len() as u32
    }

    fn roll_to(&mut self, today: NaiveDate) {
        if self.last_reset_date != Some(today) {
            self.daily_alert_count = 0;
            self.last_alert_time_per_symbol.clear();
            self.pending.clear();
            self.last_reset_date = Some(today);
        }
    }
}

/// A delivered alert as kept in the alert log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentAlert {
    pub symbol: String,
    pub sent_at: DateTime<Utc>,
}

/// Durable record of delivered alerts.
#[async_trait]
pub trait AlertLog: Send + Sync {
    async fn load_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<SentAlert>>;
    async fn append(&self, alert: &SentAlert) -> anyhow::Result<()>;
}

/// What the gate is asked to judge.
#[derive(Debug, Clone, Copy)]
pub struct AlertCandidate<'a> {
    pub symbol: &'a str,
    pub recommendation: Option<&'a Recommendation>,
    pub portfolio: Option<&'a PortfolioSnapshot>,
}

pub struct AlertGate {
    config: AlertConfig,
    allocation: AllocationConfig,
    calendar: MarketCalendar,
    clock: Arc<dyn Clock>,
    log: Option<Arc<dyn AlertLog>>,
    state: Mutex<AlertGateState>,
}

impl AlertGate {
    pub fn new(
        config: AlertConfig,
        allocation: AllocationConfig,
        calendar: MarketCalendar,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            allocation,
            calendar,
            clock,
            log: None,
            state: Mutex::new(AlertGateState::default()),
        }
    }

    pub fn with_log(mut self, log: Arc<dyn AlertLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Rebuilds today's count and cooldowns from the alert log. Returns the number of alerts
    /// found; without a log this is a no-op.
    pub async fn restore(&self) -> anyhow::Result<usize> {
        let Some(log) = &self.log else {
            return Ok(0);
        };
        let today = self.calendar.local_date(self.clock.now());
        let day_start = self
            .calendar
            .offset()
            .from_local_datetime(&today.and_time(NaiveTime::MIN))
            .single()
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| anyhow::anyhow!("no market-local midnight for {today}"))?;
        let sent = log.load_since(day_start).await?;

        let mut state = self.state.lock().await;
        *state = AlertGateState {
            last_reset_date: Some(today),
            ..AlertGateState::default()
        };
        for alert in &sent {
            state.daily_alert_count += 1;
            let last = state
                .last_alert_time_per_symbol
                .entry(alert.symbol.to_ascii_uppercase())
                .or_insert(alert.sent_at);
            if alert.sent_at > *last {
                *last = alert.sent_at;
            }
        }
        tracing::info!(
            daily_alert_count = state.daily_alert_count,
            %today,
            "alert gate restored"
        );
        Ok(sent.len())
    }

    pub async fn evaluate(&self, candidate: AlertCandidate<'_>) -> AlertDecision {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.roll_to(self.calendar.local_date(now));

        let decision = self.decide(&state, &candidate, now);
        if decision.should_trigger {
            state
                .pending
                .insert(candidate.symbol.to_ascii_uppercase(), now);
        }
        match &decision.rejection {
            Some(reason) => tracing::debug!(
                symbol = candidate.symbol,
                alert_type = ?decision.alert_type,
                %reason,
                "alert suppressed"
            ),
            None => tracing::info!(
                symbol = candidate.symbol,
                alert_type = ?decision.alert_type,
                "alert allowed"
            ),
        }
        decision
    }

    fn decide(
        &self,
        state: &AlertGateState,
        candidate: &AlertCandidate<'_>,
        now: DateTime<Utc>,
    ) -> AlertDecision {
        let c = &self.config;
        let symbol = candidate.symbol.to_ascii_uppercase();

        if c.exclude_symbols
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&symbol))
        {
            return AlertDecision::reject(None, AlertRejection::Excluded);
        }
        let Some(rec) = candidate.recommendation else {
            return AlertDecision::reject(None, AlertRejection::MissingRecommendation);
        };

        let alert_type = match self.classify(rec) {
            Some(t) => t,
            None => return AlertDecision::reject(None, AlertRejection::NotActionable),
        };
        let reject = |reason| AlertDecision::reject(Some(alert_type), reason);

        if rec.confidence_label < c.min_confidence {
            return reject(AlertRejection::ConfidenceTooLow);
        }

        if state.used_slots() >= c.max_alerts_per_day {
            return reject(AlertRejection::DailyLimitReached {
                count: state.used_slots(),
                max: c.max_alerts_per_day,
            });
        }

        if state.pending.contains_key(&symbol) {
            return reject(AlertRejection::DeliveryPending);
        }

        if let Some(last) = state.last_alert_time_per_symbol.get(&symbol) {
            let cooldown = Duration::seconds((c.min_hours_between_same_symbol * 3600.0) as i64);
            let elapsed = now - *last;
            if elapsed < cooldown {
                let remaining = cooldown - elapsed;
                return reject(AlertRejection::SymbolCooldown {
                    minutes_remaining: remaining.num_minutes().max(1),
                });
            }
        }

        if c.market_hours_only && !self.calendar.is_open(now) {
            return reject(AlertRejection::OutsideMarketHours);
        }

        let mut allocation_pct = Some(rec.suggested_allocation_pct);
        if c.portfolio_aware && alert_type.is_buy() {
            if let Some(portfolio) = candidate.portfolio {
                let check = AllocationChecker::new(&self.allocation).check(
                    &symbol,
                    rec.suggested_allocation_pct,
                    portfolio,
                );
                if check.action == AllocationAction::Skip {
                    return reject(AlertRejection::AllocationExhausted);
                }
                allocation_pct = Some(check.final_allocation_pct);
            }
        }

        AlertDecision::accept(alert_type, allocation_pct)
    }

    /// Oversized allocations become risk warnings; Hold and Avoid are never alerted.
    fn classify(&self, rec: &Recommendation) -> Option<AlertType> {
        if rec.suggested_allocation_pct > self.config.risk_warning_allocation_pct {
            return Some(AlertType::RiskWarning);
        }
        match rec.rating {
            Rating::StrongBuy => Some(AlertType::StrongBuy),
            Rating::Buy => Some(AlertType::Buy),
            Rating::Sell => Some(AlertType::Sell),
            Rating::StrongSell => Some(AlertType::StrongSell),
            Rating::Hold | Rating::Avoid => None,
        }
    }

    /// Call only after the notification was confirmed delivered. Settles the reservation
    /// taken by `evaluate`, if any.
    pub async fn record_alert_sent(&self, symbol: &str) {
        let now = self.clock.now();
        let symbol = symbol.to_ascii_uppercase();
        {
            let mut state = self.state.lock().await;
            state.roll_to(self.calendar.local_date(now));
            state.pending.remove(&symbol);
            state.daily_alert_count += 1;
            state.last_alert_time_per_symbol.insert(symbol.clone(), now);
            tracing::debug!(
                symbol = %symbol,
                daily_alert_count = state.daily_alert_count,
                "alert recorded"
            );
        }

        if let Some(log) = &self.log {
            let alert = SentAlert {
                symbol,
                sent_at: now,
            };
            if let Err(err) = log.append(&alert).await {
                tracing::error!(symbol = %alert.symbol, error = %err, "alert log append failed");
            }
        }
    }

    /// Drops the reservation for `symbol` after a failed delivery.
    pub async fn release(&self, symbol: &str) {
        let mut state = self.state.lock().await;
        if state.pending.remove(&symbol.to_ascii_uppercase()).is_some() {
            tracing::debug!(symbol, "alert reservation released");
        }
    }

    pub async fn reset(&self) {
        let today = self.calendar.local_date(self.clock.now());
        let mut state = self.state.lock().await;
        *state = AlertGateState {
            last_reset_date: Some(today),
            ..AlertGateState::default()
        };
    }

    pub async fn state(&self) -> AlertGateState {
        self.state.lock().await.clone()
    }
}
