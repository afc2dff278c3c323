use crate::domain::composite::Weights;
use crate::domain::rating::ConfidenceLevel;
use crate::time::market_hours::MarketCalendar;
use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub sentry_dsn: Option<String>,
    pub data_provider_base_url: Option<String>,
    pub data_provider_api_key: Option<String>,
    pub venue_base_url: Option<String>,
    pub venue_api_key: Option<String>,
    pub notify_webhook_url: Option<String>,
    pub engine_config_path: Option<String>,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            sentry_dsn: std::env::var("SENTRY_DSN").ok(),
            data_provider_base_url: std::env::var("DATA_PROVIDER_BASE_URL").ok(),
            data_provider_api_key: std::env::var("DATA_PROVIDER_API_KEY").ok(),
            venue_base_url: std::env::var("VENUE_BASE_URL").ok(),
            venue_api_key: std::env::var("VENUE_API_KEY").ok(),
            notify_webhook_url: std::env::var("NOTIFY_WEBHOOK_URL").ok(),
            engine_config_path: std::env::var("ENGINE_CONFIG_PATH").ok(),
        })
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL is required")
    }

    pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
        self.anthropic_api_key
            .as_deref()
            .context("ANTHROPIC_API_KEY is required")
    }

    pub fn require_data_provider_base_url(&self) -> anyhow::Result<&str> {
        self.data_provider_base_url
            .as_deref()
            .context("DATA_PROVIDER_BASE_URL is required")
    }

    pub fn require_venue_base_url(&self) -> anyhow::Result<&str> {
        self.venue_base_url
            .as_deref()
            .context("VENUE_BASE_URL is required")
    }

    pub fn require_notify_webhook_url(&self) -> anyhow::Result<&str> {
        self.notify_webhook_url
            .as_deref()
            .context("NOTIFY_WEBHOOK_URL is required")
    }

    /// Loads the engine thresholds (file if configured, then env overrides) and validates them.
    pub fn load_engine_config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = match self.engine_config_path.as_deref() {
            Some(path) => EngineConfig::from_json_file(path)?,
            None => EngineConfig::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{mode} weights must sum to 1.0 (got {sum})")]
    WeightsNotNormalized { mode: &'static str, sum: f64 },
    #[error("{mode} weights must be finite and non-negative")]
    NegativeWeight { mode: &'static str },
    #[error("{name} thresholds must be strictly decreasing")]
    ThresholdOrder { name: &'static str },
    #[error("{name} must be within {min}..={max} (got {value})")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("allocation band starting at score {min_score} has min_pct > max_pct")]
    InvalidBand { min_score: f64 },
}

/// Every tunable threshold of the decision chain, passed by reference through each stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scoring: ScoringConfig,
    pub recommendation: RecommendationConfig,
    pub sell: SellConfig,
    pub risk: RiskConfig,
    pub sizing: SizingConfig,
    pub allocation: AllocationConfig,
    pub alert: AlertConfig,
    pub scan: ScanConfig,
    pub market: MarketCalendar,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub traditional_weights: Weights,
    pub enhanced_weights: Weights,
    pub strong_buy_threshold: f64,
    pub buy_threshold: f64,
    pub hold_threshold: f64,
    pub sell_threshold: f64,
    /// Below this confidence, buy ratings drop to Hold and sell ratings become Avoid.
    pub low_confidence_threshold: f64,
    pub confidence_floor: f64,
    /// Confidence lost per point of standard deviation across component scores.
    pub confidence_dispersion_factor: f64,
    pub neutral_score: f64,
    pub neutral_risk_raw: f64,
    pub risk_penalty_per_point: f64,
    pub insight_timeout_secs: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            traditional_weights: Weights::TRADITIONAL,
            enhanced_weights: Weights::INSIGHT_ENHANCED,
            strong_buy_threshold: 80.0,
            buy_threshold: 70.0,
            hold_threshold: 50.0,
            sell_threshold: 30.0,
            low_confidence_threshold: 40.0,
            confidence_floor: 30.0,
            confidence_dispersion_factor: 2.0,
            neutral_score: 50.0,
            neutral_risk_raw: 5.0,
            risk_penalty_per_point: 2.0,
            insight_timeout_secs: 45,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationBand {
    pub min_score: f64,
    pub min_pct: f64,
    pub max_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    /// Ordered from the highest `min_score` down.
    pub allocation_bands: Vec<AllocationBand>,
    pub fast_growth_pct: f64,
    pub steady_growth_pct: f64,
    pub max_list_items: usize,
    pub strong_roe_pct: f64,
    pub strong_margin_pct: f64,
    pub strong_growth_pct: f64,
    pub strong_momentum_pct: f64,
    pub strong_sentiment_score: f64,
    pub strong_technical_score: f64,
    pub high_risk_raw: f64,
    pub high_debt_to_equity: f64,
    pub high_pe_ratio: f64,
    pub weak_sentiment_score: f64,
    pub weak_technical_score: f64,
    pub price_target_divisor: f64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        let band = |min_score, min_pct, max_pct| AllocationBand {
            min_score,
            min_pct,
            max_pct,
        };
        Self {
            allocation_bands: vec![
                band(80.0, 8.0, 10.0),
                band(70.0, 5.0, 7.0),
                band(60.0, 3.0, 5.0),
                band(50.0, 1.0, 3.0),
                band(40.0, 0.0, 1.0),
            ],
            fast_growth_pct: 30.0,
            steady_growth_pct: 15.0,
            max_list_items: 5,
            strong_roe_pct: 15.0,
            strong_margin_pct: 20.0,
            strong_growth_pct: 15.0,
            strong_momentum_pct: 5.0,
            strong_sentiment_score: 65.0,
            strong_technical_score: 70.0,
            high_risk_raw: 7.0,
            high_debt_to_equity: 2.0,
            high_pe_ratio: 40.0,
            weak_sentiment_score: 35.0,
            weak_technical_score: 35.0,
            price_target_divisor: 250.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SellConfig {
    pub min_sell_score: f64,
    pub sell_tier: f64,
    pub strong_sell_tier: f64,
    pub negative_rating_points: f64,
    pub weak_hold_points: f64,
    pub weak_hold_score: f64,
    pub stop_loss_points: f64,
    /// Unrealized P&L in percent at or below which the stop-loss signal fires.
    pub stop_loss_pnl_pct: f64,
    pub profit_taking_points: f64,
    pub profit_taking_pnl_pct: f64,
    pub bearish_trend_points: f64,
    pub concentration_points: f64,
    pub concentration_pct: f64,
    pub strong_sell_fraction: f64,
    pub sell_fraction: f64,
    pub trim_fraction: f64,
    pub strong_sell_rating_bonus: f64,
    pub stop_loss_bonus: f64,
    pub profit_only_cap: f64,
}

impl Default for SellConfig {
    fn default() -> Self {
        Self {
            min_sell_score: 20.0,
            sell_tier: 40.0,
            strong_sell_tier: 60.0,
            negative_rating_points: 40.0,
            weak_hold_points: 20.0,
            weak_hold_score: 40.0,
            stop_loss_points: 25.0,
            stop_loss_pnl_pct: -20.0,
            profit_taking_points: 15.0,
            profit_taking_pnl_pct: 50.0,
            bearish_trend_points: 15.0,
            concentration_points: 10.0,
            concentration_pct: 15.0,
            strong_sell_fraction: 0.75,
            sell_fraction: 0.50,
            trim_fraction: 0.25,
            strong_sell_rating_bonus: 0.25,
            stop_loss_bonus: 0.15,
            profit_only_cap: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Largest single trade as a fraction of portfolio value.
    pub max_position_size: f64,
    /// Largest single holding as a fraction of portfolio value.
    pub max_concentration: f64,
    pub max_trade_risk: f64,
    pub high_volatility: f64,
    pub extreme_volatility: f64,
    pub daily_loss_limit: f64,
    /// Average absolute daily move (percent) treated as maximal market risk.
    pub market_move_ceiling_pct: f64,
    pub concentration_weight: f64,
    pub market_weight: f64,
    pub volatility_weight: f64,
    pub liquidity_weight: f64,
    pub default_risk_score: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: 0.10,
            max_concentration: 0.20,
            max_trade_risk: 0.7,
            high_volatility: 0.30,
            extreme_volatility: 0.50,
            daily_loss_limit: 0.02,
            market_move_ceiling_pct: 5.0,
            concentration_weight: 0.30,
            market_weight: 0.25,
            volatility_weight: 0.25,
            liquidity_weight: 0.20,
            default_risk_score: 0.65,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Position size fraction per confidence point.
    pub confidence_scaling: f64,
    pub max_portfolio_invested: f64,
    pub min_clip_remainder: f64,
    /// Stop distance assumed when computing `max_loss_pct`.
    pub stop_loss_fraction: f64,
    /// Trades riskier than this are placed as limit orders.
    pub limit_order_risk: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            confidence_scaling: 0.001,
            max_portfolio_invested: 0.80,
            min_clip_remainder: 0.02,
            stop_loss_fraction: 0.08,
            limit_order_risk: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Percent of portfolio value.
    pub max_single_position_pct: f64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            max_single_position_pct: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub max_alerts_per_day: u32,
    pub min_hours_between_same_symbol: f64,
    pub min_confidence: ConfidenceLevel,
    pub exclude_symbols: Vec<String>,
    /// Suggested allocation (percent) above which the alert becomes a risk warning.
    pub risk_warning_allocation_pct: f64,
    pub market_hours_only: bool,
    pub portfolio_aware: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            max_alerts_per_day: 10,
            min_hours_between_same_symbol: 4.0,
            min_confidence: ConfidenceLevel::Medium,
            exclude_symbols: Vec::new(),
            risk_warning_allocation_pct: 10.0,
            market_hours_only: true,
            portfolio_aware: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub symbol_delay_ms: u64,
    pub market_data_timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            symbol_delay_ms: 500,
            market_data_timeout_secs: 15,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config {path}"))?;
        serde_json::from_str(&text).with_context(|| format!("invalid engine config JSON in {path}"))
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(n) = env_parse::<u32>("ALERT_MAX_PER_DAY") {
            self.alert.max_alerts_per_day = n;
        }
        if let Some(h) = env_parse::<f64>("ALERT_MIN_HOURS_SAME_SYMBOL") {
            self.alert.min_hours_between_same_symbol = h;
        }
        if let Some(b) = env_parse::<bool>("ALERT_MARKET_HOURS_ONLY") {
            self.alert.market_hours_only = b;
        }
        if let Some(b) = env_parse::<bool>("ALERT_PORTFOLIO_AWARE") {
            self.alert.portfolio_aware = b;
        }
        if let Ok(s) = std::env::var("ALERT_EXCLUDE_SYMBOLS") {
            self.alert.exclude_symbols = s
                .split(',')
                .map(|p| p.trim().to_ascii_uppercase())
                .filter(|p| !p.is_empty())
                .collect();
        }
        if let Some(ms) = env_parse::<u64>("SCAN_SYMBOL_DELAY_MS") {
            self.scan.symbol_delay_ms = ms;
        }
        if let Some(secs) = env_parse::<u64>("INSIGHT_TIMEOUT_SECS") {
            self.scoring.insight_timeout_secs = secs;
        }
        if let Some(pct) = env_parse::<f64>("MAX_POSITION_SIZE") {
            self.risk.max_position_size = pct;
        }
    }

    /// Fails fast on invariant violations instead of silently correcting them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (mode, w) in [
            ("traditional", &self.scoring.traditional_weights),
            ("insight_enhanced", &self.scoring.enhanced_weights),
        ] {
            if w.has_negative() {
                return Err(ConfigError::NegativeWeight { mode });
            }
            if !w.is_normalized() {
                return Err(ConfigError::WeightsNotNormalized { mode, sum: w.sum() });
            }
        }

        let risk_sum = self.risk.concentration_weight
            + self.risk.market_weight
            + self.risk.volatility_weight
            + self.risk.liquidity_weight;
        if (risk_sum - 1.0).abs() > crate::domain::composite::WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightsNotNormalized {
                mode: "risk",
                sum: risk_sum,
            });
        }

        let s = &self.scoring;
        if !(s.strong_buy_threshold > s.buy_threshold
            && s.buy_threshold > s.hold_threshold
            && s.hold_threshold > s.sell_threshold)
        {
            return Err(ConfigError::ThresholdOrder { name: "rating" });
        }

        let sell = &self.sell;
        if !(sell.strong_sell_tier > sell.sell_tier && sell.sell_tier > sell.min_sell_score) {
            return Err(ConfigError::ThresholdOrder { name: "sell tier" });
        }

        let bands = &self.recommendation.allocation_bands;
        for pair in bands.windows(2) {
            if pair[0].min_score <= pair[1].min_score {
                return Err(ConfigError::ThresholdOrder {
                    name: "allocation band",
                });
            }
        }
        for band in bands {
            if band.min_pct > band.max_pct {
                return Err(ConfigError::InvalidBand {
                    min_score: band.min_score,
                });
            }
        }

        check_range("risk.max_position_size", self.risk.max_position_size, 0.0, 1.0)?;
        check_range("risk.max_trade_risk", self.risk.max_trade_risk, 0.0, 1.0)?;
        check_range(
            "sizing.max_portfolio_invested",
            self.sizing.max_portfolio_invested,
            0.0,
            1.0,
        )?;
        check_range(
            "allocation.max_single_position_pct",
            self.allocation.max_single_position_pct,
            0.0,
            100.0,
        )?;
        check_range(
            "scoring.low_confidence_threshold",
            s.low_confidence_threshold,
            0.0,
            100.0,
        )?;
        check_range(
            "alert.min_hours_between_same_symbol",
            self.alert.min_hours_between_same_symbol,
            0.0,
            24.0 * 7.0,
        )?;

        Ok(())
    }
}

fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}
