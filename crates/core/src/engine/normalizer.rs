//! Maps raw provider inputs onto bounded per-domain scores.

use crate::domain::signals::{KeyMetrics, SignalSet, TechnicalTrend};
use crate::ingest::types::{FundamentalInputs, MarketSnapshot, SentimentSnapshot, TechnicalIndicators};

/// Linear map of `x` from `[lo, hi]` onto `[0, 100]`, clamped.
fn scale(x: f64, lo: f64, hi: f64) -> f64 {
    if hi <= lo {
        return 50.0;
    }
    ((x - lo) / (hi - lo) * 100.0).clamp(0.0, 100.0)
}

fn mean(parts: &[f64]) -> Option<f64> {
    if parts.is_empty() {
        return None;
    }
    Some(parts.iter().sum::<f64>() / parts.len() as f64)
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

pub fn fundamental_score(f: &FundamentalInputs) -> Option<f64> {
    let mut parts = Vec::with_capacity(5);
    if let Some(roe) = finite(f.roe_pct) {
        parts.push(scale(roe, 0.0, 30.0));
    }
    if let Some(margin) = finite(f.profit_margin_pct) {
        parts.push(scale(margin, 0.0, 30.0));
    }
    if let Some(growth) = finite(f.revenue_growth_pct) {
        parts.push(scale(growth, -10.0, 40.0));
    }
    if let Some(pe) = finite(f.pe_ratio) {
        // Negative P/E means losses.
        parts.push(if pe <= 0.0 { 20.0 } else { 100.0 - scale(pe, 10.0, 50.0) });
    }
    if let Some(de) = finite(f.debt_to_equity) {
        parts.push(100.0 - scale(de, 0.0, 3.0));
    }
    mean(&parts)
}

pub fn technical_score(price: f64, t: &TechnicalIndicators) -> Option<f64> {
    let mut parts = Vec::with_capacity(3);

    if let Some(rsi) = finite(t.rsi) {
        let s = if rsi >= 70.0 {
            35.0
        } else if rsi <= 30.0 {
            40.0
        } else {
            50.0 + (rsi - 50.0) * 1.5
        };
        parts.push(s);
    }

    if let (Some(macd), Some(signal)) = (finite(t.macd), finite(t.macd_signal)) {
        parts.push(if macd > signal { 70.0 } else { 30.0 });
    }

    let averages: Vec<f64> = [t.sma20, t.sma50, t.sma200]
        .into_iter()
        .filter_map(finite)
        .filter(|sma| *sma > 0.0)
        .collect();
    if !averages.is_empty() {
        let above = averages.iter().filter(|sma| price > **sma).count();
        parts.push(above as f64 / averages.len() as f64 * 100.0);
    }

    mean(&parts)
}

pub fn sentiment_score(s: &SentimentSnapshot) -> Option<f64> {
    if !s.overall.is_finite() {
        return None;
    }
    Some((50.0 + 50.0 * s.overall.clamp(-1.0, 1.0)).clamp(0.0, 100.0))
}

/// Raw risk in [0, 10] from volatility (0.50 annualised maps to 10) and leverage.
pub fn risk_raw(t: Option<&TechnicalIndicators>, f: Option<&FundamentalInputs>) -> Option<f64> {
    let vol = t.and_then(|t| finite(t.volatility));
    let de = f.and_then(|f| finite(f.debt_to_equity));
    if vol.is_none() && de.is_none() {
        return None;
    }

    let mut raw = vol.map(|v| (v * 20.0).clamp(0.0, 10.0)).unwrap_or(5.0);
    if de.is_some_and(|de| de > 2.0) {
        raw += 1.0;
    }
    Some(raw.clamp(0.0, 10.0))
}

pub fn trend(price: f64, t: &TechnicalIndicators) -> TechnicalTrend {
    let sma20 = finite(t.sma20);
    let sma50 = finite(t.sma50);
    let sma200 = finite(t.sma200);
    let macd_cross = match (finite(t.macd), finite(t.macd_signal)) {
        (Some(m), Some(s)) => Some(m > s),
        _ => None,
    };

    if let (Some(s50), Some(s200)) = (sma50, sma200) {
        if price < s50 && s50 < s200 {
            return TechnicalTrend::Bearish;
        }
        if price > s50 && s50 > s200 {
            return TechnicalTrend::Bullish;
        }
    }

    match (macd_cross, sma20) {
        (Some(false), Some(s20)) if price < s20 => TechnicalTrend::Bearish,
        (Some(true), Some(s20)) if price > s20 => TechnicalTrend::Bullish,
        _ => TechnicalTrend::Neutral,
    }
}

pub fn normalize(snapshot: &MarketSnapshot) -> SignalSet {
    let price = snapshot.quote.current;
    let technicals = snapshot.technicals.as_ref();
    let fundamentals = snapshot.fundamentals.as_ref();

    let metrics = KeyMetrics {
        roe_pct: fundamentals.and_then(|f| finite(f.roe_pct)),
        profit_margin_pct: fundamentals.and_then(|f| finite(f.profit_margin_pct)),
        revenue_growth_pct: fundamentals.and_then(|f| finite(f.revenue_growth_pct)),
        momentum_20d_pct: technicals
            .and_then(|t| finite(t.sma20))
            .filter(|sma| *sma > 0.0)
            .map(|sma| (price / sma - 1.0) * 100.0),
        debt_to_equity: fundamentals.and_then(|f| finite(f.debt_to_equity)),
        pe_ratio: fundamentals.and_then(|f| finite(f.pe_ratio)),
        sentiment_overall: snapshot.sentiment.as_ref().map(|s| s.overall),
        volatility: technicals.and_then(|t| finite(t.volatility)),
    };

    SignalSet {
        symbol: snapshot.quote.symbol.clone(),
        current_price: price,
        fundamental: fundamentals.and_then(fundamental_score),
        technical: technicals.and_then(|t| technical_score(price, t)),
        sentiment: snapshot.sentiment.as_ref().and_then(sentiment_score),
        risk_raw: risk_raw(technicals, fundamentals),
        trend: technicals
            .map(|t| trend(price, t))
            .unwrap_or(TechnicalTrend::Neutral),
        metrics,
    }
}
