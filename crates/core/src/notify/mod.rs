//! Notification Channel contract and the message built for an accepted alert.

pub mod webhook;

use crate::domain::alert::AlertType;
use crate::domain::recommendation::Recommendation;
use serde::Serialize;

pub use webhook::WebhookChannel;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertMessage {
    pub symbol: String,
    pub alert_type: AlertType,
    pub title: String,
    pub body: String,
}

impl AlertMessage {
    /// `allocation_pct` is the size the gate settled on, which may be below the suggestion.
    pub fn from_recommendation(
        alert_type: AlertType,
        rec: &Recommendation,
        allocation_pct: Option<f64>,
    ) -> Self {
        let title = match alert_type {
            AlertType::RiskWarning => format!("Risk warning: {}", rec.symbol),
            other => format!("{}: {}", label(other), rec.symbol),
        };

        let mut lines = vec![format!(
            "{} ({} confidence) at {:.2}, target {:.2}",
            rec.rating, rec.confidence_label, rec.current_price, rec.price_target
        )];
        let allocation = allocation_pct.unwrap_or(rec.suggested_allocation_pct);
        if allocation > 0.0 {
            lines.push(format!(
                "Allocation {allocation:.1}% over {}",
                rec.time_horizon
            ));
        }
        if !rec.strengths.is_empty() {
            lines.push(format!("+ {}", rec.strengths.join("; ")));
        }
        if !rec.risks.is_empty() {
            lines.push(format!("- {}", rec.risks.join("; ")));
        }

        Self {
            symbol: rec.symbol.clone(),
            alert_type,
            title,
            body: lines.join("\n"),
        }
    }
}

fn label(alert_type: AlertType) -> &'static str {
    match alert_type {
        AlertType::StrongBuy => "Strong buy",
        AlertType::Buy => "Buy",
        AlertType::Sell => "Sell",
        AlertType::StrongSell => "Strong sell",
        AlertType::RiskWarning => "Risk warning",
    }
}

/// Returns `true` only on confirmed delivery. Failures are logged by the implementation,
/// never raised.
#[async_trait::async_trait]
pub trait NotificationChannel: Send + Sync {
    fn channel_name(&self) -> &'static str;

    async fn send(&self, message: &AlertMessage) -> bool;
}

/// Writes alerts to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChannel;

#[async_trait::async_trait]
impl NotificationChannel for LogChannel {
    fn channel_name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &AlertMessage) -> bool {
        tracing::info!(
            symbol = %message.symbol,
            alert_type = %message.alert_type,
            title = %message.title,
            body = %message.body,
            "alert"
        );
        true
    }
}
