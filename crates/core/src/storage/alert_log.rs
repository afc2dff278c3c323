use crate::engine::alert_gate::{AlertLog, SentAlert};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Alert log backed by the `alert_log` table.
#[derive(Clone)]
pub struct PgAlertLog {
    pool: sqlx::PgPool,
}

impl PgAlertLog {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertLog for PgAlertLog {
    async fn load_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<SentAlert>> {
        let rows: Vec<(String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT symbol, sent_at FROM alert_log WHERE sent_at >= $1 ORDER BY sent_at",
        )
        .persistent(false)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("select alert_log since {since} failed"))?;

        Ok(rows
            .into_iter()
            .map(|(symbol, sent_at)| SentAlert { symbol, sent_at })
            .collect())
    }

    async fn append(&self, alert: &SentAlert) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO alert_log (symbol, sent_at) VALUES ($1, $2)")
            .persistent(false)
            .bind(&alert.symbol)
            .bind(alert.sent_at)
            .execute(&self.pool)
            .await
            .with_context(|| format!("insert alert_log for {} failed", alert.symbol))?;
        Ok(())
    }
}
