use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Partial,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Error => "error",
        }
    }
}

/// Audit row for one worker run (`kind` is the subcommand, e.g. "scan" or "sell-check").
#[allow(clippy::too_many_arguments)]
pub async fn record_run(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
    started_at: DateTime<Utc>,
    kind: &str,
    status: RunStatus,
    error: Option<&str>,
    summary: Option<Value>,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    let finished_at: DateTime<Utc> = Utc::now();

    sqlx::query(
        "INSERT INTO scan_runs (id, as_of_date, started_at, finished_at, kind, status, error, summary) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .persistent(false)
    .bind(id)
    .bind(as_of_date)
    .bind(started_at)
    .bind(finished_at)
    .bind(kind)
    .bind(status.as_str())
    .bind(error)
    .bind(summary)
    .execute(pool)
    .await
    .context("insert scan_runs failed")?;

    Ok(id)
}
