use crate::domain::composite::CompositeResult;
use crate::domain::recommendation::{AnalysisRecord, Recommendation};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};

/// Upserts one row per (as_of_date, symbol) in a single transaction. Re-running a scan on the
/// same day replaces that day's analysis.
pub async fn persist_analyses(pool: &sqlx::PgPool, records: &[AnalysisRecord]) -> anyhow::Result<u64> {
    if records.is_empty() {
        return Ok(0);
    }

    let chunk_size: usize = std::env::var("ANALYSES_UPSERT_BATCH")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(200);
    anyhow::ensure!(chunk_size >= 1, "ANALYSES_UPSERT_BATCH must be >= 1");

    let mut rows = Vec::with_capacity(records.len());
    for r in records {
        let composite = serde_json::to_value(&r.composite)
            .with_context(|| format!("serialize composite for {} failed", r.composite.symbol))?;
        let recommendation = serde_json::to_value(&r.recommendation).with_context(|| {
            format!("serialize recommendation for {} failed", r.composite.symbol)
        })?;
        rows.push((r, composite, recommendation));
    }

    let mut tx = pool.begin().await.context("begin transaction failed")?;
    let mut affected: u64 = 0;

    for chunk in rows.chunks(chunk_size) {
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO analyses (as_of_date, symbol, generated_at, method, composite_score, \
             risk_adjusted_score, rating, confidence, suggested_allocation_pct, fallback_reason, \
             composite, recommendation) ",
        );
        qb.push_values(chunk, |mut b, (r, composite, recommendation)| {
            b.push_bind(r.as_of_date)
                .push_bind(r.composite.symbol.clone())
                .push_bind(r.generated_at)
                .push_bind(r.composite.method().as_str())
                .push_bind(r.composite.composite_score)
                .push_bind(r.composite.risk_adjusted_score)
                .push_bind(r.composite.rating.as_str())
                .push_bind(r.composite.confidence)
                .push_bind(r.recommendation.suggested_allocation_pct)
                .push_bind(r.composite.fallback_reason.clone())
                .push_bind(composite.clone())
                .push_bind(recommendation.clone());
        });
        qb.push(
            " ON CONFLICT (as_of_date, symbol) DO UPDATE SET \
               generated_at = EXCLUDED.generated_at, method = EXCLUDED.method, \
               composite_score = EXCLUDED.composite_score, \
               risk_adjusted_score = EXCLUDED.risk_adjusted_score, rating = EXCLUDED.rating, \
               confidence = EXCLUDED.confidence, \
               suggested_allocation_pct = EXCLUDED.suggested_allocation_pct, \
               fallback_reason = EXCLUDED.fallback_reason, composite = EXCLUDED.composite, \
               recommendation = EXCLUDED.recommendation",
        );

        let res = qb
            .build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("batch upsert analyses failed")?;
        affected += res.rows_affected();
    }

    tx.commit().await.context("commit transaction failed")?;
    tracing::debug!(affected, "analyses persisted");
    Ok(affected)
}

type AnalysisRow = (NaiveDate, DateTime<Utc>, serde_json::Value, serde_json::Value);

fn decode(row: AnalysisRow) -> anyhow::Result<AnalysisRecord> {
    let (as_of_date, generated_at, composite, recommendation) = row;
    let composite: CompositeResult =
        serde_json::from_value(composite).context("stored composite has unexpected shape")?;
    let recommendation: Recommendation = serde_json::from_value(recommendation)
        .context("stored recommendation has unexpected shape")?;
    Ok(AnalysisRecord {
        as_of_date,
        generated_at,
        composite,
        recommendation,
    })
}

pub async fn latest_analysis(
    pool: &sqlx::PgPool,
    symbol: &str,
) -> anyhow::Result<Option<AnalysisRecord>> {
    let row: Option<AnalysisRow> = sqlx::query_as(
        "SELECT as_of_date, generated_at, composite, recommendation FROM analyses \
         WHERE symbol = $1 ORDER BY generated_at DESC LIMIT 1",
    )
    .persistent(false)
    .bind(symbol.trim().to_ascii_uppercase())
    .fetch_optional(pool)
    .await
    .with_context(|| format!("select latest analysis for {symbol} failed"))?;

    row.map(decode).transpose()
}

/// Every analysis stored for `as_of_date`, best composite score first.
pub async fn analyses_for_date(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
) -> anyhow::Result<Vec<AnalysisRecord>> {
    let rows: Vec<AnalysisRow> = sqlx::query_as(
        "SELECT as_of_date, generated_at, composite, recommendation FROM analyses \
         WHERE as_of_date = $1 ORDER BY composite_score DESC",
    )
    .persistent(false)
    .bind(as_of_date)
    .fetch_all(pool)
    .await
    .with_context(|| format!("select analyses for {as_of_date} failed"))?;

    rows.into_iter().map(decode).collect()
}
