use anyhow::Context;
use chrono::{Datelike, NaiveDate};

// Advisory locks are scoped to the Postgres session. Used as a best-effort guard against two
// runs of the same job for the same as-of date.
const LOCK_NAMESPACE: i64 = 0x5349_474E_414C; // "SIGNAL"

fn lock_key(job: &str, as_of_date: NaiveDate) -> i64 {
    // FNV-1a over the job name keeps keys stable across builds.
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in job.bytes() {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    LOCK_NAMESPACE ^ ((h as i64) << 20) ^ i64::from(as_of_date.num_days_from_ce())
}

pub async fn try_acquire_job_lock(
    pool: &sqlx::PgPool,
    job: &str,
    as_of_date: NaiveDate,
) -> anyhow::Result<bool> {
    let key = lock_key(job, as_of_date);
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to acquire advisory lock (job={job}, key={key})"))?;
    Ok(acquired.0)
}

pub async fn release_job_lock(
    pool: &sqlx::PgPool,
    job: &str,
    as_of_date: NaiveDate,
) -> anyhow::Result<()> {
    let key = lock_key(job, as_of_date);
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(key)
        .execute(pool)
        .await
        .with_context(|| format!("failed to release advisory lock (job={job}, key={key})"))?;
    Ok(())
}
