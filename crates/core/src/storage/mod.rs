pub mod alert_log;
pub mod analyses;
pub mod lock;
pub mod positions;
pub mod scan_runs;

use anyhow::Context;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}
