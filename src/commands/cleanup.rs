use crate::context::AppContext;
use anyhow::Result;
use chrono::{Duration, Utc};
use log::info;

/// Drop daily entries older than the retention horizon. Account snapshots
/// and gain records are tiny and kept indefinitely.
pub async fn run(app: &AppContext, days: Option<i64>) -> Result<()> {
    let days = days.unwrap_or(app.config().retention_days);
    let horizon = Utc::now().date_naive() - Duration::days(days);
    info!("Received cleanup command: dropping daily entries before {}", horizon);

    let db = app.database().await?;
    let deleted = db.delete_daily_entries_before(horizon).await?;
    info!("Cleanup complete: {} daily row(s) deleted", deleted);
    Ok(())
}
