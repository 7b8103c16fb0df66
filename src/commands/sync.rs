use crate::context::AppContext;
use crate::sync::run_sync;
use anyhow::{bail, Result};
use log::info;

/// Run one synchronization pass from the CLI and print the report. Exits
/// non-zero when the pass failed outright so cron wrappers can alert on it.
pub async fn run(app: &AppContext) -> Result<()> {
    info!("Received sync command");
    let db = app.database().await?;
    let upstream = app.upstream()?;
    let cache = app.cache().await?;

    let report = run_sync(app.config(), &upstream, &db, &cache).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.success {
        bail!("sync failed: {}", report.errors.join("; "));
    }
    Ok(())
}
