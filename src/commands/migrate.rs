use crate::context::AppContext;
use anyhow::Result;
use log::info;

pub const SCHEMA_SQL: &str = include_str!("../../db/schema.sql");

/// Apply the schema and drain the legacy tables into the current ones. Run
/// once before serving traffic; reads never fall back to the legacy tables.
pub async fn run(app: &AppContext) -> Result<()> {
    info!("Received migrate command");
    let db = app.database().await?;
    db.apply_schema(SCHEMA_SQL).await?;
    let stats = db.migrate_legacy_tables().await?;
    info!(
        "Migration complete: {} legacy account row(s), {} legacy daily row(s) copied",
        stats.accounts, stats.daily_entries
    );
    Ok(())
}
