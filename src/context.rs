use crate::cache::TtlCache;
use crate::config::AppConfig;
use crate::database::Database;
use crate::upstream::StatsApiClient;
use anyhow::{anyhow, Result};

/// Shared entry point for the CLI commands: owns the parsed configuration
/// and hands out the store, cache and upstream client on demand.
#[derive(Clone)]
pub struct AppContext {
    config: AppConfig,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn database(&self) -> Result<Database> {
        let Some(database_url) = self.config.database_url.as_deref() else {
            return Err(anyhow!(
                "DATABASE_URL must be set to use store-backed commands."
            ));
        };
        Database::new(database_url).await
    }

    pub fn upstream(&self) -> Result<StatsApiClient> {
        StatsApiClient::from_config(&self.config)
    }

    pub async fn cache(&self) -> Result<TtlCache> {
        TtlCache::open(&self.config.cache_dir, self.config.cache_ttl).await
    }
}
