use anyhow::Result;
use clap::{Parser, Subcommand};
use statsync::commands::{cleanup, migrate, serve, sync};
use statsync::config::AppConfig;
use statsync::context::AppContext;

#[derive(Parser)]
#[command(name = "statsync")]
#[command(about = "Trading-account statistics sync service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server exposing the sync trigger and dashboard reads
    Serve,
    /// Run one synchronization pass and print the report
    Sync,
    /// Apply the schema and copy legacy rows into the current tables
    Migrate,
    /// Drop daily entries older than the retention horizon
    Cleanup {
        /// Override the configured retention horizon in days
        #[arg(long)]
        days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let app = AppContext::new(config);

    match cli.command {
        Commands::Serve => serve::run(&app).await?,
        Commands::Sync => sync::run(&app).await?,
        Commands::Migrate => migrate::run(&app).await?,
        Commands::Cleanup { days } => cleanup::run(&app, days).await?,
    }

    Ok(())
}
