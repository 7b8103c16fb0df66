use crate::context::AppContext;
use crate::server::{router, AppState};
use anyhow::Result;
use log::info;
use std::net::SocketAddr;
use std::sync::Arc;

/// Run the HTTP server. The store connection is opened once here and shared
/// across requests; the cache and upstream client are likewise process-wide.
pub async fn run(app: &AppContext) -> Result<()> {
    let config = app.config().clone();
    let state = AppState {
        db: Arc::new(app.database().await?),
        cache: app.cache().await?,
        upstream: Arc::new(app.upstream()?),
        config: Arc::new(config.clone()),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}
