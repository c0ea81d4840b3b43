//! Serves the ACM membership site.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use acm_general::config::Config;
use acm_general::db::PgStore;
use acm_general::routes::router;
use acm_general::state::AppState;

const DEFAULT_LOG_FILTER: &str = "acm_general=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = Config::from_env()?;
    let bind_address = config.bind_address;

    let store = PgStore::connect(&config.database_url)
        .await
        .context("Failed to connect to the database")?;
    store.migrate().await.context("Failed to run migrations")?;

    let state = AppState::from_config(config, Arc::new(store))?;
    let app = router(Arc::new(state));

    info!("listening on {bind_address}");
    axum::Server::bind(&bind_address)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server stopped unexpectedly")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}
