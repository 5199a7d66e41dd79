pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod store;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::{config::Settings, state::AppState, telemetry, time::SystemClock};
use crate::store::PgStore;

async fn bootstrap() -> anyhow::Result<AppState> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::connect_with_retry(&settings).await?;
    db::run_migrations(&db_pool).await?;
    tracing::info!("Database connected and migrations applied");

    Ok(AppState::new(settings, Arc::new(PgStore::new(db_pool)), Arc::new(SystemClock)))
}

/// Serves the reporting API until SIGINT/SIGTERM.
pub async fn run() -> anyhow::Result<()> {
    let state = bootstrap().await?;
    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "Mentor notification API listening"
    );

    axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await?;

    Ok(())
}

/// Runs the ingestion, scanning and delivery timers until SIGINT/SIGTERM.
pub async fn run_worker() -> anyhow::Result<()> {
    let state = bootstrap().await?;
    tasks::worker::run(state).await
}
