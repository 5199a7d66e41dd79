pub(crate) mod models;
pub(crate) mod types;

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};

use crate::core::config::Settings;
use crate::core::resilience::{ResilienceError, RetryExecutor, RetryPolicy, Retryable};

pub(crate) async fn init_pool(settings: &Settings) -> Result<PgPool, sqlx::Error> {
    let database_url = settings.database().database_url();
    let mut connect_options: PgConnectOptions = database_url.parse()?;

    connect_options = connect_options
        .application_name("mentor-notify")
        .log_statements(tracing::log::LevelFilter::Off);

    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .test_before_acquire(true)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                // Timestamps cross the boundary in UTC only.
                sqlx::query("SET TIME ZONE 'UTC'").execute(conn).await?;
                Ok(())
            })
        })
        .connect_with(connect_options)
        .await
}

/// Startup connect that rides out a database that is still coming up.
pub(crate) async fn connect_with_retry(settings: &Settings) -> anyhow::Result<PgPool> {
    let executor = RetryExecutor::new(
        "postgres_connect",
        RetryPolicy::from_settings(settings.outbound_retry()),
        None,
    );

    executor.run(|_attempt| init_pool(settings)).await.map_err(|err| match err {
        ResilienceError::Exhausted { attempts, last } => anyhow::Error::new(last)
            .context(format!("Failed to connect to Postgres after {attempts} attempts")),
        ResilienceError::NonRetryable(err) => {
            anyhow::Error::new(err).context("Failed to connect to Postgres")
        }
        ResilienceError::CircuitOpen { name } => anyhow::anyhow!("circuit '{name}' is open"),
    })
}

impl Retryable for sqlx::Error {
    fn is_retryable(&self) -> bool {
        matches!(self, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_))
    }
}

pub(crate) async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
