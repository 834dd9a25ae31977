//! Persistence: entities, storage traits, Postgres repositories and in-memory stores.

pub mod error;
#[cfg(feature = "database")]
pub mod gateway_config_repository;
pub mod memory;
pub mod models;
pub mod repository;
#[cfg(feature = "database")]
pub mod transaction_repository;

#[cfg(feature = "database")]
pub use postgres::*;

#[cfg(feature = "database")]
mod postgres {
    use super::error::{DatabaseError, DatabaseErrorKind};
    use crate::config::DatabaseConfig;
    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;
    use std::time::Duration;
    use tracing::{error as log_error, info, warn};

    const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
    const MAX_LIFETIME: Duration = Duration::from_secs(1800);

    fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .idle_timeout(Duration::from_secs(
                config.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
            ))
            .max_lifetime(MAX_LIFETIME)
    }

    /// Open the ledger pool and bring the schema up to date.
    pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "connecting to ledger database"
        );

        let pool = pool_options(config)
            .connect(&config.url)
            .await
            .map_err(|e| {
                log_error!(error = %e, "failed to open ledger database pool");
                DatabaseError::from_sqlx(e)
            })?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            log_error!(error = %e, "ledger migrations failed");
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("migration failed: {}", e),
            })
        })?;

        info!("ledger database ready");
        Ok(pool)
    }

    /// `SELECT 1` against the pool, used by the health endpoint.
    pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(pool).await.map_err(|e| {
            warn!(error = %e, "ledger database ping failed");
            DatabaseError::from_sqlx(e)
        })?;

        Ok(())
    }
}
