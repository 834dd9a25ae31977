use crate::database::error::DatabaseError;
use crate::database::models::GatewayConfig;
use crate::database::repository::GatewayConfigStore;
use async_trait::async_trait;
use sqlx::PgPool;

const GATEWAY_COLUMNS: &str = "id, name, is_active, is_sandbox, credentials, operational_config";

/// Repository for administrator-managed gateway configurations
pub struct GatewayConfigRepository {
    pool: PgPool,
}

impl GatewayConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Toggle a gateway on or off
    pub async fn set_active(
        &self,
        name: &str,
        is_active: bool,
    ) -> Result<Option<GatewayConfig>, DatabaseError> {
        sqlx::query_as::<_, GatewayConfig>(&format!(
            "UPDATE gateway_configs
             SET is_active = $2, updated_at = NOW()
             WHERE name = $1
             RETURNING {}",
            GATEWAY_COLUMNS
        ))
        .bind(name)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Create or replace the configuration for a gateway name
    pub async fn upsert(
        &self,
        name: &str,
        is_active: bool,
        is_sandbox: bool,
        credentials: serde_json::Value,
        operational_config: serde_json::Value,
    ) -> Result<GatewayConfig, DatabaseError> {
        sqlx::query_as::<_, GatewayConfig>(&format!(
            "INSERT INTO gateway_configs (name, is_active, is_sandbox, credentials, operational_config)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (name) DO UPDATE
             SET is_active = EXCLUDED.is_active,
                 is_sandbox = EXCLUDED.is_sandbox,
                 credentials = EXCLUDED.credentials,
                 operational_config = EXCLUDED.operational_config,
                 updated_at = NOW()
             RETURNING {}",
            GATEWAY_COLUMNS
        ))
        .bind(name)
        .bind(is_active)
        .bind(is_sandbox)
        .bind(credentials)
        .bind(operational_config)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl GatewayConfigStore for GatewayConfigRepository {
    /// Read on every payment so administrator toggles apply immediately
    async fn list_active(&self) -> Result<Vec<GatewayConfig>, DatabaseError> {
        sqlx::query_as::<_, GatewayConfig>(&format!(
            "SELECT {} FROM gateway_configs WHERE is_active = true ORDER BY id ASC",
            GATEWAY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<GatewayConfig>, DatabaseError> {
        sqlx::query_as::<_, GatewayConfig>(&format!(
            "SELECT {} FROM gateway_configs WHERE lower(name) = lower($1)",
            GATEWAY_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
