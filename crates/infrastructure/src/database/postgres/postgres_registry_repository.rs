use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{
    models::{Registration, RegistryType},
    traits::RegistryRepository,
    SchedulerError, SchedulerResult,
};
use sqlx::{PgPool, Row};
use tracing::debug;

use super::parse_column;

/// PostgreSQL注册心跳仓储实现
pub struct PostgresRegistryRepository {
    pool: PgPool,
}

impl PostgresRegistryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_registration(row: &sqlx::postgres::PgRow) -> SchedulerResult<Registration> {
        let registry_group: String = row.try_get("registry_group")?;
        Ok(Registration {
            id: row.try_get("id")?,
            registry_group: parse_column(&registry_group, "registry_group", RegistryType::parse)?,
            registry_key: row.try_get("registry_key")?,
            registry_value: row.try_get("registry_value")?,
            update_time: row.try_get("update_time")?,
        })
    }
}

#[async_trait]
impl RegistryRepository for PostgresRegistryRepository {
    async fn save_or_update(
        &self,
        registry_group: RegistryType,
        registry_key: &str,
        registry_value: &str,
        update_time: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO job_registry (registry_group, registry_key, registry_value, update_time)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (registry_group, registry_key, registry_value)
            DO UPDATE SET update_time = EXCLUDED.update_time
            "#,
        )
        .bind(registry_group.as_str())
        .bind(registry_key)
        .bind(registry_value)
        .bind(update_time)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        debug!("刷新注册心跳: {} {}", registry_key, registry_value);
        Ok(())
    }

    async fn delete(
        &self,
        registry_group: RegistryType,
        registry_key: &str,
        registry_value: &str,
    ) -> SchedulerResult<u64> {
        let result = sqlx::query(
            "DELETE FROM job_registry WHERE registry_group = $1 AND registry_key = $2 AND registry_value = $3",
        )
        .bind(registry_group.as_str())
        .bind(registry_key)
        .bind(registry_value)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Ok(result.rows_affected())
    }

    async fn remove_dead(&self, dead_before: DateTime<Utc>) -> SchedulerResult<u64> {
        let result = sqlx::query("DELETE FROM job_registry WHERE update_time < $1")
            .bind(dead_before)
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        Ok(result.rows_affected())
    }

    async fn find_live(&self, alive_after: DateTime<Utc>) -> SchedulerResult<Vec<Registration>> {
        let rows = sqlx::query(
            r#"
            SELECT id, registry_group, registry_key, registry_value, update_time
            FROM job_registry WHERE update_time >= $1
            ORDER BY registry_key, registry_value
            "#,
        )
        .bind(alive_after)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_registration).collect()
    }
}
