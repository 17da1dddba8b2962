use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{
    models::{AddressType, JobGroup},
    traits::JobGroupRepository,
    SchedulerError, SchedulerResult,
};
use sqlx::{PgPool, Row};
use tracing::debug;

use super::parse_column;

/// PostgreSQL执行器分组仓储实现
pub struct PostgresJobGroupRepository {
    pool: PgPool,
}

impl PostgresJobGroupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_group(row: &sqlx::postgres::PgRow) -> SchedulerResult<JobGroup> {
        let address_type: String = row.try_get("address_type")?;
        Ok(JobGroup {
            id: row.try_get("id")?,
            app_name: row.try_get("app_name")?,
            title: row.try_get("title")?,
            address_type: parse_column(&address_type, "address_type", AddressType::parse)?,
            address_list: row.try_get("address_list")?,
            update_time: row.try_get("update_time")?,
        })
    }
}

#[async_trait]
impl JobGroupRepository for PostgresJobGroupRepository {
    async fn create(&self, group: &JobGroup) -> SchedulerResult<JobGroup> {
        let row = sqlx::query(
            r#"
            INSERT INTO job_group (app_name, title, address_type, address_list, update_time)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, app_name, title, address_type, address_list, update_time
            "#,
        )
        .bind(&group.app_name)
        .bind(&group.title)
        .bind(group.address_type.as_str())
        .bind(&group.address_list)
        .bind(group.update_time)
        .fetch_one(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        let created = Self::row_to_group(&row)?;
        debug!("创建执行器分组成功: {} ({})", created.app_name, created.id);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<JobGroup>> {
        let row = sqlx::query(
            "SELECT id, app_name, title, address_type, address_list, update_time FROM job_group WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        row.as_ref().map(Self::row_to_group).transpose()
    }

    async fn find_all(&self) -> SchedulerResult<Vec<JobGroup>> {
        let rows = sqlx::query(
            "SELECT id, app_name, title, address_type, address_list, update_time FROM job_group ORDER BY app_name, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_group).collect()
    }

    async fn find_by_address_type(
        &self,
        address_type: AddressType,
    ) -> SchedulerResult<Vec<JobGroup>> {
        let rows = sqlx::query(
            "SELECT id, app_name, title, address_type, address_list, update_time FROM job_group WHERE address_type = $1 ORDER BY id",
        )
        .bind(address_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_group).collect()
    }

    async fn update_address_list(
        &self,
        id: i64,
        address_list: &[String],
        update_time: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let result =
            sqlx::query("UPDATE job_group SET address_list = $2, update_time = $3 WHERE id = $1")
                .bind(id)
                .bind(address_list)
                .bind(update_time)
                .execute(&self.pool)
                .await
                .map_err(SchedulerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::JobGroupNotFound { id });
        }
        Ok(())
    }
}
