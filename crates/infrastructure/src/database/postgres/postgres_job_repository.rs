use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{
    models::{BlockStrategy, JobInfo, MisfireStrategy, RouteStrategy, ScheduleType},
    traits::JobRepository,
    SchedulerError, SchedulerResult,
};
use sqlx::{PgPool, Row};
use tracing::debug;

use super::parse_column;

const JOB_COLUMNS: &str = "id, job_group, job_desc, alarm_email, schedule_type, schedule_conf, \
     misfire_strategy, executor_route_strategy, executor_handler, executor_param, \
     executor_block_strategy, executor_timeout, executor_fail_retry_count, child_job_ids, \
     trigger_status, trigger_last_time, trigger_next_time";

/// PostgreSQL任务仓储实现
pub struct PostgresJobRepository {
    pool: PgPool,
}

impl PostgresJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> SchedulerResult<JobInfo> {
        let schedule_type: String = row.try_get("schedule_type")?;
        let misfire_strategy: String = row.try_get("misfire_strategy")?;
        let route_strategy: String = row.try_get("executor_route_strategy")?;
        let block_strategy: String = row.try_get("executor_block_strategy")?;

        Ok(JobInfo {
            id: row.try_get("id")?,
            job_group: row.try_get("job_group")?,
            job_desc: row.try_get("job_desc")?,
            alarm_email: row.try_get("alarm_email")?,
            schedule_type: parse_column(&schedule_type, "schedule_type", ScheduleType::parse)?,
            schedule_conf: row.try_get("schedule_conf")?,
            misfire_strategy: parse_column(
                &misfire_strategy,
                "misfire_strategy",
                MisfireStrategy::parse,
            )?,
            executor_route_strategy: parse_column(
                &route_strategy,
                "executor_route_strategy",
                RouteStrategy::parse,
            )?,
            executor_handler: row.try_get("executor_handler")?,
            executor_param: row.try_get("executor_param")?,
            executor_block_strategy: parse_column(
                &block_strategy,
                "executor_block_strategy",
                BlockStrategy::parse,
            )?,
            executor_timeout: row.try_get("executor_timeout")?,
            executor_fail_retry_count: row.try_get("executor_fail_retry_count")?,
            child_job_ids: row.try_get("child_job_ids")?,
            trigger_status: row.try_get("trigger_status")?,
            trigger_last_time: row.try_get("trigger_last_time")?,
            trigger_next_time: row.try_get("trigger_next_time")?,
        })
    }
}

#[async_trait]
impl JobRepository for PostgresJobRepository {
    async fn create(&self, job: &JobInfo) -> SchedulerResult<JobInfo> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO job_info (job_group, job_desc, alarm_email, schedule_type, schedule_conf,
                misfire_strategy, executor_route_strategy, executor_handler, executor_param,
                executor_block_strategy, executor_timeout, executor_fail_retry_count, child_job_ids,
                trigger_status, trigger_last_time, trigger_next_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.job_group)
        .bind(&job.job_desc)
        .bind(&job.alarm_email)
        .bind(job.schedule_type.as_str())
        .bind(&job.schedule_conf)
        .bind(job.misfire_strategy.as_str())
        .bind(job.executor_route_strategy.as_str())
        .bind(&job.executor_handler)
        .bind(&job.executor_param)
        .bind(job.executor_block_strategy.as_str())
        .bind(job.executor_timeout)
        .bind(job.executor_fail_retry_count)
        .bind(&job.child_job_ids)
        .bind(job.trigger_status)
        .bind(job.trigger_last_time)
        .bind(job.trigger_next_time)
        .fetch_one(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        let created = Self::row_to_job(&row)?;
        debug!("创建任务成功: {}", created.id);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<JobInfo>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM job_info WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn update(&self, job: &JobInfo) -> SchedulerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE job_info SET job_group = $2, job_desc = $3, alarm_email = $4,
                schedule_type = $5, schedule_conf = $6, misfire_strategy = $7,
                executor_route_strategy = $8, executor_handler = $9, executor_param = $10,
                executor_block_strategy = $11, executor_timeout = $12,
                executor_fail_retry_count = $13, child_job_ids = $14, trigger_status = $15,
                trigger_last_time = $16, trigger_next_time = $17
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.job_group)
        .bind(&job.job_desc)
        .bind(&job.alarm_email)
        .bind(job.schedule_type.as_str())
        .bind(&job.schedule_conf)
        .bind(job.misfire_strategy.as_str())
        .bind(job.executor_route_strategy.as_str())
        .bind(&job.executor_handler)
        .bind(&job.executor_param)
        .bind(job.executor_block_strategy.as_str())
        .bind(job.executor_timeout)
        .bind(job.executor_fail_retry_count)
        .bind(&job.child_job_ids)
        .bind(job.trigger_status)
        .bind(job.trigger_last_time)
        .bind(job.trigger_next_time)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::JobNotFound { id: job.id });
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> SchedulerResult<()> {
        let result = sqlx::query("DELETE FROM job_info WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::JobNotFound { id });
        }
        debug!("删除任务成功: {}", id);
        Ok(())
    }

    async fn schedule_job_query(
        &self,
        max_next_time: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<JobInfo>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM job_info
            WHERE trigger_status = TRUE AND trigger_next_time <= $1
            ORDER BY trigger_next_time ASC, id ASC
            LIMIT $2
            "#
        ))
        .bind(max_next_time)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn schedule_update(&self, jobs: &[JobInfo]) -> SchedulerResult<()> {
        if jobs.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(SchedulerError::Database)?;
        for job in jobs {
            sqlx::query(
                r#"
                UPDATE job_info
                SET trigger_status = $2, trigger_last_time = $3, trigger_next_time = $4
                WHERE id = $1
                "#,
            )
            .bind(job.id)
            .bind(job.trigger_status)
            .bind(job.trigger_last_time)
            .bind(job.trigger_next_time)
            .execute(&mut *tx)
            .await
            .map_err(SchedulerError::Database)?;
        }
        tx.commit().await.map_err(SchedulerError::Database)?;

        debug!("批量回写调度状态: {} 个任务", jobs.len());
        Ok(())
    }
}
