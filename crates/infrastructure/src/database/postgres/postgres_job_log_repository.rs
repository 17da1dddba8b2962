use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{
    models::{AlarmStatus, JobLog, LogReport},
    traits::JobLogRepository,
    SchedulerError, SchedulerResult,
};
use sqlx::{PgPool, Row};
use tracing::debug;

const LOG_COLUMNS: &str = "id, job_group, job_id, executor_address, executor_handler, \
     executor_param, executor_sharding_param, executor_fail_retry_count, trigger_time, \
     trigger_code, trigger_msg, handle_time, handle_code, handle_msg, alarm_status";

/// 执行失败判定：触发失败，或执行结果既非未完成也非成功
const FAIL_CONDITION: &str = "(trigger_code = 500 OR handle_code NOT IN (0, 200))";

/// PostgreSQL调度日志仓储实现
pub struct PostgresJobLogRepository {
    pool: PgPool,
}

impl PostgresJobLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_log(row: &sqlx::postgres::PgRow) -> SchedulerResult<JobLog> {
        let alarm_code: i16 = row.try_get("alarm_status")?;
        let alarm_status = AlarmStatus::from_code(alarm_code).ok_or_else(|| {
            SchedulerError::DatabaseOperation(format!("未知的告警状态: {alarm_code}"))
        })?;

        Ok(JobLog {
            id: row.try_get("id")?,
            job_group: row.try_get("job_group")?,
            job_id: row.try_get("job_id")?,
            executor_address: row.try_get("executor_address")?,
            executor_handler: row.try_get("executor_handler")?,
            executor_param: row.try_get("executor_param")?,
            executor_sharding_param: row.try_get("executor_sharding_param")?,
            executor_fail_retry_count: row.try_get("executor_fail_retry_count")?,
            trigger_time: row.try_get("trigger_time")?,
            trigger_code: row.try_get("trigger_code")?,
            trigger_msg: row.try_get("trigger_msg")?,
            handle_time: row.try_get("handle_time")?,
            handle_code: row.try_get("handle_code")?,
            handle_msg: row.try_get("handle_msg")?,
            alarm_status,
        })
    }
}

#[async_trait]
impl JobLogRepository for PostgresJobLogRepository {
    async fn create(&self, log: &JobLog) -> SchedulerResult<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO job_log (job_group, job_id, executor_fail_retry_count, trigger_time,
                trigger_code, handle_code, alarm_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(log.job_group)
        .bind(log.job_id)
        .bind(log.executor_fail_retry_count)
        .bind(log.trigger_time)
        .bind(log.trigger_code)
        .bind(log.handle_code)
        .bind(log.alarm_status.code())
        .fetch_one(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Ok(row.try_get("id")?)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<JobLog>> {
        let row = sqlx::query(&format!("SELECT {LOG_COLUMNS} FROM job_log WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        row.as_ref().map(Self::row_to_log).transpose()
    }

    async fn update_trigger_info(&self, log: &JobLog) -> SchedulerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE job_log SET trigger_time = $2, trigger_code = $3, trigger_msg = $4,
                executor_address = $5, executor_handler = $6, executor_param = $7,
                executor_sharding_param = $8, executor_fail_retry_count = $9
            WHERE id = $1
            "#,
        )
        .bind(log.id)
        .bind(log.trigger_time)
        .bind(log.trigger_code)
        .bind(&log.trigger_msg)
        .bind(&log.executor_address)
        .bind(&log.executor_handler)
        .bind(&log.executor_param)
        .bind(&log.executor_sharding_param)
        .bind(log.executor_fail_retry_count)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::JobLogNotFound { id: log.id });
        }
        Ok(())
    }

    async fn update_handle_info(&self, log: &JobLog) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE job_log SET handle_time = $2, handle_code = $3, handle_msg = $4 WHERE id = $1",
        )
        .bind(log.id)
        .bind(log.handle_time)
        .bind(log.handle_code)
        .bind(&log.handle_msg)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::JobLogNotFound { id: log.id });
        }
        Ok(())
    }

    async fn update_alarm_status(
        &self,
        id: i64,
        expected: AlarmStatus,
        new_status: AlarmStatus,
    ) -> SchedulerResult<bool> {
        let result =
            sqlx::query("UPDATE job_log SET alarm_status = $3 WHERE id = $1 AND alarm_status = $2")
                .bind(id)
                .bind(expected.code())
                .bind(new_status.code())
                .execute(&self.pool)
                .await
                .map_err(SchedulerError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_fail_job_log_ids(&self, limit: usize) -> SchedulerResult<Vec<i64>> {
        let rows = sqlx::query(&format!(
            "SELECT id FROM job_log WHERE alarm_status = 0 AND {FAIL_CONDITION} ORDER BY id ASC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter()
            .map(|row| row.try_get::<i64, _>("id").map_err(SchedulerError::Database))
            .collect()
    }

    async fn find_running_before(
        &self,
        trigger_before: DateTime<Utc>,
    ) -> SchedulerResult<Vec<JobLog>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LOG_COLUMNS} FROM job_log
            WHERE trigger_code <> 500 AND handle_code = 0 AND trigger_time < $1
            ORDER BY id ASC
            "#
        ))
        .bind(trigger_before)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_log).collect()
    }

    async fn count_report(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SchedulerResult<LogReport> {
        let row = sqlx::query(&format!(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE trigger_code <> 500 AND handle_code = 0) AS running_count,
                COUNT(*) FILTER (WHERE trigger_code <> 500 AND handle_code = 200) AS suc_count,
                COUNT(*) FILTER (WHERE {FAIL_CONDITION}) AS fail_count
            FROM job_log
            WHERE trigger_time >= $1 AND trigger_time < $2
            "#
        ))
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Ok(LogReport {
            trigger_day: from.date_naive(),
            running_count: row.try_get("running_count")?,
            suc_count: row.try_get("suc_count")?,
            fail_count: row.try_get("fail_count")?,
        })
    }

    async fn clear_before(
        &self,
        before: DateTime<Utc>,
        batch_size: usize,
    ) -> SchedulerResult<u64> {
        let batch_size = batch_size.max(1);
        let mut total = 0u64;
        loop {
            let result = sqlx::query(
                r#"
                DELETE FROM job_log WHERE id IN (
                    SELECT id FROM job_log WHERE trigger_time < $1 ORDER BY id LIMIT $2
                )
                "#,
            )
            .bind(before)
            .bind(batch_size as i64)
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

            let deleted = result.rows_affected();
            total += deleted;
            if deleted < batch_size as u64 {
                break;
            }
        }

        debug!("清理过期调度日志: {} 条", total);
        Ok(total)
    }
}
