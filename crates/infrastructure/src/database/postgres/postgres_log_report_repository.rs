use async_trait::async_trait;
use chrono::NaiveDate;
use scheduler_core::{
    models::LogReport, traits::LogReportRepository, SchedulerError, SchedulerResult,
};
use sqlx::{PgPool, Row};

/// PostgreSQL调度报表仓储实现
pub struct PostgresLogReportRepository {
    pool: PgPool,
}

impl PostgresLogReportRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_report(row: &sqlx::postgres::PgRow) -> SchedulerResult<LogReport> {
        Ok(LogReport {
            trigger_day: row.try_get("trigger_day")?,
            running_count: row.try_get("running_count")?,
            suc_count: row.try_get("suc_count")?,
            fail_count: row.try_get("fail_count")?,
        })
    }
}

#[async_trait]
impl LogReportRepository for PostgresLogReportRepository {
    async fn save_or_update(&self, report: &LogReport) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO job_log_report (trigger_day, running_count, suc_count, fail_count)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (trigger_day) DO UPDATE SET
                running_count = EXCLUDED.running_count,
                suc_count = EXCLUDED.suc_count,
                fail_count = EXCLUDED.fail_count
            "#,
        )
        .bind(report.trigger_day)
        .bind(report.running_count)
        .bind(report.suc_count)
        .bind(report.fail_count)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Ok(())
    }

    async fn get(&self, trigger_day: NaiveDate) -> SchedulerResult<Option<LogReport>> {
        let row = sqlx::query(
            "SELECT trigger_day, running_count, suc_count, fail_count FROM job_log_report WHERE trigger_day = $1",
        )
        .bind(trigger_day)
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        row.as_ref().map(Self::row_to_report).transpose()
    }

    async fn find_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> SchedulerResult<Vec<LogReport>> {
        let rows = sqlx::query(
            r#"
            SELECT trigger_day, running_count, suc_count, fail_count FROM job_log_report
            WHERE trigger_day BETWEEN $1 AND $2 ORDER BY trigger_day
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_report).collect()
    }

    async fn delete_before(&self, before: NaiveDate) -> SchedulerResult<u64> {
        let result = sqlx::query("DELETE FROM job_log_report WHERE trigger_day < $1")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        Ok(result.rows_affected())
    }
}
