use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use scheduler_core::{
    traits::{JobLogRepository, LogReportRepository},
    SchedulerResult,
};
use scheduler_infrastructure::StructuredLogger;
use tracing::{debug, info};

use crate::lifecycle::StopSignal;

/// 每轮刷新的天数：今天和前两天
const REPORT_DAYS: i64 = 3;
/// 日志清理每批删除的行数
const CLEAR_BATCH_SIZE: usize = 1000;

/// 日志报表与清理
///
/// 周期性按天汇总调度日志到报表表；配置了保留天数时每天清理一次过期日志和报表。
pub struct LogReportAggregator {
    log_repo: Arc<dyn JobLogRepository>,
    report_repo: Arc<dyn LogReportRepository>,
    log_retention_days: Option<i64>,
    report_retention_days: i64,
    interval: Duration,
    last_clean: Mutex<Option<DateTime<Utc>>>,
}

impl LogReportAggregator {
    pub fn new(
        log_repo: Arc<dyn JobLogRepository>,
        report_repo: Arc<dyn LogReportRepository>,
        log_retention_days: Option<i64>,
        report_retention_days: i64,
        interval: Duration,
    ) -> Self {
        Self {
            log_repo,
            report_repo,
            log_retention_days,
            report_retention_days,
            interval,
            last_clean: Mutex::new(None),
        }
    }

    fn day_start(day: NaiveDate) -> DateTime<Utc> {
        day.and_time(NaiveTime::MIN).and_utc()
    }

    /// 刷新最近几天的报表
    pub async fn refresh_reports(&self, now: DateTime<Utc>) -> SchedulerResult<()> {
        let today = now.date_naive();
        for offset in 0..REPORT_DAYS {
            let day = today - chrono::Duration::days(offset);
            let from = Self::day_start(day);
            let to = from + chrono::Duration::days(1);

            let mut report = self.log_repo.count_report(from, to).await?;
            report.trigger_day = day;
            self.report_repo.save_or_update(&report).await?;
            debug!(
                "刷新 {} 调度报表: 运行中 {}，成功 {}，失败 {}",
                day, report.running_count, report.suc_count, report.fail_count
            );
        }
        Ok(())
    }

    /// 距上次清理超过一天时清理过期日志和报表，返回删除的日志数
    pub async fn clean_expired(&self, now: DateTime<Utc>) -> SchedulerResult<u64> {
        let Some(retention_days) = self.log_retention_days else {
            return Ok(0);
        };

        let due = {
            let last_clean = self
                .last_clean
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            last_clean.map_or(true, |last| now - last >= chrono::Duration::days(1))
        };
        if !due {
            return Ok(0);
        }

        let before = Self::day_start(now.date_naive()) - chrono::Duration::days(retention_days);
        let removed = self.log_repo.clear_before(before, CLEAR_BATCH_SIZE).await?;

        if self.report_retention_days > 0 {
            let report_before = now.date_naive() - chrono::Duration::days(self.report_retention_days);
            self.report_repo.delete_before(report_before).await?;
        }

        *self
            .last_clean
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(now);
        if removed > 0 {
            info!("清理 {} 条 {} 之前的调度日志", removed, before);
        }
        Ok(removed)
    }

    pub async fn run(&self, stop: StopSignal) {
        info!("调度报表线程启动");
        while !stop.is_stopped() {
            let now = Utc::now();
            if let Err(e) = self.refresh_reports(now).await {
                StructuredLogger::log_system_error("log_report", "refresh", &e);
            }
            if let Err(e) = self.clean_expired(now).await {
                StructuredLogger::log_system_error("log_report", "clean", &e);
            }
            if stop.sleep(self.interval).await {
                break;
            }
        }
        info!("调度报表线程停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use scheduler_core::models::{JobLog, LogReport, CODE_FAIL, CODE_SUCCESS};
    use scheduler_infrastructure::InMemoryStore;

    fn aggregator(store: &InMemoryStore, retention: Option<i64>, report_retention: i64) -> LogReportAggregator {
        LogReportAggregator::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            retention,
            report_retention,
            Duration::from_secs(60),
        )
    }

    async fn insert_log(store: &InMemoryStore, time: DateTime<Utc>, trigger: i32, handle: i32) {
        let mut log = JobLog::new(1, 1, time);
        log.id = JobLogRepository::create(store, &log).await.unwrap();
        log.trigger_code = trigger;
        log.handle_code = handle;
        JobLogRepository::update_trigger_info(store, &log).await.unwrap();
        JobLogRepository::update_handle_info(store, &log).await.unwrap();
    }

    #[tokio::test]
    async fn test_reports_cover_today_and_two_previous_days() {
        let store = InMemoryStore::new();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        insert_log(&store, now, CODE_SUCCESS, 0).await;
        insert_log(&store, now, CODE_SUCCESS, CODE_SUCCESS).await;
        insert_log(&store, now - chrono::Duration::days(2), CODE_FAIL, 0).await;
        insert_log(&store, now - chrono::Duration::days(5), CODE_FAIL, 0).await;

        aggregator(&store, None, 0).refresh_reports(now).await.unwrap();

        let today = store.get(now.date_naive()).await.unwrap().unwrap();
        assert_eq!(today.running_count, 1);
        assert_eq!(today.suc_count, 1);
        let two_days_ago = store
            .get(now.date_naive() - chrono::Duration::days(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(two_days_ago.fail_count, 1);
        assert_eq!(
            store
                .get(now.date_naive() - chrono::Duration::days(1))
                .await
                .unwrap(),
            Some(LogReport::empty(now.date_naive() - chrono::Duration::days(1)))
        );
        assert!(store
            .get(now.date_naive() - chrono::Duration::days(5))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cleanup_runs_once_per_day() {
        let store = InMemoryStore::new();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        insert_log(&store, now - chrono::Duration::days(40), CODE_FAIL, 0).await;
        insert_log(&store, now - chrono::Duration::days(1), CODE_FAIL, 0).await;

        let aggregator = aggregator(&store, Some(30), 0);
        assert_eq!(aggregator.clean_expired(now).await.unwrap(), 1);
        assert_eq!(store.all_logs().await.len(), 1);

        insert_log(&store, now - chrono::Duration::days(40), CODE_FAIL, 0).await;
        assert_eq!(
            aggregator
                .clean_expired(now + chrono::Duration::hours(1))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            aggregator
                .clean_expired(now + chrono::Duration::days(1))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_cleanup_disabled_without_retention() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        insert_log(&store, now - chrono::Duration::days(400), CODE_FAIL, 0).await;
        assert_eq!(aggregator(&store, None, 0).clean_expired(now).await.unwrap(), 0);
        assert_eq!(store.all_logs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_report_retention() {
        let store = InMemoryStore::new();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let old_day = now.date_naive() - chrono::Duration::days(100);
        LogReportRepository::save_or_update(&store, &LogReport::empty(old_day))
            .await
            .unwrap();

        aggregator(&store, Some(30), 90).clean_expired(now).await.unwrap();
        assert!(store.get(old_day).await.unwrap().is_none());
    }
}
