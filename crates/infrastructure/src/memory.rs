//! 进程内存储实现
//!
//! 实现全部仓储接口和集群锁，用于 `memory://` 嵌入式运行和单元测试。
//! 所有表放在同一把异步锁下，单个调用内的读改写是原子的。

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use scheduler_core::{
    models::{
        AddressType, AlarmStatus, ExecutionStatus, JobGroup, JobInfo, JobLog, LogReport,
        Registration, RegistryType,
    },
    traits::{
        ClusterLock, JobGroupRepository, JobLogRepository, JobRepository, LogReportRepository,
        RegistryRepository,
    },
    SchedulerError, SchedulerResult,
};

#[derive(Default)]
struct MemoryTables {
    jobs: BTreeMap<i64, JobInfo>,
    groups: BTreeMap<i64, JobGroup>,
    registrations: Vec<Registration>,
    logs: BTreeMap<i64, JobLog>,
    reports: BTreeMap<NaiveDate, LogReport>,
    next_job_id: i64,
    next_group_id: i64,
    next_registration_id: i64,
    next_log_id: i64,
}

impl MemoryTables {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }
}

/// 内存存储，克隆后共享同一份数据
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<MemoryTables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前全部日志（测试辅助）
    pub async fn all_logs(&self) -> Vec<JobLog> {
        self.tables.lock().await.logs.values().cloned().collect()
    }

    /// 当前全部注册记录（测试辅助）
    pub async fn all_registrations(&self) -> Vec<Registration> {
        self.tables.lock().await.registrations.clone()
    }
}

#[async_trait]
impl JobRepository for InMemoryStore {
    async fn create(&self, job: &JobInfo) -> SchedulerResult<JobInfo> {
        let mut tables = self.tables.lock().await;
        let mut new_job = job.clone();
        new_job.id = MemoryTables::next_id(&mut tables.next_job_id);
        tables.jobs.insert(new_job.id, new_job.clone());
        Ok(new_job)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<JobInfo>> {
        Ok(self.tables.lock().await.jobs.get(&id).cloned())
    }

    async fn update(&self, job: &JobInfo) -> SchedulerResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(SchedulerError::JobNotFound { id: job.id }),
        }
    }

    async fn delete(&self, id: i64) -> SchedulerResult<()> {
        self.tables
            .lock()
            .await
            .jobs
            .remove(&id)
            .map(|_| ())
            .ok_or(SchedulerError::JobNotFound { id })
    }

    async fn schedule_job_query(
        &self,
        max_next_time: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<JobInfo>> {
        let tables = self.tables.lock().await;
        let mut jobs: Vec<JobInfo> = tables
            .jobs
            .values()
            .filter(|job| {
                job.trigger_status
                    && job
                        .trigger_next_time
                        .map(|next| next <= max_next_time)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.trigger_next_time, job.id));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn schedule_update(&self, jobs: &[JobInfo]) -> SchedulerResult<()> {
        let mut tables = self.tables.lock().await;
        for job in jobs {
            // 调度期间被删除的任务直接忽略
            if let Some(existing) = tables.jobs.get_mut(&job.id) {
                existing.trigger_status = job.trigger_status;
                existing.trigger_last_time = job.trigger_last_time;
                existing.trigger_next_time = job.trigger_next_time;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobGroupRepository for InMemoryStore {
    async fn create(&self, group: &JobGroup) -> SchedulerResult<JobGroup> {
        let mut tables = self.tables.lock().await;
        let mut new_group = group.clone();
        new_group.id = MemoryTables::next_id(&mut tables.next_group_id);
        tables.groups.insert(new_group.id, new_group.clone());
        Ok(new_group)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<JobGroup>> {
        Ok(self.tables.lock().await.groups.get(&id).cloned())
    }

    async fn find_all(&self) -> SchedulerResult<Vec<JobGroup>> {
        Ok(self.tables.lock().await.groups.values().cloned().collect())
    }

    async fn find_by_address_type(
        &self,
        address_type: AddressType,
    ) -> SchedulerResult<Vec<JobGroup>> {
        Ok(self
            .tables
            .lock()
            .await
            .groups
            .values()
            .filter(|group| group.address_type == address_type)
            .cloned()
            .collect())
    }

    async fn update_address_list(
        &self,
        id: i64,
        address_list: &[String],
        update_time: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let mut tables = self.tables.lock().await;
        let group = tables
            .groups
            .get_mut(&id)
            .ok_or(SchedulerError::JobGroupNotFound { id })?;
        group.address_list = address_list.to_vec();
        group.update_time = update_time;
        Ok(())
    }
}

#[async_trait]
impl RegistryRepository for InMemoryStore {
    async fn save_or_update(
        &self,
        registry_group: RegistryType,
        registry_key: &str,
        registry_value: &str,
        update_time: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let mut tables = self.tables.lock().await;
        let existing = tables.registrations.iter().position(|r| {
            r.registry_group == registry_group
                && r.registry_key == registry_key
                && r.registry_value == registry_value
        });

        match existing {
            Some(index) => tables.registrations[index].update_time = update_time,
            None => {
                let id = MemoryTables::next_id(&mut tables.next_registration_id);
                tables.registrations.push(Registration {
                    id,
                    registry_group,
                    registry_key: registry_key.to_string(),
                    registry_value: registry_value.to_string(),
                    update_time,
                });
            }
        }
        Ok(())
    }

    async fn delete(
        &self,
        registry_group: RegistryType,
        registry_key: &str,
        registry_value: &str,
    ) -> SchedulerResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.registrations.len();
        tables.registrations.retain(|r| {
            !(r.registry_group == registry_group
                && r.registry_key == registry_key
                && r.registry_value == registry_value)
        });
        Ok((before - tables.registrations.len()) as u64)
    }

    async fn remove_dead(&self, dead_before: DateTime<Utc>) -> SchedulerResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.registrations.len();
        tables
            .registrations
            .retain(|r| r.update_time >= dead_before);
        Ok((before - tables.registrations.len()) as u64)
    }

    async fn find_live(&self, alive_after: DateTime<Utc>) -> SchedulerResult<Vec<Registration>> {
        Ok(self
            .tables
            .lock()
            .await
            .registrations
            .iter()
            .filter(|r| r.update_time >= alive_after)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl JobLogRepository for InMemoryStore {
    async fn create(&self, log: &JobLog) -> SchedulerResult<i64> {
        let mut tables = self.tables.lock().await;
        let id = MemoryTables::next_id(&mut tables.next_log_id);
        let mut new_log = log.clone();
        new_log.id = id;
        tables.logs.insert(id, new_log);
        Ok(id)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<JobLog>> {
        Ok(self.tables.lock().await.logs.get(&id).cloned())
    }

    async fn update_trigger_info(&self, log: &JobLog) -> SchedulerResult<()> {
        let mut tables = self.tables.lock().await;
        let existing = tables
            .logs
            .get_mut(&log.id)
            .ok_or(SchedulerError::JobLogNotFound { id: log.id })?;
        existing.trigger_time = log.trigger_time;
        existing.trigger_code = log.trigger_code;
        existing.trigger_msg = log.trigger_msg.clone();
        existing.executor_address = log.executor_address.clone();
        existing.executor_handler = log.executor_handler.clone();
        existing.executor_param = log.executor_param.clone();
        existing.executor_sharding_param = log.executor_sharding_param.clone();
        existing.executor_fail_retry_count = log.executor_fail_retry_count;
        Ok(())
    }

    async fn update_handle_info(&self, log: &JobLog) -> SchedulerResult<()> {
        let mut tables = self.tables.lock().await;
        let existing = tables
            .logs
            .get_mut(&log.id)
            .ok_or(SchedulerError::JobLogNotFound { id: log.id })?;
        existing.handle_time = log.handle_time;
        existing.handle_code = log.handle_code;
        existing.handle_msg = log.handle_msg.clone();
        Ok(())
    }

    async fn update_alarm_status(
        &self,
        id: i64,
        expected: AlarmStatus,
        new_status: AlarmStatus,
    ) -> SchedulerResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.logs.get_mut(&id) {
            Some(log) if log.alarm_status == expected => {
                log.alarm_status = new_status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_fail_job_log_ids(&self, limit: usize) -> SchedulerResult<Vec<i64>> {
        Ok(self
            .tables
            .lock()
            .await
            .logs
            .values()
            .filter(|log| {
                log.alarm_status == AlarmStatus::Default
                    && log.execution_status() == ExecutionStatus::Fail
            })
            .map(|log| log.id)
            .take(limit)
            .collect())
    }

    async fn find_running_before(
        &self,
        trigger_before: DateTime<Utc>,
    ) -> SchedulerResult<Vec<JobLog>> {
        Ok(self
            .tables
            .lock()
            .await
            .logs
            .values()
            .filter(|log| log.is_awaiting_result() && log.trigger_time < trigger_before)
            .cloned()
            .collect())
    }

    async fn count_report(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SchedulerResult<LogReport> {
        let tables = self.tables.lock().await;
        let mut report = LogReport::empty(from.date_naive());
        for log in tables
            .logs
            .values()
            .filter(|log| log.trigger_time >= from && log.trigger_time < to)
        {
            match log.execution_status() {
                ExecutionStatus::Running => report.running_count += 1,
                ExecutionStatus::Success => report.suc_count += 1,
                ExecutionStatus::Fail => report.fail_count += 1,
            }
        }
        Ok(report)
    }

    async fn clear_before(
        &self,
        before: DateTime<Utc>,
        _batch_size: usize,
    ) -> SchedulerResult<u64> {
        let mut tables = self.tables.lock().await;
        let count = tables.logs.len();
        tables.logs.retain(|_, log| log.trigger_time >= before);
        Ok((count - tables.logs.len()) as u64)
    }
}

#[async_trait]
impl LogReportRepository for InMemoryStore {
    async fn save_or_update(&self, report: &LogReport) -> SchedulerResult<()> {
        self.tables
            .lock()
            .await
            .reports
            .insert(report.trigger_day, report.clone());
        Ok(())
    }

    async fn get(&self, trigger_day: NaiveDate) -> SchedulerResult<Option<LogReport>> {
        Ok(self.tables.lock().await.reports.get(&trigger_day).cloned())
    }

    async fn find_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> SchedulerResult<Vec<LogReport>> {
        Ok(self
            .tables
            .lock()
            .await
            .reports
            .range(from..=to)
            .map(|(_, report)| report.clone())
            .collect())
    }

    async fn delete_before(&self, before: NaiveDate) -> SchedulerResult<u64> {
        let mut tables = self.tables.lock().await;
        let count = tables.reports.len();
        tables.reports.retain(|day, _| *day >= before);
        Ok((count - tables.reports.len()) as u64)
    }
}

/// 进程内集群锁
///
/// 仅在单进程内互斥，供嵌入式运行和测试使用。
#[derive(Clone, Default)]
pub struct InMemoryClusterLock {
    held: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryClusterLock {
    const POLL_INTERVAL: Duration = Duration::from_millis(10);

    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_held(&self, scope: &str) -> bool {
        self.held.lock().await.contains(scope)
    }
}

#[async_trait]
impl ClusterLock for InMemoryClusterLock {
    async fn acquire(&self, scope: &str, timeout: Duration) -> SchedulerResult<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.held.lock().await.insert(scope.to_string()) {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Self::POLL_INTERVAL).await;
        }
    }

    async fn release(&self, scope: &str) -> SchedulerResult<()> {
        self.held.lock().await.remove(scope);
        Ok(())
    }
}
