use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scheduler_core::{
    models::{ExecutorResponse, HandleCallbackParam, JobLog, TriggerType, CODE_FAIL, CODE_SUCCESS},
    traits::{JobLogRepository, JobRepository},
    SchedulerResult,
};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};
use tracing::{debug, info, warn};

use crate::lifecycle::StopSignal;
use crate::registry::RegistryTracker;
use crate::trigger_pool::{TriggerRequest, TriggerSubmitter};

/// 执行结果消息的最大长度（字符）
pub const MAX_HANDLE_MSG_CHARS: usize = 15000;

pub const LOG_NOT_FOUND_MSG: &str = "log item not found.";
pub const REPEATED_CALLBACK_MSG: &str = "log repeate callback.";
pub const RESULT_LOST_MSG: &str = "任务结果丢失：执行器心跳缺失或地址不可达，标记失败";

/// 执行结果处理
///
/// 接收执行器回调写入执行结果，成功时触发子任务；周期性扫描长时间无结果
/// 且执行器已下线的日志，标记为失败。触发信息未能回写的日志没有执行器地址，
/// 超过阈值后同样标记失败。
pub struct JobCompleter {
    job_repo: Arc<dyn JobRepository>,
    log_repo: Arc<dyn JobLogRepository>,
    submitter: Arc<dyn TriggerSubmitter>,
    registry: Arc<RegistryTracker>,
    lost_threshold: chrono::Duration,
    scan_interval: Duration,
    metrics: Arc<MetricsCollector>,
}

impl JobCompleter {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        log_repo: Arc<dyn JobLogRepository>,
        submitter: Arc<dyn TriggerSubmitter>,
        registry: Arc<RegistryTracker>,
        lost_threshold: chrono::Duration,
        scan_interval: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            job_repo,
            log_repo,
            submitter,
            registry,
            lost_threshold,
            scan_interval,
            metrics,
        }
    }

    /// 批量处理执行器回调，全部成功时返回成功
    pub async fn callback(
        &self,
        params: &[HandleCallbackParam],
        now: DateTime<Utc>,
    ) -> ExecutorResponse {
        let mut failures = Vec::new();
        for param in params {
            let response = self.callback_one(param, now).await;
            if !response.is_success() {
                failures.push(format!(
                    "{}: {}",
                    param.log_id,
                    response.msg.unwrap_or_default()
                ));
            }
        }

        if failures.is_empty() {
            ExecutorResponse::success()
        } else {
            ExecutorResponse::fail(failures.join("; "))
        }
    }

    /// 处理单条回调
    pub async fn callback_one(&self, param: &HandleCallbackParam, now: DateTime<Utc>) -> ExecutorResponse {
        let mut log = match self.log_repo.get_by_id(param.log_id).await {
            Ok(Some(log)) => log,
            Ok(None) => {
                warn!("回调的调度日志不存在: {}", param.log_id);
                return ExecutorResponse::fail(LOG_NOT_FOUND_MSG);
            }
            Err(e) => return ExecutorResponse::fail(e.to_string()),
        };
        if log.is_finished() {
            warn!("调度日志 {} 重复回调，已有结果 {}", log.id, log.handle_code);
            return ExecutorResponse::fail(REPEATED_CALLBACK_MSG);
        }

        log.handle_time = Some(now);
        log.handle_code = param.handle_code;
        log.handle_msg = param.handle_msg.clone();

        self.metrics.record_callback();
        StructuredLogger::log_job_callback(log.id, log.handle_code);

        match self.complete(&mut log).await {
            Ok(()) => ExecutorResponse::success(),
            Err(e) => ExecutorResponse::fail(e.to_string()),
        }
    }

    /// 写入执行结果，成功时先触发子任务并把结果追加到结果消息
    pub async fn complete(&self, log: &mut JobLog) -> SchedulerResult<()> {
        if log.handle_code == CODE_SUCCESS {
            if let Some(children_msg) = self.trigger_children(log).await? {
                let msg = log.handle_msg.get_or_insert_with(String::new);
                msg.push_str(&children_msg);
            }
        }

        if let Some(msg) = log.handle_msg.as_mut() {
            if msg.chars().count() > MAX_HANDLE_MSG_CHARS {
                *msg = msg.chars().take(MAX_HANDLE_MSG_CHARS).collect();
            }
        }

        self.log_repo.update_handle_info(log).await
    }

    async fn trigger_children(&self, log: &JobLog) -> SchedulerResult<Option<String>> {
        let Some(job) = self.job_repo.get_by_id(log.job_id).await? else {
            return Ok(None);
        };
        if job.child_job_ids.is_empty() {
            return Ok(None);
        }

        let total = job.child_job_ids.len();
        let mut msg = String::from("<br><br>>>>>>>>>>>>触发子任务<<<<<<<<<<<<br>");
        for (i, child_id) in job.child_job_ids.iter().enumerate() {
            let outcome = if self.job_repo.get_by_id(*child_id).await?.is_some() {
                match self
                    .submitter
                    .submit(TriggerRequest::new(*child_id, TriggerType::Parent))
                {
                    Ok(()) => "成功".to_string(),
                    Err(e) => format!("失败 ({e})"),
                }
            } else {
                "子任务不存在".to_string()
            };
            msg.push_str(&format!(
                "{}/{} [任务ID={}]，触发结果：{}<br>",
                i + 1,
                total,
                child_id,
                outcome
            ));
        }
        debug!("任务 {} 执行成功，触发子任务 {:?}", job.id, job.child_job_ids);
        Ok(Some(msg))
    }

    /// 扫描一次结果丢失的日志，返回标记失败的数量
    pub async fn scan_lost(&self, now: DateTime<Utc>) -> SchedulerResult<u64> {
        let candidates = self
            .log_repo
            .find_running_before(now - self.lost_threshold)
            .await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        let live = self.registry.live_addresses(now).await?;
        let mut marked = 0;
        for mut log in candidates {
            let executor_alive = log
                .executor_address
                .as_ref()
                .is_some_and(|address| live.contains(address));
            if executor_alive {
                continue;
            }

            log.handle_time = Some(now);
            log.handle_code = CODE_FAIL;
            log.handle_msg = Some(RESULT_LOST_MSG.to_string());
            self.complete(&mut log).await?;
            marked += 1;
        }

        if marked > 0 {
            info!("{} 条调度日志结果丢失，已标记为失败", marked);
            self.metrics.record_result_lost(marked);
        }
        Ok(marked)
    }

    /// 结果丢失扫描循环
    pub async fn run(&self, stop: StopSignal) {
        info!("任务结果丢失扫描线程启动");
        while !stop.is_stopped() {
            if let Err(e) = self.scan_lost(Utc::now()).await {
                StructuredLogger::log_system_error("complete_monitor", "scan_lost", &e);
            }
            if stop.sleep(self.scan_interval).await {
                break;
            }
        }
        info!("任务结果丢失扫描线程停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mocks::{seed_job, RecordingSubmitter};
    use scheduler_core::models::{ExecutionStatus, JobInfo, RegistryParam};
    use scheduler_infrastructure::InMemoryStore;

    struct Fixture {
        store: InMemoryStore,
        submitter: Arc<RecordingSubmitter>,
        registry: Arc<RegistryTracker>,
        completer: JobCompleter,
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let submitter = Arc::new(RecordingSubmitter::default());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let registry = Arc::new(RegistryTracker::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            chrono::Duration::seconds(90),
            Duration::from_secs(30),
            metrics.clone(),
        ));
        let completer = JobCompleter::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            submitter.clone(),
            registry.clone(),
            chrono::Duration::minutes(10),
            Duration::from_secs(60),
            metrics,
        );
        Fixture {
            store,
            submitter,
            registry,
            completer,
        }
    }

    async fn dispatched_log(
        store: &InMemoryStore,
        job: &JobInfo,
        address: &str,
        trigger_time: DateTime<Utc>,
    ) -> JobLog {
        let mut log = JobLog::new(job.job_group, job.id, trigger_time);
        log.id = JobLogRepository::create(store, &log).await.unwrap();
        log.trigger_code = CODE_SUCCESS;
        log.executor_address = Some(address.to_string());
        JobLogRepository::update_trigger_info(store, &log).await.unwrap();
        log
    }

    fn callback(log_id: i64, code: i32) -> HandleCallbackParam {
        HandleCallbackParam {
            log_id,
            log_date_time: Utc::now(),
            handle_code: code,
            handle_msg: Some("done".to_string()),
        }
    }

    #[tokio::test]
    async fn test_callback_records_result_and_triggers_children() {
        let f = fixture();
        let (group, child) = seed_job(&f.store, &["http://a"], |_| {}).await;
        let mut parent = JobInfo::new(group.id, "parentHandler");
        parent.child_job_ids = vec![child.id, 999];
        let parent = JobRepository::create(&f.store, &parent).await.unwrap();
        let log = dispatched_log(&f.store, &parent, "http://a", Utc::now()).await;

        let response = f
            .completer
            .callback(&[callback(log.id, CODE_SUCCESS)], Utc::now())
            .await;
        assert!(response.is_success());

        let saved = JobLogRepository::get_by_id(&f.store, log.id).await.unwrap().unwrap();
        assert_eq!(saved.handle_code, CODE_SUCCESS);
        let msg = saved.handle_msg.unwrap();
        assert!(msg.starts_with("done"));
        assert!(msg.contains("子任务不存在"));

        let requests = f.submitter.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].job_id, child.id);
        assert_eq!(requests[0].trigger_type, TriggerType::Parent);
        assert_eq!(requests[0].fail_retry_count, None);
    }

    #[tokio::test]
    async fn test_failed_result_does_not_trigger_children() {
        let f = fixture();
        let (_, child) = seed_job(&f.store, &["http://a"], |_| {}).await;
        let (_, parent) = seed_job(&f.store, &["http://a"], |job| {
            job.child_job_ids = vec![child.id];
        })
        .await;
        let log = dispatched_log(&f.store, &parent, "http://a", Utc::now()).await;

        assert!(f
            .completer
            .callback_one(&callback(log.id, CODE_FAIL), Utc::now())
            .await
            .is_success());
        assert!(f.submitter.requests().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_and_unknown_callbacks_rejected() {
        let f = fixture();
        let (_, job) = seed_job(&f.store, &["http://a"], |_| {}).await;
        let log = dispatched_log(&f.store, &job, "http://a", Utc::now()).await;

        assert!(f
            .completer
            .callback_one(&callback(log.id, CODE_SUCCESS), Utc::now())
            .await
            .is_success());

        let repeated = f
            .completer
            .callback_one(&callback(log.id, CODE_FAIL), Utc::now())
            .await;
        assert_eq!(repeated.msg.as_deref(), Some(REPEATED_CALLBACK_MSG));
        let saved = JobLogRepository::get_by_id(&f.store, log.id).await.unwrap().unwrap();
        assert_eq!(saved.handle_code, CODE_SUCCESS);

        let unknown = f
            .completer
            .callback_one(&callback(12345, CODE_SUCCESS), Utc::now())
            .await;
        assert_eq!(unknown.msg.as_deref(), Some(LOG_NOT_FOUND_MSG));

        let batch = f
            .completer
            .callback(&[callback(12345, CODE_SUCCESS)], Utc::now())
            .await;
        assert!(!batch.is_success());
    }

    #[tokio::test]
    async fn test_long_handle_msg_truncated() {
        let f = fixture();
        let (_, job) = seed_job(&f.store, &["http://a"], |_| {}).await;
        let log = dispatched_log(&f.store, &job, "http://a", Utc::now()).await;

        let mut param = callback(log.id, CODE_FAIL);
        param.handle_msg = Some("错".repeat(MAX_HANDLE_MSG_CHARS + 100));
        f.completer.callback_one(&param, Utc::now()).await;

        let saved = JobLogRepository::get_by_id(&f.store, log.id).await.unwrap().unwrap();
        assert_eq!(saved.handle_msg.unwrap().chars().count(), MAX_HANDLE_MSG_CHARS);
    }

    #[tokio::test]
    async fn test_lost_results_marked_failed_only_when_executor_offline() {
        let f = fixture();
        let now = Utc::now();
        let (_, job) = seed_job(&f.store, &["http://alive", "http://gone"], |_| {}).await;

        f.registry
            .registry(&RegistryParam::executor("demo-executor", "http://alive"), now)
            .await;

        let old = now - chrono::Duration::minutes(11);
        let alive_log = dispatched_log(&f.store, &job, "http://alive", old).await;
        let lost_log = dispatched_log(&f.store, &job, "http://gone", old).await;
        let recent_log = dispatched_log(&f.store, &job, "http://gone", now).await;

        assert_eq!(f.completer.scan_lost(now).await.unwrap(), 1);

        let lost = JobLogRepository::get_by_id(&f.store, lost_log.id).await.unwrap().unwrap();
        assert_eq!(lost.handle_code, CODE_FAIL);
        assert_eq!(lost.handle_msg.as_deref(), Some(RESULT_LOST_MSG));

        for id in [alive_log.id, recent_log.id] {
            let log = JobLogRepository::get_by_id(&f.store, id).await.unwrap().unwrap();
            assert!(log.is_awaiting_result());
        }

        // 已标记的日志不会再次处理
        assert_eq!(f.completer.scan_lost(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_log_without_trigger_info_marked_failed_after_threshold() {
        let f = fixture();
        let now = Utc::now();
        let (_, job) = seed_job(&f.store, &["http://a"], |_| {}).await;

        let mut stale = JobLog::new(job.job_group, job.id, now - chrono::Duration::hours(2));
        stale.id = JobLogRepository::create(&f.store, &stale).await.unwrap();
        let mut fresh = JobLog::new(job.job_group, job.id, now);
        fresh.id = JobLogRepository::create(&f.store, &fresh).await.unwrap();

        assert_eq!(f.completer.scan_lost(now).await.unwrap(), 1);

        let saved = JobLogRepository::get_by_id(&f.store, stale.id).await.unwrap().unwrap();
        assert_eq!(saved.handle_code, CODE_FAIL);
        assert_eq!(saved.execution_status(), ExecutionStatus::Fail);
        assert_eq!(saved.handle_msg.as_deref(), Some(RESULT_LOST_MSG));

        let saved = JobLogRepository::get_by_id(&f.store, fresh.id).await.unwrap().unwrap();
        assert_eq!(saved.execution_status(), ExecutionStatus::Running);
    }
}
