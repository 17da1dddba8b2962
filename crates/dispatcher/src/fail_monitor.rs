use std::sync::Arc;
use std::time::Duration;

use scheduler_core::{
    models::{AlarmStatus, TriggerType},
    traits::{AlertNotifier, JobLogRepository, JobRepository},
    SchedulerResult,
};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};
use tracing::{debug, info, warn};

use crate::lifecycle::StopSignal;
use crate::trigger_pool::{TriggerRequest, TriggerSubmitter};

/// 每轮最多处理的失败日志数
const FAIL_SCAN_LIMIT: usize = 1000;

/// 单次扫描的处理结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FailScanOutcome {
    pub claimed: usize,
    pub retried: usize,
    pub alarmed: usize,
}

/// 失败监控
///
/// 扫描执行失败的调度日志，先通过条件更新抢占告警状态，抢占成功的实例负责
/// 失败重试和告警，多个调度中心实例并发扫描时每条日志只处理一次。
pub struct FailMonitor {
    job_repo: Arc<dyn JobRepository>,
    log_repo: Arc<dyn JobLogRepository>,
    submitter: Arc<dyn TriggerSubmitter>,
    notifier: Arc<dyn AlertNotifier>,
    interval: Duration,
    metrics: Arc<MetricsCollector>,
}

impl FailMonitor {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        log_repo: Arc<dyn JobLogRepository>,
        submitter: Arc<dyn TriggerSubmitter>,
        notifier: Arc<dyn AlertNotifier>,
        interval: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            job_repo,
            log_repo,
            submitter,
            notifier,
            interval,
            metrics,
        }
    }

    pub async fn scan_once(&self) -> SchedulerResult<FailScanOutcome> {
        let mut outcome = FailScanOutcome::default();
        let fail_ids = self.log_repo.find_fail_job_log_ids(FAIL_SCAN_LIMIT).await?;

        for log_id in fail_ids {
            match self
                .log_repo
                .update_alarm_status(log_id, AlarmStatus::Default, AlarmStatus::Locked)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!("失败日志 {} 已被其他实例处理", log_id);
                    continue;
                }
                Err(e) => {
                    warn!("抢占失败日志 {} 出错: {}", log_id, e);
                    continue;
                }
            }
            outcome.claimed += 1;

            if let Err(e) = self.process_claimed(log_id, &mut outcome).await {
                StructuredLogger::log_system_error("fail_monitor", "process", &e);
                self.release_claim(log_id).await;
            }
        }

        if outcome.claimed > 0 {
            info!(
                "失败监控处理 {} 条日志，重试 {} 条，告警 {} 条",
                outcome.claimed, outcome.retried, outcome.alarmed
            );
        }
        Ok(outcome)
    }

    /// 处理一条已抢占的失败日志
    ///
    /// 返回 `Err` 时尚未产生任何副作用，调用方释放抢占等待下一轮重新处理。
    /// 重试提交之后的存储错误只记录日志，避免释放后重复重试。
    async fn process_claimed(&self, log_id: i64, outcome: &mut FailScanOutcome) -> SchedulerResult<()> {
        let Some(mut log) = self.log_repo.get_by_id(log_id).await? else {
            return Ok(());
        };
        let job = self.job_repo.get_by_id(log.job_id).await?;

        if log.executor_fail_retry_count > 0 {
            let remaining = log.executor_fail_retry_count - 1;
            let request = TriggerRequest::new(log.job_id, TriggerType::Retry)
                .with_fail_retry_count(remaining)
                .with_sharding_param(log.executor_sharding_param.clone())
                .with_executor_param(log.executor_param.clone());

            let retry_msg = match self.submitter.submit(request) {
                Ok(()) => {
                    outcome.retried += 1;
                    self.metrics.record_retry(log.job_id, remaining);
                    format!("<br><br>>>>>>>>>>>>{}<<<<<<<<<<<<br>", TriggerType::Retry.title())
                }
                Err(e) => {
                    warn!("任务 {} 失败重试提交失败: {}", log.job_id, e);
                    format!(
                        "<br><br>>>>>>>>>>>>{}<<<<<<<<<<<<br>提交失败：{}",
                        TriggerType::Retry.title(),
                        e
                    )
                }
            };
            log.trigger_msg
                .get_or_insert_with(String::new)
                .push_str(&retry_msg);
            if let Err(e) = self.log_repo.update_trigger_info(&log).await {
                warn!("失败日志 {} 回写重试信息失败: {}", log_id, e);
            }
        }

        let alarm_status = match &job {
            Some(job) if job.alarm_email.as_deref().is_some_and(|e| !e.trim().is_empty()) => {
                self.metrics.record_alarm();
                match self.notifier.notify(job, &log).await {
                    Ok(()) => {
                        outcome.alarmed += 1;
                        AlarmStatus::Sent
                    }
                    Err(e) => {
                        warn!("任务 {} 失败告警发送失败: {}", job.id, e);
                        AlarmStatus::SendFailed
                    }
                }
            }
            _ => AlarmStatus::NotNeeded,
        };
        if let Err(e) = self
            .log_repo
            .update_alarm_status(log_id, AlarmStatus::Locked, alarm_status)
            .await
        {
            warn!("失败日志 {} 回写告警状态失败: {}", log_id, e);
        }
        Ok(())
    }

    /// 把抢占的日志放回未处理状态
    async fn release_claim(&self, log_id: i64) {
        match self
            .log_repo
            .update_alarm_status(log_id, AlarmStatus::Locked, AlarmStatus::Default)
            .await
        {
            Ok(_) => debug!("释放失败日志 {} 的抢占", log_id),
            Err(e) => warn!("释放失败日志 {} 的抢占失败: {}", log_id, e),
        }
    }

    pub async fn run(&self, stop: StopSignal) {
        info!("失败监控线程启动");
        while !stop.is_stopped() {
            if let Err(e) = self.scan_once().await {
                StructuredLogger::log_system_error("fail_monitor", "scan", &e);
            }
            if stop.sleep(self.interval).await {
                break;
            }
        }
        info!("失败监控线程停止");
    }
}
