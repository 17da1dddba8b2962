use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use scheduler_core::{
    models::{ExecutorResponse, JobInfo, KillParam, ScheduleType, TriggerType, CODE_FAIL, CODE_SUCCESS},
    traits::{JobGroupRepository, JobLogRepository, JobRepository},
    SchedulerError, SchedulerResult,
};

use crate::client_cache::ExecutorClientCache;
use crate::cron_utils::{next_job_trigger_time, upcoming_trigger_times, validate_schedule};
use crate::trigger_pool::{TriggerRequest, TriggerSubmitter};

/// 任务管理
///
/// 管理端对任务的增删、启停和手动触发。手动触发与调度扫描共用同一个
/// 触发线程池，不会在调用方线程里直接访问执行器。
pub struct JobController {
    job_repo: Arc<dyn JobRepository>,
    group_repo: Arc<dyn JobGroupRepository>,
    log_repo: Arc<dyn JobLogRepository>,
    submitter: Arc<dyn TriggerSubmitter>,
    clients: Arc<ExecutorClientCache>,
    pre_read: chrono::Duration,
}

impl JobController {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        group_repo: Arc<dyn JobGroupRepository>,
        log_repo: Arc<dyn JobLogRepository>,
        submitter: Arc<dyn TriggerSubmitter>,
        clients: Arc<ExecutorClientCache>,
        pre_read: chrono::Duration,
    ) -> Self {
        Self {
            job_repo,
            group_repo,
            log_repo,
            submitter,
            clients,
            pre_read,
        }
    }

    async fn load_job(&self, job_id: i64) -> SchedulerResult<JobInfo> {
        self.job_repo
            .get_by_id(job_id)
            .await?
            .ok_or(SchedulerError::JobNotFound { id: job_id })
    }

    /// 新增任务，任务总是以停止状态创建
    pub async fn add_job(&self, job: &JobInfo) -> SchedulerResult<JobInfo> {
        if self.group_repo.get_by_id(job.job_group).await?.is_none() {
            return Err(SchedulerError::JobGroupNotFound { id: job.job_group });
        }
        if job.executor_handler.trim().is_empty() {
            return Err(SchedulerError::InvalidParameter(
                "JobHandler 不能为空".to_string(),
            ));
        }
        if job.executor_fail_retry_count < 0 {
            return Err(SchedulerError::InvalidParameter(
                "失败重试次数不能小于0".to_string(),
            ));
        }
        validate_schedule(job.schedule_type, &job.schedule_conf)?;
        for child_id in &job.child_job_ids {
            if self.job_repo.get_by_id(*child_id).await?.is_none() {
                return Err(SchedulerError::InvalidParameter(format!(
                    "子任务ID {child_id} 不存在"
                )));
            }
        }

        let mut job = job.clone();
        job.stop_schedule();
        let created = self.job_repo.create(&job).await?;
        info!("新增任务 {}: {}", created.id, created.executor_handler);
        Ok(created)
    }

    pub async fn remove_job(&self, job_id: i64) -> SchedulerResult<()> {
        self.load_job(job_id).await?;
        self.job_repo.delete(job_id).await?;
        info!("删除任务 {}", job_id);
        Ok(())
    }

    /// 手动触发一次
    ///
    /// 指定的执行参数和地址列表只对本次触发生效。
    pub async fn trigger_job(
        &self,
        job_id: i64,
        executor_param: Option<String>,
        address_list: Option<Vec<String>>,
    ) -> SchedulerResult<()> {
        self.load_job(job_id).await?;

        let request = TriggerRequest::new(job_id, TriggerType::Manual)
            .with_executor_param(executor_param)
            .with_address_list(address_list);
        self.submitter.submit(request)?;
        info!("手动触发任务 {}", job_id);
        Ok(())
    }

    /// 启动调度
    ///
    /// 下一次触发时间从预读窗口之后开始计算，避免与正在进行的扫描重叠。
    pub async fn start_job(&self, job_id: i64, now: DateTime<Utc>) -> SchedulerResult<JobInfo> {
        let mut job = self.load_job(job_id).await?;
        if job.schedule_type == ScheduleType::None {
            return Err(SchedulerError::InvalidSchedule(format!(
                "任务 {job_id} 调度类型为None，不能启动"
            )));
        }

        let Some(next) = next_job_trigger_time(&job, now + self.pre_read)? else {
            warn!("任务 {} 调度配置没有后续触发时间，拒绝启动", job_id);
            return Err(SchedulerError::InvalidSchedule(format!(
                "任务 {job_id} 调度配置没有后续触发时间: {}",
                job.schedule_conf
            )));
        };

        job.trigger_status = true;
        job.trigger_last_time = None;
        job.trigger_next_time = Some(next);
        self.job_repo.update(&job).await?;
        info!("启动任务 {} 调度，下次触发时间 {}", job_id, next);
        Ok(job)
    }

    pub async fn stop_job(&self, job_id: i64) -> SchedulerResult<JobInfo> {
        let mut job = self.load_job(job_id).await?;
        job.stop_schedule();
        self.job_repo.update(&job).await?;
        info!("停止任务 {} 调度", job_id);
        Ok(job)
    }

    /// 终止一次正在执行的调度
    ///
    /// 只有下发成功且尚无结果的日志可以终止。执行器确认终止后直接写入失败结果，
    /// 执行器拒绝时原样返回其响应。
    pub async fn kill_log(&self, log_id: i64, now: DateTime<Utc>) -> SchedulerResult<ExecutorResponse> {
        let mut log = self
            .log_repo
            .get_by_id(log_id)
            .await?
            .ok_or(SchedulerError::JobLogNotFound { id: log_id })?;
        if log.trigger_code != CODE_SUCCESS {
            return Err(SchedulerError::InvalidParameter(
                "调度失败，无法终止日志".to_string(),
            ));
        }
        if log.is_finished() {
            return Err(SchedulerError::InvalidParameter(format!(
                "调度日志 {log_id} 已有执行结果"
            )));
        }
        let address = log.executor_address.clone().unwrap_or_default();
        let Some(client) = self.clients.get(&address) else {
            return Err(SchedulerError::InvalidParameter(format!(
                "调度日志 {log_id} 没有执行器地址"
            )));
        };

        let response = client.kill(&KillParam { job_id: log.job_id }).await?;
        if response.is_success() {
            log.handle_time = Some(now);
            log.handle_code = CODE_FAIL;
            log.handle_msg = Some(format!(
                "人为操作，主动终止:{}",
                response.msg.as_deref().unwrap_or("")
            ));
            self.log_repo.update_handle_info(&log).await?;
            info!("终止调度日志 {}，执行器 {}", log_id, address);
        } else {
            warn!("执行器 {} 拒绝终止调度日志 {}: {:?}", address, log_id, response.msg);
        }
        Ok(response)
    }

    /// 预览调度配置接下来的触发时间
    pub fn next_trigger_times(
        schedule_type: ScheduleType,
        schedule_conf: &str,
        count: usize,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Vec<DateTime<Utc>>> {
        validate_schedule(schedule_type, schedule_conf)?;
        upcoming_trigger_times(schedule_type, schedule_conf, now, count)
    }
}
