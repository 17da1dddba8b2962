use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Timelike, Utc};
use scheduler_core::{
    models::{JobInfo, MisfireStrategy, TriggerType},
    traits::{ClusterLock, JobRepository, SCHEDULE_LOCK},
    ScheduleConfig, SchedulerResult,
};
use scheduler_infrastructure::{JobTracer, MetricsCollector, StructuredLogger};
use tracing::{debug, info, warn, Instrument};

use crate::cron_utils::next_job_trigger_time;
use crate::lifecycle::StopSignal;
use crate::time_ring::{duration_to_next_second, TimeRing};
use crate::trigger_pool::{TriggerRequest, TriggerSubmitter};

/// 单轮调度扫描的统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScheduleOutcome {
    /// 未获取到集群锁，本轮跳过
    pub skipped: bool,
    pub scanned: usize,
    pub fired: usize,
    pub misfired: usize,
    pub pushed_to_ring: usize,
}

/// 调度扫描
///
/// 每秒在集群锁内预读未来一段时间内到期的任务：已严重过期的按过期策略处理，
/// 已到期的立即提交触发，即将到期的放入时间轮等待整秒触发。每个任务处理后
/// 立即推进下一次触发时间，本轮结束时批量回写。
pub struct JobScheduleService {
    job_repo: Arc<dyn JobRepository>,
    lock: Arc<dyn ClusterLock>,
    ring: Arc<TimeRing>,
    submitter: Arc<dyn TriggerSubmitter>,
    pre_read: chrono::Duration,
    pre_read_count: usize,
    lock_timeout: Duration,
    metrics: Arc<MetricsCollector>,
}

impl JobScheduleService {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        lock: Arc<dyn ClusterLock>,
        ring: Arc<TimeRing>,
        submitter: Arc<dyn TriggerSubmitter>,
        config: &ScheduleConfig,
        pre_read_count: usize,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            job_repo,
            lock,
            ring,
            submitter,
            pre_read: config.pre_read(),
            pre_read_count: pre_read_count.max(1),
            lock_timeout: config.lock_timeout(),
            metrics,
        }
    }

    /// 执行一轮调度扫描
    ///
    /// 获取锁失败时本轮跳过；持锁期间无论扫描成功与否都会释放锁。
    pub async fn schedule_once(&self, now: DateTime<Utc>) -> SchedulerResult<ScheduleOutcome> {
        if !self.lock.acquire(SCHEDULE_LOCK, self.lock_timeout).await? {
            debug!("未获取到调度锁，跳过本轮扫描");
            return Ok(ScheduleOutcome {
                skipped: true,
                ..ScheduleOutcome::default()
            });
        }

        let result = self.scan(now).await;
        if let Err(e) = self.lock.release(SCHEDULE_LOCK).await {
            warn!("释放调度锁失败: {}", e);
        }
        result
    }

    async fn scan(&self, now: DateTime<Utc>) -> SchedulerResult<ScheduleOutcome> {
        let mut jobs = self
            .job_repo
            .schedule_job_query(now + self.pre_read, self.pre_read_count)
            .await?;
        let mut outcome = ScheduleOutcome {
            scanned: jobs.len(),
            ..ScheduleOutcome::default()
        };
        if jobs.is_empty() {
            return Ok(outcome);
        }

        for job in jobs.iter_mut() {
            let Some(next_time) = job.trigger_next_time else {
                self.refresh_next_time(job, now);
                continue;
            };

            if now > next_time + self.pre_read {
                // 过期超过预读窗口
                outcome.misfired += 1;
                self.metrics.record_misfire(job.id);
                StructuredLogger::log_job_misfire(job.id, next_time, job.misfire_strategy.as_str());
                if job.misfire_strategy == MisfireStrategy::FireOnceNow {
                    self.submit(job.id, TriggerType::Misfire);
                    outcome.fired += 1;
                }
                self.refresh_next_time(job, now);
            } else if now >= next_time {
                // 到期且未超出预读窗口
                self.submit(job.id, TriggerType::Cron);
                outcome.fired += 1;
                self.refresh_next_time(job, now);

                if let Some(next) = job.trigger_next_time {
                    if job.trigger_status && next < now + self.pre_read {
                        self.ring.push(next.second(), job.id).await;
                        outcome.pushed_to_ring += 1;
                        self.refresh_next_time(job, next);
                    }
                }
            } else {
                // 预读窗口内即将到期
                self.ring.push(next_time.second(), job.id).await;
                outcome.pushed_to_ring += 1;
                self.refresh_next_time(job, next_time);
            }
        }

        self.job_repo.schedule_update(&jobs).await?;
        Ok(outcome)
    }

    fn submit(&self, job_id: i64, trigger_type: TriggerType) {
        if let Err(e) = self.submitter.submit(TriggerRequest::new(job_id, trigger_type)) {
            warn!("任务 {} 提交触发失败: {}", job_id, e);
        }
    }

    /// 推进下一次触发时间，无法计算时停止调度
    fn refresh_next_time(&self, job: &mut JobInfo, from: DateTime<Utc>) {
        match next_job_trigger_time(job, from) {
            Ok(Some(next)) => {
                job.trigger_last_time = job.trigger_next_time;
                job.trigger_next_time = Some(next);
            }
            Ok(None) => {
                warn!("任务 {} 没有下一次触发时间，停止调度", job.id);
                job.stop_schedule();
            }
            Err(e) => {
                warn!("任务 {} 调度配置无效，停止调度: {}", job.id, e);
                job.stop_schedule();
            }
        }
    }

    /// 调度循环，每轮结束后对齐到下一个整秒
    pub async fn run(&self, stop: StopSignal) {
        info!("调度扫描线程启动");
        while !stop.is_stopped() {
            let started = Instant::now();
            let result = self
                .schedule_once(Utc::now())
                .instrument(JobTracer::schedule_span())
                .await;
            match result {
                Ok(outcome) if outcome.scanned > 0 => debug!("本轮调度: {:?}", outcome),
                Ok(_) => {}
                Err(e) => StructuredLogger::log_system_error("scheduler", "schedule", &e),
            }

            let elapsed = started.elapsed();
            self.metrics.record_schedule_loop(elapsed.as_secs_f64());
            if elapsed < Duration::from_secs(1) && stop.sleep(duration_to_next_second(Utc::now())).await {
                break;
            }
        }
        info!("调度扫描线程停止");
    }
}
