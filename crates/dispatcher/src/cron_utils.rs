use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;
use tracing::debug;

use scheduler_core::{
    models::{JobInfo, ScheduleType},
    SchedulerError, SchedulerResult,
};

/// CRON表达式解析和调度工具
///
/// 表达式带秒字段（`秒 分 时 日 月 周 [年]`），`?` 与 `*` 等价。
pub struct CronScheduler {
    schedule: Schedule,
}

impl CronScheduler {
    pub fn new(cron_expr: &str) -> SchedulerResult<Self> {
        let normalized = cron_expr.trim().replace('?', "*");
        let schedule = Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self { schedule })
    }

    /// 获取严格晚于 `from` 的下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> SchedulerResult<()> {
        Self::new(cron_expr).map(|_| ())
    }
}

/// 固定频率配置，单位秒
fn parse_fix_rate(conf: &str) -> SchedulerResult<i64> {
    match conf.trim().parse::<i64>() {
        Ok(seconds) if seconds > 0 => Ok(seconds),
        _ => Err(SchedulerError::InvalidSchedule(format!(
            "固定频率必须是正整数秒: {conf}"
        ))),
    }
}

/// 按调度类型计算严格晚于 `from` 的下一次触发时间
///
/// `Ok(None)` 表示该调度不再产生触发时间（调度类型为None或表达式已无后续时间）。
pub fn next_trigger_time(
    schedule_type: ScheduleType,
    schedule_conf: &str,
    from: DateTime<Utc>,
) -> SchedulerResult<Option<DateTime<Utc>>> {
    match schedule_type {
        ScheduleType::None => Ok(None),
        ScheduleType::Cron => Ok(CronScheduler::new(schedule_conf)?.next_execution_time(from)),
        ScheduleType::FixRate => {
            let seconds = parse_fix_rate(schedule_conf)?;
            Ok(Some(from + Duration::seconds(seconds)))
        }
    }
}

/// 任务的下一次触发时间
pub fn next_job_trigger_time(
    job: &JobInfo,
    from: DateTime<Utc>,
) -> SchedulerResult<Option<DateTime<Utc>>> {
    let next = next_trigger_time(job.schedule_type, &job.schedule_conf, from)?;
    debug!("任务 {} 下次触发时间: {:?}", job.id, next);
    Ok(next)
}

/// 预览接下来的若干次触发时间
pub fn upcoming_trigger_times(
    schedule_type: ScheduleType,
    schedule_conf: &str,
    from: DateTime<Utc>,
    count: usize,
) -> SchedulerResult<Vec<DateTime<Utc>>> {
    let mut times = Vec::with_capacity(count);
    let mut cursor = from;
    while times.len() < count {
        match next_trigger_time(schedule_type, schedule_conf, cursor)? {
            Some(next) => {
                times.push(next);
                cursor = next;
            }
            None => break,
        }
    }
    Ok(times)
}

/// 校验调度配置是否合法
pub fn validate_schedule(schedule_type: ScheduleType, schedule_conf: &str) -> SchedulerResult<()> {
    match schedule_type {
        ScheduleType::None => Ok(()),
        ScheduleType::Cron => CronScheduler::validate_cron_expression(schedule_conf),
        ScheduleType::FixRate => parse_fix_rate(schedule_conf).map(|_| ()),
    }
}
