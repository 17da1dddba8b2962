use async_trait::async_trait;
use tracing::warn;

use scheduler_core::{
    models::{JobInfo, JobLog},
    traits::AlertNotifier,
    SchedulerResult,
};

/// 将失败告警写入日志的告警通道
///
/// 邮件等外部渠道由部署方实现 `AlertNotifier` 接入。
#[derive(Debug, Default, Clone)]
pub struct LoggingAlertNotifier;

impl LoggingAlertNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AlertNotifier for LoggingAlertNotifier {
    async fn notify(&self, job: &JobInfo, log: &JobLog) -> SchedulerResult<()> {
        warn!(
            event = "job_alarm",
            job.id = job.id,
            job.desc = %job.job_desc,
            job_log.id = log.id,
            alarm.email = job.alarm_email.as_deref().unwrap_or(""),
            job.trigger_code = log.trigger_code,
            job.handle_code = log.handle_code,
            "任务执行失败告警: {}",
            log.handle_msg
                .as_deref()
                .or(log.trigger_msg.as_deref())
                .unwrap_or("")
        );
        Ok(())
    }
}
