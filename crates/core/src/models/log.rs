use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 结果码：未完成
pub const CODE_PENDING: i32 = 0;
/// 结果码：成功
pub const CODE_SUCCESS: i32 = 200;
/// 结果码：失败
pub const CODE_FAIL: i32 = 500;

/// 调度日志，每次触发尝试一行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLog {
    pub id: i64,
    pub job_group: i64,
    pub job_id: i64,
    pub executor_address: Option<String>,
    pub executor_handler: Option<String>,
    pub executor_param: Option<String>,
    /// 分片参数，格式 "index/total"
    pub executor_sharding_param: Option<String>,
    /// 触发时剩余的失败重试次数
    pub executor_fail_retry_count: i32,
    pub trigger_time: DateTime<Utc>,
    pub trigger_code: i32,
    pub trigger_msg: Option<String>,
    pub handle_time: Option<DateTime<Utc>>,
    pub handle_code: i32,
    pub handle_msg: Option<String>,
    pub alarm_status: AlarmStatus,
}

impl JobLog {
    pub fn new(job_group: i64, job_id: i64, trigger_time: DateTime<Utc>) -> Self {
        Self {
            id: 0, // 由存储生成
            job_group,
            job_id,
            executor_address: None,
            executor_handler: None,
            executor_param: None,
            executor_sharding_param: None,
            executor_fail_retry_count: 0,
            trigger_time,
            trigger_code: CODE_PENDING,
            trigger_msg: None,
            handle_time: None,
            handle_code: CODE_PENDING,
            handle_msg: None,
            alarm_status: AlarmStatus::Default,
        }
    }

    pub fn execution_status(&self) -> ExecutionStatus {
        if self.trigger_code == CODE_FAIL
            || (self.handle_code != CODE_PENDING && self.handle_code != CODE_SUCCESS)
        {
            ExecutionStatus::Fail
        } else if self.handle_code == CODE_SUCCESS {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Running
        }
    }

    /// 未判定触发失败且尚无执行结果，包括触发信息尚未回写的日志
    pub fn is_awaiting_result(&self) -> bool {
        self.trigger_code != CODE_FAIL && self.handle_code == CODE_PENDING
    }

    pub fn is_finished(&self) -> bool {
        self.handle_code > CODE_PENDING
    }
}

/// 执行状态（由触发结果和执行结果推导）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionStatus {
    Running,
    Success,
    Fail,
}

/// 告警状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmStatus {
    /// 未处理
    Default,
    /// 已被某个调度中心实例锁定处理中
    Locked,
    NotNeeded,
    Sent,
    SendFailed,
}

impl AlarmStatus {
    pub fn code(&self) -> i16 {
        match self {
            AlarmStatus::Default => 0,
            AlarmStatus::Locked => -1,
            AlarmStatus::NotNeeded => 1,
            AlarmStatus::Sent => 2,
            AlarmStatus::SendFailed => 3,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(AlarmStatus::Default),
            -1 => Some(AlarmStatus::Locked),
            1 => Some(AlarmStatus::NotNeeded),
            2 => Some(AlarmStatus::Sent),
            3 => Some(AlarmStatus::SendFailed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_status_derivation() {
        let mut log = JobLog::new(1, 1, Utc::now());
        assert_eq!(log.execution_status(), ExecutionStatus::Running);
        assert!(log.is_awaiting_result());

        log.trigger_code = CODE_FAIL;
        assert_eq!(log.execution_status(), ExecutionStatus::Fail);
        assert!(!log.is_awaiting_result());

        log.trigger_code = CODE_SUCCESS;
        assert!(log.is_awaiting_result());
        assert_eq!(log.execution_status(), ExecutionStatus::Running);

        log.handle_code = CODE_SUCCESS;
        assert_eq!(log.execution_status(), ExecutionStatus::Success);
        assert!(log.is_finished());

        log.handle_code = 502;
        assert_eq!(log.execution_status(), ExecutionStatus::Fail);
    }

    #[test]
    fn test_alarm_status_codes() {
        for status in [
            AlarmStatus::Default,
            AlarmStatus::Locked,
            AlarmStatus::NotNeeded,
            AlarmStatus::Sent,
            AlarmStatus::SendFailed,
        ] {
            assert_eq!(AlarmStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(AlarmStatus::from_code(9), None);
    }
}
