use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::BlockStrategy;
use super::log::{CODE_FAIL, CODE_SUCCESS};

/// 单次触发下发给执行器的参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerParam {
    pub job_id: i64,
    pub executor_handler: String,
    pub executor_params: String,
    pub executor_block_strategy: BlockStrategy,
    pub executor_timeout: i32,
    pub log_id: i64,
    pub log_date_time: DateTime<Utc>,
    pub broadcast_index: usize,
    pub broadcast_total: usize,
    pub fail_retry_count: i32,
}

/// 执行器调用结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorResponse {
    pub code: i32,
    pub msg: Option<String>,
    pub content: Option<String>,
}

impl ExecutorResponse {
    pub fn success() -> Self {
        Self {
            code: CODE_SUCCESS,
            msg: None,
            content: None,
        }
    }

    pub fn success_with(content: impl Into<String>) -> Self {
        Self {
            code: CODE_SUCCESS,
            msg: None,
            content: Some(content.into()),
        }
    }

    pub fn fail(msg: impl Into<String>) -> Self {
        Self {
            code: CODE_FAIL,
            msg: Some(msg.into()),
            content: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_SUCCESS
    }
}

/// 忙碌检测参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleBeatParam {
    pub job_id: i64,
}

/// 终止任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillParam {
    pub job_id: i64,
}

/// 执行器回调的执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleCallbackParam {
    pub log_id: i64,
    pub log_date_time: DateTime<Utc>,
    pub handle_code: i32,
    pub handle_msg: Option<String>,
}
