use thiserror::Error;

/// 调度中心错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务未找到: {id}")]
    JobNotFound { id: i64 },

    #[error("执行器分组未找到: {id}")]
    JobGroupNotFound { id: i64 },

    #[error("调度日志未找到: {id}")]
    JobLogNotFound { id: i64 },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的调度配置: {0}")]
    InvalidSchedule(String),

    #[error("集群锁不可用: {scope}")]
    LockUnavailable { scope: String },

    #[error("调度线程池已满，拒绝任务: {job_id}")]
    DispatchRejected { job_id: i64 },

    #[error("网络错误: {0}")]
    Network(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("无效的参数: {0}")]
    InvalidParameter(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 存储、锁和网络类错误属于暂时性错误，下一个周期重试即可
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedulerError::Database(_)
                | SchedulerError::DatabaseOperation(_)
                | SchedulerError::LockUnavailable { .. }
                | SchedulerError::Network(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;
