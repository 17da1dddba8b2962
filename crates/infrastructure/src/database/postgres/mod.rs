pub mod postgres_cluster_lock;
pub mod postgres_job_group_repository;
pub mod postgres_job_log_repository;
pub mod postgres_job_repository;
pub mod postgres_log_report_repository;
pub mod postgres_registry_repository;

pub use postgres_cluster_lock::*;
pub use postgres_job_group_repository::*;
pub use postgres_job_log_repository::*;
pub use postgres_job_repository::*;
pub use postgres_log_report_repository::*;
pub use postgres_registry_repository::*;

use scheduler_core::{SchedulerError, SchedulerResult};

/// 将字符串列解析为枚举，未知取值视为数据损坏
pub(crate) fn parse_column<T>(
    value: &str,
    column: &str,
    parse: fn(&str) -> Option<T>,
) -> SchedulerResult<T> {
    parse(value).ok_or_else(|| {
        SchedulerError::DatabaseOperation(format!("列 {column} 含有未知取值: {value}"))
    })
}
