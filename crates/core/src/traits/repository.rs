//! 数据仓储层接口定义
//!
//! 调度中心依赖的持久化抽象：
//! - 任务仓储 (JobRepository)
//! - 执行器分组仓储 (JobGroupRepository)
//! - 注册心跳仓储 (RegistryRepository)
//! - 调度日志仓储 (JobLogRepository)
//! - 调度报表仓储 (LogReportRepository)
//!
//! 所有写操作都是按主键的单行更新或幂等upsert，崩溃重启后重放不会重复生效。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{
    AddressType, AlarmStatus, JobGroup, JobInfo, JobLog, LogReport, Registration, RegistryType,
};
use crate::SchedulerResult;

/// 任务仓储接口
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// 创建任务，返回带生成ID的任务
    async fn create(&self, job: &JobInfo) -> SchedulerResult<JobInfo>;

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<JobInfo>>;

    /// 管理端全量更新
    async fn update(&self, job: &JobInfo) -> SchedulerResult<()>;

    async fn delete(&self, id: i64) -> SchedulerResult<()>;

    /// 查询运行中且下次触发时间不晚于 `max_next_time` 的任务
    ///
    /// 按下次触发时间升序返回，最多 `limit` 条。
    async fn schedule_job_query(
        &self,
        max_next_time: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<JobInfo>>;

    /// 批量回写调度状态（trigger_status / trigger_last_time / trigger_next_time）
    async fn schedule_update(&self, jobs: &[JobInfo]) -> SchedulerResult<()>;
}

/// 执行器分组仓储接口
#[async_trait]
pub trait JobGroupRepository: Send + Sync {
    async fn create(&self, group: &JobGroup) -> SchedulerResult<JobGroup>;

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<JobGroup>>;

    async fn find_all(&self) -> SchedulerResult<Vec<JobGroup>>;

    async fn find_by_address_type(&self, address_type: AddressType)
        -> SchedulerResult<Vec<JobGroup>>;

    /// 更新分组地址列表
    async fn update_address_list(
        &self,
        id: i64,
        address_list: &[String],
        update_time: DateTime<Utc>,
    ) -> SchedulerResult<()>;
}

/// 注册心跳仓储接口
#[async_trait]
pub trait RegistryRepository: Send + Sync {
    /// 刷新心跳，不存在时插入
    async fn save_or_update(
        &self,
        registry_group: RegistryType,
        registry_key: &str,
        registry_value: &str,
        update_time: DateTime<Utc>,
    ) -> SchedulerResult<()>;

    /// 删除指定注册记录，返回删除行数
    async fn delete(
        &self,
        registry_group: RegistryType,
        registry_key: &str,
        registry_value: &str,
    ) -> SchedulerResult<u64>;

    /// 删除最后心跳早于 `dead_before` 的记录
    async fn remove_dead(&self, dead_before: DateTime<Utc>) -> SchedulerResult<u64>;

    /// 查询最后心跳不早于 `alive_after` 的记录，与 `remove_dead` 保留的记录一致
    async fn find_live(&self, alive_after: DateTime<Utc>) -> SchedulerResult<Vec<Registration>>;
}

/// 调度日志仓储接口
#[async_trait]
pub trait JobLogRepository: Send + Sync {
    /// 插入日志，返回日志ID
    async fn create(&self, log: &JobLog) -> SchedulerResult<i64>;

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<JobLog>>;

    /// 更新触发信息（地址、参数、trigger_code/msg、剩余重试次数）
    async fn update_trigger_info(&self, log: &JobLog) -> SchedulerResult<()>;

    /// 更新执行结果（handle_time/code/msg）
    async fn update_handle_info(&self, log: &JobLog) -> SchedulerResult<()>;

    /// 条件更新告警状态
    ///
    /// 仅当当前状态等于 `expected` 时更新为 `new_status`，返回是否更新成功。
    /// 多个调度中心实例并发抢占同一行时，只有一个能成功。
    async fn update_alarm_status(
        &self,
        id: i64,
        expected: AlarmStatus,
        new_status: AlarmStatus,
    ) -> SchedulerResult<bool>;

    /// 查询执行失败且告警状态未处理的日志ID
    async fn find_fail_job_log_ids(&self, limit: usize) -> SchedulerResult<Vec<i64>>;

    /// 查询未判定触发失败、尚无执行结果且触发时间早于 `trigger_before` 的日志
    async fn find_running_before(
        &self,
        trigger_before: DateTime<Utc>,
    ) -> SchedulerResult<Vec<JobLog>>;

    /// 统计触发时间落在 `[from, to)` 内的日志
    async fn count_report(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SchedulerResult<LogReport>;

    /// 删除触发时间早于 `before` 的日志，每批最多 `batch_size` 行，返回删除总数
    async fn clear_before(&self, before: DateTime<Utc>, batch_size: usize)
        -> SchedulerResult<u64>;
}

/// 调度报表仓储接口
#[async_trait]
pub trait LogReportRepository: Send + Sync {
    async fn save_or_update(&self, report: &LogReport) -> SchedulerResult<()>;

    async fn get(&self, trigger_day: NaiveDate) -> SchedulerResult<Option<LogReport>>;

    async fn find_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> SchedulerResult<Vec<LogReport>>;

    /// 删除早于 `before` 的报表行
    async fn delete_before(&self, before: NaiveDate) -> SchedulerResult<u64>;
}
