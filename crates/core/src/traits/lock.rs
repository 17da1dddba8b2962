use std::time::Duration;

use async_trait::async_trait;

use crate::SchedulerResult;

/// 调度扫描使用的锁范围
pub const SCHEDULE_LOCK: &str = "schedule_lock";

/// 集群互斥锁
///
/// 跨调度中心进程生效，由存储提供实现（数据库行锁、advisory lock等），
/// 不能用进程内锁替代。
#[async_trait]
pub trait ClusterLock: Send + Sync {
    /// 在超时时间内尝试获取锁，获取失败返回 `Ok(false)`
    async fn acquire(&self, scope: &str, timeout: Duration) -> SchedulerResult<bool>;

    /// 释放锁；未持有时为空操作
    async fn release(&self, scope: &str) -> SchedulerResult<()>;
}
