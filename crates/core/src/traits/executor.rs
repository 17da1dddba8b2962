use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{ExecutorResponse, IdleBeatParam, JobInfo, JobLog, KillParam, TriggerParam};
use crate::SchedulerResult;

/// 执行器RPC客户端
///
/// `Err` 表示传输层失败（连接失败、超时），`Ok` 中的非200结果表示执行器拒绝。
#[async_trait]
pub trait ExecutorClient: Send + Sync {
    /// 下发触发请求
    async fn run(&self, param: &TriggerParam) -> SchedulerResult<ExecutorResponse>;

    /// 存活探测
    async fn beat(&self) -> SchedulerResult<ExecutorResponse>;

    /// 忙碌探测：任务是否正在该执行器上运行
    async fn idle_beat(&self, param: &IdleBeatParam) -> SchedulerResult<ExecutorResponse>;

    async fn kill(&self, param: &KillParam) -> SchedulerResult<ExecutorResponse>;
}

/// 执行器客户端工厂
pub trait ExecutorClientFactory: Send + Sync {
    fn create(&self, address: &str, access_token: Option<&str>) -> Arc<dyn ExecutorClient>;
}

/// 失败告警通道
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    /// 发送告警，`Err` 表示发送失败
    async fn notify(&self, job: &JobInfo, log: &JobLog) -> SchedulerResult<()>;
}
