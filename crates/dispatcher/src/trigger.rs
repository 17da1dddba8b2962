use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use scheduler_core::{
    models::{
        AddressType, ExecutorResponse, JobGroup, JobInfo, JobLog, RouteStrategy, TriggerParam,
        TriggerType, CODE_FAIL,
    },
    traits::{JobGroupRepository, JobLogRepository, JobRepository},
    SchedulerResult,
};
use scheduler_infrastructure::{JobTracer, MetricsCollector, StructuredLogger};
use tracing::{debug, warn, Instrument};

use crate::client_cache::ExecutorClientCache;
use crate::strategies::{ExecutorRouter, RouteContext, RouteSelection};
use crate::trigger_pool::{TriggerHandler, TriggerRequest};

/// 分片参数 "index/total"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardingParam {
    pub index: usize,
    pub total: usize,
}

impl ShardingParam {
    pub fn parse(value: &str) -> Option<Self> {
        let (index, total) = value.trim().split_once('/')?;
        let index = index.trim().parse().ok()?;
        let total = total.trim().parse().ok()?;
        (total > 0 && index < total).then_some(Self { index, total })
    }

    pub fn format(&self) -> String {
        format!("{}/{}", self.index, self.total)
    }
}

/// 一次下发尝试的上下文
struct Attempt<'a> {
    job: &'a JobInfo,
    group: &'a JobGroup,
    trigger_type: TriggerType,
    fail_retry_count: i32,
    sharding: ShardingParam,
    broadcast: bool,
}

/// 触发构建器
///
/// 一次触发：写入调度日志、路由选址、调用执行器、回写触发结果。
/// 分片广播任务按地址数拆成多次下发，每次一条日志。
pub struct JobTrigger {
    job_repo: Arc<dyn JobRepository>,
    group_repo: Arc<dyn JobGroupRepository>,
    log_repo: Arc<dyn JobLogRepository>,
    router: ExecutorRouter,
    clients: Arc<ExecutorClientCache>,
    rpc_timeout: Duration,
    admin_address: String,
    metrics: Arc<MetricsCollector>,
}

impl JobTrigger {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        group_repo: Arc<dyn JobGroupRepository>,
        log_repo: Arc<dyn JobLogRepository>,
        clients: Arc<ExecutorClientCache>,
        rpc_timeout: Duration,
        admin_address: impl Into<String>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            job_repo,
            group_repo,
            log_repo,
            router: ExecutorRouter::new(),
            clients,
            rpc_timeout,
            admin_address: admin_address.into(),
            metrics,
        }
    }

    /// 执行一次触发请求
    pub async fn trigger(&self, request: &TriggerRequest) -> SchedulerResult<()> {
        let Some(mut job) = self.job_repo.get_by_id(request.job_id).await? else {
            warn!("触发失败，任务不存在: {}", request.job_id);
            return Ok(());
        };
        if let Some(param) = &request.executor_param {
            job.executor_param = param.clone();
        }
        let fail_retry_count = request
            .fail_retry_count
            .filter(|count| *count >= 0)
            .unwrap_or(job.executor_fail_retry_count);

        let Some(mut group) = self.group_repo.get_by_id(job.job_group).await? else {
            warn!("触发失败，任务 {} 的执行器分组 {} 不存在", job.id, job.job_group);
            return Ok(());
        };
        if let Some(addresses) = &request.address_list {
            group.address_type = AddressType::Manual;
            group.address_list = addresses.clone();
        }

        let sharding = request
            .executor_sharding_param
            .as_deref()
            .and_then(ShardingParam::parse);

        let broadcast_all = job.executor_route_strategy == RouteStrategy::ShardingBroadcast
            && !group.address_list.is_empty()
            && sharding.is_none();

        if broadcast_all {
            let total = group.address_list.len();
            for index in 0..total {
                self.process_trigger(Attempt {
                    job: &job,
                    group: &group,
                    trigger_type: request.trigger_type,
                    fail_retry_count,
                    sharding: ShardingParam { index, total },
                    broadcast: true,
                })
                .await?;
            }
        } else {
            let broadcast = job.executor_route_strategy == RouteStrategy::ShardingBroadcast;
            self.process_trigger(Attempt {
                job: &job,
                group: &group,
                trigger_type: request.trigger_type,
                fail_retry_count,
                sharding: sharding.unwrap_or(ShardingParam { index: 0, total: 1 }),
                broadcast,
            })
            .await?;
        }
        Ok(())
    }

    async fn process_trigger(&self, attempt: Attempt<'_>) -> SchedulerResult<()> {
        let started = Instant::now();
        let job = attempt.job;
        let group = attempt.group;

        let mut log = JobLog::new(job.job_group, job.id, Utc::now());
        log.id = self.log_repo.create(&log).await?;

        let param = TriggerParam {
            job_id: job.id,
            executor_handler: job.executor_handler.clone(),
            executor_params: job.executor_param.clone(),
            executor_block_strategy: job.executor_block_strategy,
            executor_timeout: job.executor_timeout,
            log_id: log.id,
            log_date_time: log.trigger_time,
            broadcast_index: attempt.sharding.index,
            broadcast_total: attempt.sharding.total,
            fail_retry_count: attempt.fail_retry_count,
        };

        let ctx = RouteContext {
            job_id: job.id,
            shard_index: attempt.sharding.index,
            addresses: &group.address_list,
            clients: &self.clients,
        };
        let selection = self.router.route(job.executor_route_strategy, &ctx).await;

        let (address, route_msg, result) = match selection {
            RouteSelection::Single { address, trail } => {
                let result = self.run_executor(&param, &address).await;
                (Some(address), trail, result)
            }
            RouteSelection::Unavailable(msg) => (None, None, ExecutorResponse::fail(msg)),
        };

        log.executor_address = address.clone();
        log.executor_handler = Some(job.executor_handler.clone());
        log.executor_param = Some(job.executor_param.clone());
        log.executor_sharding_param = Some(attempt.sharding.format());
        log.executor_fail_retry_count = attempt.fail_retry_count;
        log.trigger_code = result.code;
        log.trigger_msg = Some(self.trigger_message(&attempt, route_msg.as_deref(), &result));
        self.log_repo.update_trigger_info(&log).await?;

        self.metrics.record_job_trigger(
            job.id,
            attempt.trigger_type.as_str(),
            result.is_success(),
            started.elapsed().as_secs_f64(),
        );
        StructuredLogger::log_job_triggered(
            job.id,
            log.id,
            attempt.trigger_type.as_str(),
            address.as_deref(),
            result.code,
        );
        Ok(())
    }

    /// 记录一次被线程池拒绝的触发
    ///
    /// 日志直接以触发失败落库，剩余重试次数与正常触发一致，失败监控会按此重试。
    pub async fn record_rejection(&self, request: &TriggerRequest, reason: &str) -> SchedulerResult<()> {
        let Some(job) = self.job_repo.get_by_id(request.job_id).await? else {
            warn!("拒绝记录跳过，任务不存在: {}", request.job_id);
            return Ok(());
        };
        let fail_retry_count = request
            .fail_retry_count
            .filter(|count| *count >= 0)
            .unwrap_or(job.executor_fail_retry_count);

        let mut log = JobLog::new(job.job_group, job.id, Utc::now());
        log.id = self.log_repo.create(&log).await?;
        log.executor_handler = Some(job.executor_handler.clone());
        log.executor_param = Some(
            request
                .executor_param
                .clone()
                .unwrap_or_else(|| job.executor_param.clone()),
        );
        log.executor_sharding_param = request.executor_sharding_param.clone();
        log.executor_fail_retry_count = fail_retry_count;
        log.trigger_code = CODE_FAIL;
        log.trigger_msg = Some(format!(
            "任务触发类型：{}<br>调度机器：{}<br>失败重试次数：{}<br><br>>>>>>>>>>>>触发调度<<<<<<<<<<<<br>{}",
            request.trigger_type.title(),
            self.admin_address,
            fail_retry_count,
            reason
        ));
        self.log_repo.update_trigger_info(&log).await?;

        self.metrics
            .record_job_trigger(job.id, request.trigger_type.as_str(), false, 0.0);
        StructuredLogger::log_job_triggered(
            job.id,
            log.id,
            request.trigger_type.as_str(),
            None,
            CODE_FAIL,
        );
        Ok(())
    }

    /// 调用执行器，传输失败和超时都按失败结果记录
    async fn run_executor(&self, param: &TriggerParam, address: &str) -> ExecutorResponse {
        let Some(client) = self.clients.get(address) else {
            return ExecutorResponse::fail(format!("执行器地址无效: {address}"));
        };

        let response = match tokio::time::timeout(self.rpc_timeout, client.run(param)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("调用执行器 {} 失败: {}", address, e);
                ExecutorResponse::fail(e.to_string())
            }
            Err(_) => {
                warn!("调用执行器 {} 超时", address);
                ExecutorResponse::fail(format!(
                    "调用执行器超时({}ms)",
                    self.rpc_timeout.as_millis()
                ))
            }
        };
        debug!("执行器 {} 返回: {:?}", address, response);

        let mut result = response.clone();
        result.msg = Some(format!(
            "触发调度：<br>address：{}<br>code：{}<br>msg：{}",
            address,
            response.code,
            response.msg.as_deref().unwrap_or("")
        ));
        result
    }

    fn trigger_message(
        &self,
        attempt: &Attempt<'_>,
        route_msg: Option<&str>,
        result: &ExecutorResponse,
    ) -> String {
        let job = attempt.job;
        let group = attempt.group;
        let address_type = match group.address_type {
            AddressType::Auto => "自动注册",
            AddressType::Manual => "手动录入",
        };
        let route_title = if attempt.broadcast {
            format!(
                "{}({}/{})",
                job.executor_route_strategy.title(),
                attempt.sharding.index,
                attempt.sharding.total
            )
        } else {
            job.executor_route_strategy.title().to_string()
        };

        let mut msg = format!(
            "任务触发类型：{}<br>调度机器：{}<br>执行器-注册方式：{}<br>执行器-地址列表：{:?}<br>路由策略：{}<br>阻塞处理策略：{}<br>任务超时时间：{}<br>失败重试次数：{}",
            attempt.trigger_type.title(),
            self.admin_address,
            address_type,
            group.address_list,
            route_title,
            job.executor_block_strategy.title(),
            job.executor_timeout,
            attempt.fail_retry_count,
        );
        msg.push_str("<br><br>>>>>>>>>>>>触发调度<<<<<<<<<<<<br>");
        if let Some(route_msg) = route_msg {
            msg.push_str(route_msg);
            msg.push_str("<br><br>");
        }
        msg.push_str(result.msg.as_deref().unwrap_or(""));
        msg
    }
}

#[async_trait]
impl TriggerHandler for JobTrigger {
    async fn handle(&self, request: TriggerRequest) -> SchedulerResult<()> {
        let span = JobTracer::trigger_span(request.job_id, request.trigger_type.as_str());
        async {
            let result = self.trigger(&request).await;
            if let Err(e) = &result {
                JobTracer::record_error(e);
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn reject(&self, request: &TriggerRequest, reason: &str) -> SchedulerResult<()> {
        self.record_rejection(request, reason).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::NO_AVAILABLE_EXECUTOR;
    use crate::test_utils::mocks::{seed_job, MockBehavior, MockClientFactory};
    use crate::trigger_pool::DISPATCH_REJECTED_MSG;
    use scheduler_core::models::CODE_SUCCESS;
    use scheduler_infrastructure::InMemoryStore;

    fn job_trigger(store: &InMemoryStore, factory: Arc<MockClientFactory>) -> JobTrigger {
        JobTrigger::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(ExecutorClientCache::new(factory, None)),
            Duration::from_secs(1),
            "127.0.0.1:8080",
            Arc::new(MetricsCollector::new().unwrap()),
        )
    }

    #[test]
    fn test_sharding_param_parse() {
        assert_eq!(
            ShardingParam::parse("1/3"),
            Some(ShardingParam { index: 1, total: 3 })
        );
        assert_eq!(ShardingParam::parse("3/3"), None);
        assert_eq!(ShardingParam::parse("0/0"), None);
        assert_eq!(ShardingParam::parse("abc"), None);
        assert_eq!(ShardingParam { index: 2, total: 5 }.format(), "2/5");
    }

    #[tokio::test]
    async fn test_empty_group_records_no_available_executor() {
        let store = InMemoryStore::new();
        let factory = Arc::new(MockClientFactory::default());
        let (_, job) = seed_job(&store, &[], |_| {}).await;

        job_trigger(&store, factory.clone())
            .trigger(&TriggerRequest::new(job.id, TriggerType::Manual))
            .await
            .unwrap();

        let logs = store.all_logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].trigger_code, CODE_FAIL);
        assert!(logs[0]
            .trigger_msg
            .as_deref()
            .unwrap()
            .contains(NO_AVAILABLE_EXECUTOR));
        assert!(logs[0].executor_address.is_none());
        assert!(factory.runs().is_empty());
    }

    #[tokio::test]
    async fn test_successful_trigger_updates_log() {
        let store = InMemoryStore::new();
        let factory = Arc::new(MockClientFactory::default());
        let (_, job) = seed_job(&store, &["http://a", "http://b"], |job| {
            job.executor_param = "p=1".to_string();
            job.executor_fail_retry_count = 2;
        })
        .await;

        job_trigger(&store, factory.clone())
            .trigger(&TriggerRequest::new(job.id, TriggerType::Cron))
            .await
            .unwrap();

        let logs = store.all_logs().await;
        assert_eq!(logs.len(), 1);
        let log = &logs[0];
        assert_eq!(log.trigger_code, CODE_SUCCESS);
        assert_eq!(log.executor_address.as_deref(), Some("http://a"));
        assert_eq!(log.executor_param.as_deref(), Some("p=1"));
        assert_eq!(log.executor_sharding_param.as_deref(), Some("0/1"));
        assert_eq!(log.executor_fail_retry_count, 2);
        assert!(log.trigger_msg.as_deref().unwrap().contains("Cron触发"));

        let runs = factory.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].1.log_id, log.id);
        assert_eq!(runs[0].1.executor_params, "p=1");
    }

    #[tokio::test]
    async fn test_transport_failure_recorded_as_failed_trigger() {
        let store = InMemoryStore::new();
        let factory = Arc::new(
            MockClientFactory::default().with_behavior("http://a", MockBehavior::unreachable()),
        );
        let (_, job) = seed_job(&store, &["http://a"], |_| {}).await;

        job_trigger(&store, factory)
            .trigger(&TriggerRequest::new(job.id, TriggerType::Manual))
            .await
            .unwrap();

        let log = &store.all_logs().await[0];
        assert_eq!(log.trigger_code, CODE_FAIL);
        assert!(log.trigger_msg.as_deref().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_request_overrides_take_precedence() {
        let store = InMemoryStore::new();
        let factory = Arc::new(MockClientFactory::default());
        let (_, job) = seed_job(&store, &["http://a"], |job| {
            job.executor_fail_retry_count = 3;
        })
        .await;

        let request = TriggerRequest::new(job.id, TriggerType::Retry)
            .with_fail_retry_count(1)
            .with_executor_param(Some("override".to_string()))
            .with_address_list(Some(vec!["http://z".to_string()]));
        job_trigger(&store, factory.clone())
            .trigger(&request)
            .await
            .unwrap();

        let log = &store.all_logs().await[0];
        assert_eq!(log.executor_fail_retry_count, 1);
        assert_eq!(log.executor_address.as_deref(), Some("http://z"));
        assert_eq!(factory.runs()[0].1.executor_params, "override");
        assert_eq!(factory.runs()[0].1.fail_retry_count, 1);
    }

    #[tokio::test]
    async fn test_sharding_broadcast_fans_out() {
        let store = InMemoryStore::new();
        let factory = Arc::new(MockClientFactory::default());
        let addresses = ["http://a", "http://b", "http://c"];
        let (_, job) = seed_job(&store, &addresses, |job| {
            job.executor_route_strategy = RouteStrategy::ShardingBroadcast;
        })
        .await;

        job_trigger(&store, factory.clone())
            .trigger(&TriggerRequest::new(job.id, TriggerType::Cron))
            .await
            .unwrap();

        let runs = factory.runs();
        assert_eq!(runs.len(), 3);
        let mut indexes: Vec<(String, usize)> = runs
            .iter()
            .map(|(address, param)| {
                assert_eq!(param.broadcast_total, 3);
                (address.clone(), param.broadcast_index)
            })
            .collect();
        indexes.sort();
        assert_eq!(
            indexes,
            vec![
                ("http://a".to_string(), 0),
                ("http://b".to_string(), 1),
                ("http://c".to_string(), 2)
            ]
        );
        assert_eq!(store.all_logs().await.len(), 3);
    }

    #[tokio::test]
    async fn test_retry_of_single_shard_targets_that_shard() {
        let store = InMemoryStore::new();
        let factory = Arc::new(MockClientFactory::default());
        let (_, job) = seed_job(&store, &["http://a", "http://b"], |job| {
            job.executor_route_strategy = RouteStrategy::ShardingBroadcast;
        })
        .await;

        let request = TriggerRequest::new(job.id, TriggerType::Retry)
            .with_sharding_param(Some("1/2".to_string()));
        job_trigger(&store, factory.clone())
            .trigger(&request)
            .await
            .unwrap();

        let runs = factory.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, "http://b");
        assert_eq!(runs[0].1.broadcast_index, 1);
    }

    #[tokio::test]
    async fn test_rejection_recorded_as_failed_log() {
        let store = InMemoryStore::new();
        let factory = Arc::new(MockClientFactory::default());
        let (_, job) = seed_job(&store, &["http://a"], |job| {
            job.executor_fail_retry_count = 2;
            job.executor_param = "p=1".to_string();
        })
        .await;

        let trigger = job_trigger(&store, factory.clone());
        trigger
            .record_rejection(&TriggerRequest::new(job.id, TriggerType::Cron), DISPATCH_REJECTED_MSG)
            .await
            .unwrap();
        let retry = TriggerRequest::new(job.id, TriggerType::Retry)
            .with_fail_retry_count(0)
            .with_sharding_param(Some("1/2".to_string()));
        trigger
            .record_rejection(&retry, DISPATCH_REJECTED_MSG)
            .await
            .unwrap();

        let logs = store.all_logs().await;
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].trigger_code, CODE_FAIL);
        assert_eq!(logs[0].executor_fail_retry_count, 2);
        assert_eq!(logs[0].executor_param.as_deref(), Some("p=1"));
        assert!(logs[0].executor_address.is_none());
        assert!(logs[0]
            .trigger_msg
            .as_deref()
            .unwrap()
            .contains(DISPATCH_REJECTED_MSG));
        assert_eq!(logs[1].executor_fail_retry_count, 0);
        assert_eq!(logs[1].executor_sharding_param.as_deref(), Some("1/2"));
        assert!(factory.runs().is_empty());
    }

    #[tokio::test]
    async fn test_missing_job_is_ignored() {
        let store = InMemoryStore::new();
        job_trigger(&store, Arc::new(MockClientFactory::default()))
            .trigger(&TriggerRequest::new(404, TriggerType::Manual))
            .await
            .unwrap();
        assert!(store.all_logs().await.is_empty());
    }
}
