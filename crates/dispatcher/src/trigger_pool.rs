use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use scheduler_core::{models::TriggerType, AdminConfig, SchedulerError, SchedulerResult};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::lifecycle::StopSignal;
use crate::slow_tracker::SlowTriggerTracker;

/// 一次触发请求
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerRequest {
    pub job_id: i64,
    pub trigger_type: TriggerType,
    /// 剩余失败重试次数，`None` 时使用任务配置
    pub fail_retry_count: Option<i32>,
    /// 指定分片 "index/total"，`None` 时按路由策略决定
    pub executor_sharding_param: Option<String>,
    /// 覆盖任务配置的执行参数
    pub executor_param: Option<String>,
    /// 覆盖分组的执行器地址列表
    pub address_list: Option<Vec<String>>,
}

impl TriggerRequest {
    pub fn new(job_id: i64, trigger_type: TriggerType) -> Self {
        Self {
            job_id,
            trigger_type,
            fail_retry_count: None,
            executor_sharding_param: None,
            executor_param: None,
            address_list: None,
        }
    }

    pub fn with_fail_retry_count(mut self, count: i32) -> Self {
        self.fail_retry_count = Some(count);
        self
    }

    pub fn with_sharding_param(mut self, sharding_param: Option<String>) -> Self {
        self.executor_sharding_param = sharding_param;
        self
    }

    pub fn with_executor_param(mut self, executor_param: Option<String>) -> Self {
        self.executor_param = executor_param;
        self
    }

    pub fn with_address_list(mut self, address_list: Option<Vec<String>>) -> Self {
        self.address_list = address_list.filter(|list| !list.is_empty());
        self
    }
}

/// 触发请求提交入口，提交不等待执行
pub trait TriggerSubmitter: Send + Sync {
    fn submit(&self, request: TriggerRequest) -> SchedulerResult<()>;
}

/// 线程池已满时记录在调度日志里的失败原因
pub const DISPATCH_REJECTED_MSG: &str = "触发线程池已满，本次调度被拒绝";

/// 触发请求的实际执行者
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    async fn handle(&self, request: TriggerRequest) -> SchedulerResult<()>;

    /// 记录一次未能入队的触发，失败监控据此按剩余重试次数重新触发
    async fn reject(&self, request: &TriggerRequest, reason: &str) -> SchedulerResult<()>;
}

/// 线程池通道
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerLane {
    Fast,
    Slow,
}

impl TriggerLane {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerLane::Fast => "fast",
            TriggerLane::Slow => "slow",
        }
    }
}

/// 线程池配置
#[derive(Debug, Clone)]
pub struct TriggerPoolConfig {
    pub fast_workers: usize,
    pub fast_queue: usize,
    pub slow_workers: usize,
    pub slow_queue: usize,
}

impl From<&AdminConfig> for TriggerPoolConfig {
    fn from(config: &AdminConfig) -> Self {
        Self {
            fast_workers: config.trigger_pool_fast_max,
            fast_queue: config.trigger_pool_fast_queue,
            slow_workers: config.trigger_pool_slow_max,
            slow_queue: config.trigger_pool_slow_queue,
        }
    }
}

struct LaneSenders {
    fast: mpsc::Sender<TriggerRequest>,
    slow: mpsc::Sender<TriggerRequest>,
}

/// 快慢双通道触发线程池
///
/// 每个通道是一个有界队列加固定数量的工作任务。队列满时拒绝提交，不阻塞
/// 调用方，被拒绝的触发写入一条失败日志交给失败监控重试。近期多次慢触发的任务进入慢速通道，避免拖慢其他任务。
pub struct TriggerPool {
    senders: Mutex<Option<LaneSenders>>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    handler: Arc<dyn TriggerHandler>,
    tracker: Arc<SlowTriggerTracker>,
    prune_stop: StopSignal,
    metrics: Arc<MetricsCollector>,
}

impl TriggerPool {
    /// 创建线程池并启动工作任务，必须在tokio运行时内调用
    pub fn start(
        config: TriggerPoolConfig,
        handler: Arc<dyn TriggerHandler>,
        tracker: Arc<SlowTriggerTracker>,
        prune_interval: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let mut workers = Vec::with_capacity(config.fast_workers + config.slow_workers + 1);

        let fast = Self::spawn_lane(
            TriggerLane::Fast,
            config.fast_workers,
            config.fast_queue,
            &handler,
            &tracker,
            &metrics,
            &mut workers,
        );
        let slow = Self::spawn_lane(
            TriggerLane::Slow,
            config.slow_workers,
            config.slow_queue,
            &handler,
            &tracker,
            &metrics,
            &mut workers,
        );

        let prune_stop = StopSignal::new();
        {
            let tracker = tracker.clone();
            let stop = prune_stop.clone();
            workers.push(tokio::spawn(async move {
                while !stop.sleep(prune_interval).await {
                    tracker.prune(Utc::now());
                }
            }));
        }

        info!(
            "触发线程池启动: 快速通道 {} 个工作任务/队列 {}，慢速通道 {} 个工作任务/队列 {}",
            config.fast_workers, config.fast_queue, config.slow_workers, config.slow_queue
        );

        Self {
            senders: Mutex::new(Some(LaneSenders { fast, slow })),
            workers: tokio::sync::Mutex::new(workers),
            handler,
            tracker,
            prune_stop,
            metrics,
        }
    }

    fn spawn_lane(
        lane: TriggerLane,
        worker_count: usize,
        queue_size: usize,
        handler: &Arc<dyn TriggerHandler>,
        tracker: &Arc<SlowTriggerTracker>,
        metrics: &Arc<MetricsCollector>,
        workers: &mut Vec<JoinHandle<()>>,
    ) -> mpsc::Sender<TriggerRequest> {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        for _ in 0..worker_count.max(1) {
            let receiver = receiver.clone();
            let handler = handler.clone();
            let tracker = tracker.clone();
            let metrics = metrics.clone();
            workers.push(tokio::spawn(async move {
                Self::worker_loop(lane, receiver, handler, tracker, metrics).await;
            }));
        }
        sender
    }

    async fn worker_loop(
        lane: TriggerLane,
        receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<TriggerRequest>>>,
        handler: Arc<dyn TriggerHandler>,
        tracker: Arc<SlowTriggerTracker>,
        metrics: Arc<MetricsCollector>,
    ) {
        loop {
            let request = receiver.lock().await.recv().await;
            let Some(request) = request else {
                break;
            };

            let job_id = request.job_id;
            metrics.record_lane_trigger(lane.as_str());
            let started = Instant::now();
            if let Err(e) = handler.handle(request).await {
                StructuredLogger::log_system_error("trigger_pool", "trigger", &e);
            }

            let elapsed = started.elapsed();
            if tracker.record(job_id, elapsed, Utc::now()) {
                debug!(
                    "任务 {} 在{}通道触发耗时 {}ms，计为慢触发",
                    job_id,
                    lane.as_str(),
                    elapsed.as_millis()
                );
            }
        }
    }

    /// 任务当前应进入的通道
    pub fn lane_for(&self, job_id: i64) -> TriggerLane {
        if self.tracker.is_slow(job_id, Utc::now()) {
            TriggerLane::Slow
        } else {
            TriggerLane::Fast
        }
    }

    /// 异步写入拒绝记录，调用方不等待存储
    fn record_rejection(&self, request: TriggerRequest) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("不在tokio运行时内，无法记录任务 {} 的拒绝触发", request.job_id);
            return;
        };
        let handler = self.handler.clone();
        runtime.spawn(async move {
            if let Err(e) = handler.reject(&request, DISPATCH_REJECTED_MSG).await {
                StructuredLogger::log_system_error("trigger_pool", "record_rejection", &e);
            }
        });
    }

    /// 停止接收新请求，等待已入队的请求执行完毕
    pub async fn shutdown(&self) {
        let senders = self
            .senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(senders);
        self.prune_stop.stop();

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("触发工作任务异常退出: {}", e);
            }
        }
        info!("触发线程池已停止");
    }
}

impl TriggerSubmitter for TriggerPool {
    fn submit(&self, request: TriggerRequest) -> SchedulerResult<()> {
        let job_id = request.job_id;
        let lane = self.lane_for(job_id);

        let guard = self
            .senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(senders) = guard.as_ref() else {
            return Err(SchedulerError::Internal("触发线程池已停止".to_string()));
        };
        let sender = match lane {
            TriggerLane::Fast => &senders.fast,
            TriggerLane::Slow => &senders.slow,
        };

        match sender.try_send(request) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(request)) => {
                drop(guard);
                self.metrics.record_trigger_rejected(job_id, lane.as_str());
                self.record_rejection(request);
                Err(SchedulerError::DispatchRejected { job_id })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(SchedulerError::Internal("触发线程池已停止".to_string()))
            }
        }
    }
}
