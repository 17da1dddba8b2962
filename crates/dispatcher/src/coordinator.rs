use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use scheduler_core::{
    traits::{
        AlertNotifier, ClusterLock, ExecutorClientFactory, JobGroupRepository, JobLogRepository,
        JobRepository, LogReportRepository, RegistryRepository,
    },
    AppConfig,
};
use scheduler_infrastructure::MetricsCollector;

use crate::client_cache::ExecutorClientCache;
use crate::complete_monitor::JobCompleter;
use crate::controller::JobController;
use crate::fail_monitor::FailMonitor;
use crate::lifecycle::StopSignal;
use crate::log_report::LogReportAggregator;
use crate::registry::RegistryTracker;
use crate::scheduler::JobScheduleService;
use crate::slow_tracker::SlowTriggerTracker;
use crate::time_ring::{TimeRing, TimeRingConsumer};
use crate::trigger::JobTrigger;
use crate::trigger_pool::{TriggerPool, TriggerPoolConfig};

/// 调度中心依赖的外部协作者
#[derive(Clone)]
pub struct CoordinatorStores {
    pub job_repo: Arc<dyn JobRepository>,
    pub group_repo: Arc<dyn JobGroupRepository>,
    pub registry_repo: Arc<dyn RegistryRepository>,
    pub log_repo: Arc<dyn JobLogRepository>,
    pub report_repo: Arc<dyn LogReportRepository>,
    pub lock: Arc<dyn ClusterLock>,
    pub executor_factory: Arc<dyn ExecutorClientFactory>,
    pub notifier: Arc<dyn AlertNotifier>,
}

impl CoordinatorStores {
    /// 用同一个存储实现所有仓储
    pub fn from_store<S>(
        store: S,
        lock: Arc<dyn ClusterLock>,
        executor_factory: Arc<dyn ExecutorClientFactory>,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Self
    where
        S: JobRepository
            + JobGroupRepository
            + RegistryRepository
            + JobLogRepository
            + LogReportRepository
            + Clone
            + 'static,
    {
        Self {
            job_repo: Arc::new(store.clone()),
            group_repo: Arc::new(store.clone()),
            registry_repo: Arc::new(store.clone()),
            log_repo: Arc::new(store.clone()),
            report_repo: Arc::new(store),
            lock,
            executor_factory,
            notifier,
        }
    }
}

#[derive(Default)]
struct RunningTasks {
    schedule: Option<JoinHandle<()>>,
    ring: Option<JoinHandle<()>>,
    monitors: Vec<JoinHandle<()>>,
}

/// 调度中心
///
/// 持有全部调度组件并管理后台任务的启停。启动顺序为触发线程池、注册中心、
/// 失败监控、结果监控、日志报表、时间轮、调度扫描；停止时逆序进行，
/// 先停调度扫描，等待时间轮排空后再停其余任务，最后排空触发线程池。
pub struct SchedulerCoordinator {
    pool: Arc<TriggerPool>,
    registry: Arc<RegistryTracker>,
    fail_monitor: Arc<FailMonitor>,
    completer: Arc<JobCompleter>,
    log_report: Arc<LogReportAggregator>,
    ring: Arc<TimeRing>,
    ring_consumer: Arc<TimeRingConsumer>,
    schedule: Arc<JobScheduleService>,
    controller: Arc<JobController>,
    metrics: Arc<MetricsCollector>,
    drain_timeout: Duration,
    schedule_stop: StopSignal,
    ring_stop: StopSignal,
    monitor_stop: StopSignal,
    tasks: Mutex<Option<RunningTasks>>,
}

impl SchedulerCoordinator {
    /// 组装全部组件，触发线程池的工作任务随之就绪，必须在tokio运行时内调用
    pub fn new(config: &AppConfig, stores: CoordinatorStores, metrics: Arc<MetricsCollector>) -> Self {
        let schedule = &config.schedule;
        let admin_address = config
            .admin
            .admin_address
            .clone()
            .unwrap_or_else(|| format!("http://{}", config.api.bind_address));

        let clients = Arc::new(ExecutorClientCache::new(
            stores.executor_factory.clone(),
            config.admin.access_token.clone(),
        ));
        let trigger = Arc::new(JobTrigger::new(
            stores.job_repo.clone(),
            stores.group_repo.clone(),
            stores.log_repo.clone(),
            clients.clone(),
            schedule.rpc_timeout(),
            admin_address,
            metrics.clone(),
        ));

        let slow_window = Duration::from_secs(schedule.slow_trigger_window_seconds);
        let tracker = Arc::new(SlowTriggerTracker::new(
            Duration::from_millis(schedule.slow_trigger_threshold_ms),
            schedule.slow_trigger_max_count,
            slow_window,
        ));
        let pool = Arc::new(TriggerPool::start(
            TriggerPoolConfig::from(&config.admin),
            trigger,
            tracker,
            slow_window,
            metrics.clone(),
        ));

        let registry = Arc::new(RegistryTracker::new(
            stores.registry_repo.clone(),
            stores.group_repo.clone(),
            chrono::Duration::seconds(schedule.registry_dead_seconds),
            Duration::from_secs(schedule.registry_beat_seconds),
            metrics.clone(),
        ));
        let fail_monitor = Arc::new(FailMonitor::new(
            stores.job_repo.clone(),
            stores.log_repo.clone(),
            pool.clone(),
            stores.notifier.clone(),
            Duration::from_secs(schedule.fail_monitor_interval_seconds),
            metrics.clone(),
        ));
        let completer = Arc::new(JobCompleter::new(
            stores.job_repo.clone(),
            stores.log_repo.clone(),
            pool.clone(),
            registry.clone(),
            chrono::Duration::seconds(schedule.lost_job_threshold_seconds),
            Duration::from_secs(schedule.complete_monitor_interval_seconds),
            metrics.clone(),
        ));
        let log_report = Arc::new(LogReportAggregator::new(
            stores.log_repo.clone(),
            stores.report_repo.clone(),
            config.admin.effective_log_retention_days(),
            config.admin.log_report_retention_days,
            Duration::from_secs(schedule.log_report_interval_seconds),
        ));

        let ring = Arc::new(TimeRing::new());
        let ring_consumer = Arc::new(TimeRingConsumer::new(
            ring.clone(),
            pool.clone(),
            metrics.clone(),
        ));
        let schedule_service = Arc::new(JobScheduleService::new(
            stores.job_repo.clone(),
            stores.lock.clone(),
            ring.clone(),
            pool.clone(),
            schedule,
            config.pre_read_count(),
            metrics.clone(),
        ));
        let controller = Arc::new(JobController::new(
            stores.job_repo,
            stores.group_repo,
            stores.log_repo,
            pool.clone(),
            clients,
            schedule.pre_read(),
        ));

        Self {
            pool,
            registry,
            fail_monitor,
            completer,
            log_report,
            ring,
            ring_consumer,
            schedule: schedule_service,
            controller,
            metrics,
            drain_timeout: Duration::from_secs(schedule.wheel_drain_timeout_seconds),
            schedule_stop: StopSignal::new(),
            ring_stop: StopSignal::new(),
            monitor_stop: StopSignal::new(),
            tasks: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> Arc<RegistryTracker> {
        self.registry.clone()
    }

    pub fn completer(&self) -> Arc<JobCompleter> {
        self.completer.clone()
    }

    pub fn controller(&self) -> Arc<JobController> {
        self.controller.clone()
    }

    pub fn trigger_pool(&self) -> Arc<TriggerPool> {
        self.pool.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn is_running(&self) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// 启动后台任务，重复调用无效
    pub fn start(&self) {
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if tasks.is_some() {
            warn!("调度中心已经启动");
            return;
        }
        info!("调度中心启动中");

        let mut running = RunningTasks::default();
        {
            let registry = self.registry.clone();
            let stop = self.monitor_stop.clone();
            running
                .monitors
                .push(tokio::spawn(async move { registry.run(stop).await }));
        }
        {
            let fail_monitor = self.fail_monitor.clone();
            let stop = self.monitor_stop.clone();
            running
                .monitors
                .push(tokio::spawn(async move { fail_monitor.run(stop).await }));
        }
        {
            let completer = self.completer.clone();
            let stop = self.monitor_stop.clone();
            running
                .monitors
                .push(tokio::spawn(async move { completer.run(stop).await }));
        }
        {
            let log_report = self.log_report.clone();
            let stop = self.monitor_stop.clone();
            running
                .monitors
                .push(tokio::spawn(async move { log_report.run(stop).await }));
        }
        {
            let consumer = self.ring_consumer.clone();
            let stop = self.ring_stop.clone();
            running.ring = Some(tokio::spawn(async move { consumer.run(stop).await }));
        }
        {
            let schedule = self.schedule.clone();
            let stop = self.schedule_stop.clone();
            running.schedule = Some(tokio::spawn(async move { schedule.run(stop).await }));
        }

        *tasks = Some(running);
        info!("调度中心启动完成");
    }

    /// 逆序停止后台任务并排空触发线程池
    pub async fn stop(&self) {
        let running = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(running) = running else {
            self.pool.shutdown().await;
            return;
        };
        info!("调度中心停止中");

        self.schedule_stop.stop();
        if let Some(handle) = running.schedule {
            Self::join("schedule", handle).await;
        }

        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        while !self.ring.is_empty().await && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        let remaining = self.ring.len().await;
        if remaining > 0 {
            warn!("时间轮排空超时，丢弃 {} 个待触发任务", remaining);
        }

        self.ring_stop.stop();
        if let Some(handle) = running.ring {
            Self::join("time_ring", handle).await;
        }

        self.monitor_stop.stop();
        for handle in running.monitors {
            Self::join("monitor", handle).await;
        }

        self.pool.shutdown().await;
        info!("调度中心已停止");
    }

    async fn join(name: &str, handle: JoinHandle<()>) {
        if let Err(e) = handle.await {
            warn!("后台任务 {} 异常退出: {}", name, e);
        }
    }
}
