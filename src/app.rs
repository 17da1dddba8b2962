use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use scheduler_api::{create_routes, AppState};
use scheduler_core::AppConfig;
use scheduler_dispatcher::{CoordinatorStores, SchedulerCoordinator};
use scheduler_infrastructure::{
    init_metrics, DatabaseManager, HttpExecutorClientFactory, InMemoryClusterLock, InMemoryStore,
    LoggingAlertNotifier, MetricsCollector, PostgresClusterLock, PostgresJobGroupRepository,
    PostgresJobLogRepository, PostgresJobRepository, PostgresLogReportRepository,
    PostgresRegistryRepository,
};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info, warn};

/// 调度中心进程：组装存储、调度组件和HTTP接口
pub struct Application {
    config: AppConfig,
    coordinator: Arc<SchedulerCoordinator>,
    database: Option<DatabaseManager>,
}

impl Application {
    /// 必须在tokio运行时内调用
    pub async fn new(mut config: AppConfig) -> Result<Self> {
        if config.admin.admin_address.is_none() {
            config.admin.admin_address = Some(resolve_admin_address(&config.api.bind_address));
        }
        info!(
            "初始化调度中心，调度中心地址: {}",
            config.admin.admin_address.as_deref().unwrap_or_default()
        );

        if config.observability.metrics_enabled {
            init_metrics(&config.observability.metrics_listen_address)
                .context("初始化指标导出失败")?;
        }
        let metrics = Arc::new(MetricsCollector::new().context("创建指标收集器失败")?);

        let executor_factory = Arc::new(HttpExecutorClientFactory::new(config.schedule.rpc_timeout()));
        let notifier = Arc::new(LoggingAlertNotifier::new());

        let (stores, database) = if config.database.is_memory() {
            info!("使用内存存储运行（嵌入式模式）");
            let stores = CoordinatorStores::from_store(
                InMemoryStore::new(),
                Arc::new(InMemoryClusterLock::new()),
                executor_factory,
                notifier,
            );
            (stores, None)
        } else {
            let database = DatabaseManager::new(&config.database).await?;
            database.migrate().await?;
            let pool = database.pool().clone();
            let stores = CoordinatorStores {
                job_repo: Arc::new(PostgresJobRepository::new(pool.clone())),
                group_repo: Arc::new(PostgresJobGroupRepository::new(pool.clone())),
                registry_repo: Arc::new(PostgresRegistryRepository::new(pool.clone())),
                log_repo: Arc::new(PostgresJobLogRepository::new(pool.clone())),
                report_repo: Arc::new(PostgresLogReportRepository::new(pool.clone())),
                lock: Arc::new(PostgresClusterLock::new(pool)),
                executor_factory,
                notifier,
            };
            info!("已连接PostgreSQL并完成迁移");
            (stores, Some(database))
        };

        let coordinator = Arc::new(SchedulerCoordinator::new(&config, stores, metrics));
        Ok(Self {
            config,
            coordinator,
            database,
        })
    }

    pub fn coordinator(&self) -> Arc<SchedulerCoordinator> {
        self.coordinator.clone()
    }

    /// 运行直到收到关闭信号
    ///
    /// 关闭时先停止调度中心，HTTP接口在此期间继续接收执行器回调，之后再停止。
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.coordinator.start();

        let (server_stop_tx, server_stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = if self.config.api.enabled {
            let listener = TcpListener::bind(&self.config.api.bind_address)
                .await
                .with_context(|| format!("绑定API地址失败: {}", self.config.api.bind_address))?;
            info!("API服务监听 {}", listener.local_addr()?);

            let router = create_routes(AppState::from_coordinator(
                &self.coordinator,
                self.config.admin.access_token.clone(),
            ));
            Some(tokio::spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = server_stop_rx.await;
                    })
                    .await
            }))
        } else {
            None
        };

        if let Err(e) = shutdown_rx.recv().await {
            warn!("关闭信号通道异常: {}", e);
        }
        info!("开始停止调度中心");
        self.coordinator.stop().await;

        let _ = server_stop_tx.send(());
        if let Some(server) = server {
            match server.await {
                Ok(Ok(())) => info!("API服务已停止"),
                Ok(Err(e)) => error!("API服务异常退出: {}", e),
                Err(e) => error!("API服务任务异常: {}", e),
            }
        }

        if let Some(database) = &self.database {
            database.close().await;
        }
        Ok(())
    }
}

/// 未配置调度中心地址时由主机名和API端口推导，供执行器回调使用
pub fn resolve_admin_address(bind_address: &str) -> String {
    let port = bind_address
        .parse::<SocketAddr>()
        .map(|addr| addr.port())
        .unwrap_or(8080);
    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "127.0.0.1".to_string());
    format!("http://{host}:{port}")
}

/// 关闭超时时间：时间轮排空时间加上触发线程池的余量
pub fn shutdown_timeout(config: &AppConfig) -> Duration {
    Duration::from_secs(config.schedule.wheel_drain_timeout_seconds)
        + config.schedule.rpc_timeout() * 2
        + Duration::from_secs(10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_admin_address_uses_bind_port() {
        let address = resolve_admin_address("0.0.0.0:8081");
        assert!(address.starts_with("http://"));
        assert!(address.ends_with(":8081"));

        assert!(resolve_admin_address("not an address").ends_with(":8080"));
    }

    #[test]
    fn test_shutdown_timeout_covers_drain() {
        let config = AppConfig::default();
        assert!(shutdown_timeout(&config) > Duration::from_secs(config.schedule.wheel_drain_timeout_seconds));
    }
}
