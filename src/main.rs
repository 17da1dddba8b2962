use anyhow::{Context, Result};
use clap::Parser;
use scheduler_admin::{
    app::{shutdown_timeout, Application},
    shutdown::{wait_for_shutdown_signal, ShutdownManager},
};
use scheduler_core::AppConfig;
use scheduler_infrastructure::{init_structured_logging, LogFormat, LoggingConfig};
use tracing::{error, info, warn};

/// 分布式任务调度中心
#[derive(Debug, Parser)]
#[command(name = "scheduler-admin", version, about = "分布式任务调度中心")]
struct Cli {
    /// 配置文件路径，不指定时按默认路径查找
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, value_name = "LEVEL", value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", value_parser = ["json", "pretty", "compact"], default_value = "pretty")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).with_context(|| {
        format!(
            "加载配置文件失败: {}",
            cli.config.as_deref().unwrap_or("默认路径")
        )
    })?;

    let format = LogFormat::parse(&cli.log_format)
        .ok_or_else(|| anyhow::anyhow!("不支持的日志格式: {}", cli.log_format))?;
    init_structured_logging(LoggingConfig {
        level: cli
            .log_level
            .clone()
            .unwrap_or_else(|| config.observability.log_level.clone()),
        format,
        include_location: false,
        include_thread_id: false,
    })?;

    info!("启动分布式任务调度中心");
    let timeout = shutdown_timeout(&config);
    let app = Application::new(config).await?;

    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;
    let mut app_handle = tokio::spawn(async move { app.run(shutdown_rx).await });

    tokio::select! {
        _ = wait_for_shutdown_signal() => {}
        result = &mut app_handle => {
            return match result {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("调度中心任务异常: {}", e)),
            };
        }
    }
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(timeout, app_handle).await {
        Ok(Ok(Ok(()))) => info!("调度中心已优雅关闭"),
        Ok(Ok(Err(e))) => error!("调度中心运行失败: {:#}", e),
        Ok(Err(e)) => error!("调度中心任务异常: {}", e),
        Err(_) => warn!("关闭超时，强制退出"),
    }

    Ok(())
}
