use std::net::SocketAddr;

use anyhow::Result;
use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Metrics collector for the schedule center
pub struct MetricsCollector {
    // Trigger metrics
    job_triggers_total: Counter,
    job_trigger_failures_total: Counter,
    job_trigger_duration: Histogram,
    job_misfires_total: Counter,
    job_retries_total: Counter,
    trigger_rejections_total: Counter,

    // Result metrics
    job_callbacks_total: Counter,
    job_results_lost_total: Counter,
    job_alarms_total: Counter,

    // Loop metrics
    schedule_loop_duration: Histogram,
    time_ring_size: Gauge,
    live_executors: Gauge,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            job_triggers_total: counter!("scheduler_job_triggers_total"),
            job_trigger_failures_total: counter!("scheduler_job_trigger_failures_total"),
            job_trigger_duration: histogram!("scheduler_job_trigger_duration_seconds"),
            job_misfires_total: counter!("scheduler_job_misfires_total"),
            job_retries_total: counter!("scheduler_job_retries_total"),
            trigger_rejections_total: counter!("scheduler_trigger_rejections_total"),
            job_callbacks_total: counter!("scheduler_job_callbacks_total"),
            job_results_lost_total: counter!("scheduler_job_results_lost_total"),
            job_alarms_total: counter!("scheduler_job_alarms_total"),
            schedule_loop_duration: histogram!("scheduler_schedule_loop_duration_seconds"),
            time_ring_size: gauge!("scheduler_time_ring_size"),
            live_executors: gauge!("scheduler_live_executors"),
        })
    }

    /// Record a finished trigger attempt
    pub fn record_job_trigger(&self, job_id: i64, trigger_type: &str, success: bool, duration_seconds: f64) {
        self.job_triggers_total.increment(1);
        self.job_trigger_duration.record(duration_seconds);
        if !success {
            self.job_trigger_failures_total.increment(1);
        }

        debug!(
            job_id = job_id,
            trigger_type = trigger_type,
            success = success,
            duration_seconds = duration_seconds,
            "Job trigger recorded"
        );
    }

    /// Record a trigger request picked up by a pool lane
    pub fn record_lane_trigger(&self, lane: &'static str) {
        counter!("scheduler_lane_triggers_total", "lane" => lane).increment(1);
    }

    pub fn record_misfire(&self, job_id: i64) {
        self.job_misfires_total.increment(1);

        debug!(job_id = job_id, "Job misfire recorded");
    }

    pub fn record_retry(&self, job_id: i64, remaining: i32) {
        self.job_retries_total.increment(1);

        info!(job_id = job_id, remaining = remaining, "Job retry initiated");
    }

    pub fn record_trigger_rejected(&self, job_id: i64, lane: &str) {
        self.trigger_rejections_total.increment(1);

        warn!(job_id = job_id, lane = lane, "Trigger rejected by saturated pool");
    }

    pub fn record_callback(&self) {
        self.job_callbacks_total.increment(1);
    }

    pub fn record_result_lost(&self, count: u64) {
        self.job_results_lost_total.increment(count);
    }

    pub fn record_alarm(&self) {
        self.job_alarms_total.increment(1);
    }

    pub fn record_schedule_loop(&self, duration_seconds: f64) {
        self.schedule_loop_duration.record(duration_seconds);
    }

    pub fn update_time_ring_size(&self, size: f64) {
        self.time_ring_size.set(size);
    }

    pub fn update_live_executors(&self, count: f64) {
        self.live_executors.set(count);
    }
}

/// Structured logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_location: bool,
    pub include_thread_id: bool,
}

#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(LogFormat::Json),
            "pretty" => Some(LogFormat::Pretty),
            "compact" => Some(LogFormat::Compact),
            _ => None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            include_location: true,
            include_thread_id: false,
        }
    }
}

/// Initialize structured logging with tracing
pub fn init_structured_logging(config: LoggingConfig) -> Result<()> {
    let level = config.level.clone();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.level.into());

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread_id);

            registry.with(fmt_layer).try_init()?;
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread_id);

            registry.with(fmt_layer).try_init()?;
        }
        LogFormat::Compact => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread_id);

            registry.with(fmt_layer).try_init()?;
        }
    }

    info!(
        logging.format = ?config.format,
        logging.level = level,
        "Structured logging initialized"
    );

    Ok(())
}

/// Install the Prometheus exporter as global metrics recorder
pub fn init_metrics(listen_address: &str) -> Result<()> {
    let addr: SocketAddr = listen_address
        .parse()
        .map_err(|e| anyhow::anyhow!("无效的指标监听地址 {}: {}", listen_address, e))?;

    let (recorder, exporter) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create Prometheus exporter: {}", e))?;

    metrics::set_global_recorder(recorder)
        .map_err(|e| anyhow::anyhow!("Failed to install metrics recorder: {}", e))?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            error!("Prometheus exporter stopped: {:?}", e);
        }
    });

    info!("Metrics initialized with Prometheus exporter on {}", addr);
    Ok(())
}

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log a finished trigger
    pub fn log_job_triggered(
        job_id: i64,
        log_id: i64,
        trigger_type: &str,
        address: Option<&str>,
        trigger_code: i32,
    ) {
        info!(
            event = "job_triggered",
            job.id = job_id,
            job_log.id = log_id,
            job.trigger_type = trigger_type,
            executor.address = address.unwrap_or(""),
            job.trigger_code = trigger_code,
            "Job triggered"
        );
    }

    pub fn log_job_misfire(job_id: i64, planned: chrono::DateTime<chrono::Utc>, strategy: &str) {
        warn!(
            event = "job_misfire",
            job.id = job_id,
            job.planned_at = %planned,
            job.misfire_strategy = strategy,
            "Job schedule misfired"
        );
    }

    pub fn log_job_callback(log_id: i64, handle_code: i32) {
        info!(
            event = "job_callback",
            job_log.id = log_id,
            job.handle_code = handle_code,
            "Job result received"
        );
    }

    pub fn log_executor_registered(app_name: &str, address: &str) {
        debug!(
            event = "executor_registered",
            executor.app_name = app_name,
            executor.address = address,
            "Executor heartbeat received"
        );
    }

    pub fn log_system_error(component: &str, operation: &str, error: &dyn std::error::Error) {
        error!(
            event = "system_error",
            error.component = component,
            error.operation = operation,
            error.message = %error,
            "System error occurred"
        );
    }
}

/// Span helpers for trigger lifecycle tracking
pub struct JobTracer;

impl JobTracer {
    pub fn trigger_span(job_id: i64, trigger_type: &str) -> tracing::Span {
        tracing::info_span!(
            "trigger_job",
            job.id = job_id,
            job.trigger_type = trigger_type,
            error = tracing::field::Empty
        )
    }

    pub fn schedule_span() -> tracing::Span {
        tracing::info_span!("schedule_loop", error = tracing::field::Empty)
    }

    pub fn record_error(error: &dyn std::error::Error) {
        tracing::Span::current().record("error", tracing::field::display(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_without_recorder() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_job_trigger(1, "CRON", true, 0.01);
        metrics.record_trigger_rejected(1, "fast");
        metrics.update_time_ring_size(3.0);
    }

    #[test]
    fn test_lane_trigger_counter_carries_lane_label() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            let metrics = MetricsCollector::new().unwrap();
            metrics.record_lane_trigger("slow");
            metrics.record_lane_trigger("slow");
            metrics.record_lane_trigger("fast");
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"scheduler_lane_triggers_total{lane="slow"} 2"#));
        assert!(rendered.contains(r#"scheduler_lane_triggers_total{lane="fast"} 1"#));
    }

    #[test]
    fn test_log_format_parse() {
        assert!(matches!(LogFormat::parse("json"), Some(LogFormat::Json)));
        assert!(matches!(LogFormat::parse("compact"), Some(LogFormat::Compact)));
        assert!(LogFormat::parse("xml").is_none());
    }
}
