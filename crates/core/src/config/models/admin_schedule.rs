use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 调度中心配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// 调度中心与执行器之间通讯的访问令牌
    pub access_token: Option<String>,
    /// 写入调度日志的调度中心地址，为空时使用主机名
    pub admin_address: Option<String>,
    pub trigger_pool_fast_max: usize,
    pub trigger_pool_slow_max: usize,
    pub trigger_pool_fast_queue: usize,
    pub trigger_pool_slow_queue: usize,
    /// 调度日志保留天数，小于7时不清理
    pub log_retention_days: i64,
    /// 报表保留天数，0表示永久保留
    pub log_report_retention_days: i64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            admin_address: None,
            trigger_pool_fast_max: 200,
            trigger_pool_slow_max: 100,
            trigger_pool_fast_queue: 1000,
            trigger_pool_slow_queue: 2000,
            log_retention_days: 30,
            log_report_retention_days: 0,
        }
    }
}

impl AdminConfig {
    /// 生效的日志保留天数，未开启清理时返回None
    pub fn effective_log_retention_days(&self) -> Option<i64> {
        (self.log_retention_days >= 7).then_some(self.log_retention_days)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.trigger_pool_fast_max == 0 || self.trigger_pool_slow_max == 0 {
            return Err(anyhow::anyhow!("调度线程池大小必须大于0"));
        }

        if self.trigger_pool_fast_queue == 0 || self.trigger_pool_slow_queue == 0 {
            return Err(anyhow::anyhow!("调度队列容量必须大于0"));
        }

        if self.log_report_retention_days < 0 {
            return Err(anyhow::anyhow!("报表保留天数不能为负数"));
        }

        Ok(())
    }
}

/// 调度策略参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// 预读窗口（毫秒）
    pub pre_read_ms: u64,
    /// 单次预读数量 = (快池 + 慢池) * pre_read_factor
    pub pre_read_factor: usize,
    pub lock_timeout_ms: u64,
    pub rpc_timeout_ms: u64,
    pub registry_beat_seconds: u64,
    pub registry_dead_seconds: i64,
    pub fail_monitor_interval_seconds: u64,
    pub complete_monitor_interval_seconds: u64,
    pub lost_job_threshold_seconds: i64,
    pub log_report_interval_seconds: u64,
    pub slow_trigger_threshold_ms: u64,
    pub slow_trigger_max_count: u32,
    pub slow_trigger_window_seconds: u64,
    pub wheel_drain_timeout_seconds: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            pre_read_ms: 5000,
            pre_read_factor: 20,
            lock_timeout_ms: 3000,
            rpc_timeout_ms: 3000,
            registry_beat_seconds: 30,
            registry_dead_seconds: 90,
            fail_monitor_interval_seconds: 10,
            complete_monitor_interval_seconds: 60,
            lost_job_threshold_seconds: 600,
            log_report_interval_seconds: 60,
            slow_trigger_threshold_ms: 500,
            slow_trigger_max_count: 10,
            slow_trigger_window_seconds: 60,
            wheel_drain_timeout_seconds: 8,
        }
    }
}

impl ScheduleConfig {
    pub fn pre_read(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.pre_read_ms as i64)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pre_read_ms < 1000 {
            return Err(anyhow::anyhow!("预读窗口不能小于1000毫秒"));
        }

        if self.rpc_timeout_ms == 0 || self.lock_timeout_ms == 0 {
            return Err(anyhow::anyhow!("超时时间必须大于0"));
        }

        if self.registry_dead_seconds <= self.registry_beat_seconds as i64 {
            return Err(anyhow::anyhow!("注册过期时间必须大于心跳周期"));
        }

        if self.slow_trigger_window_seconds == 0 || self.slow_trigger_window_seconds > 3600 {
            return Err(anyhow::anyhow!("慢调度统计窗口必须在1到3600秒之间"));
        }

        if self.fail_monitor_interval_seconds == 0
            || self.complete_monitor_interval_seconds == 0
            || self.log_report_interval_seconds == 0
        {
            return Err(anyhow::anyhow!("监控周期必须大于0"));
        }

        Ok(())
    }
}
