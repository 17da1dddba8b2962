//! 调度中心核心
//!
//! 调度扫描、时间轮、快慢触发线程池、执行器路由、注册中心、失败与结果监控、
//! 日志报表，以及把它们组装在一起的 [`SchedulerCoordinator`]。

pub mod client_cache;
pub mod complete_monitor;
pub mod controller;
pub mod coordinator;
pub mod cron_utils;
pub mod fail_monitor;
pub mod lifecycle;
pub mod log_report;
pub mod registry;
pub mod scheduler;
pub mod slow_tracker;
pub mod strategies;
pub mod time_ring;
pub mod trigger;
pub mod trigger_pool;

#[cfg(test)]
pub mod test_utils;

pub use complete_monitor::JobCompleter;
pub use controller::JobController;
pub use coordinator::{CoordinatorStores, SchedulerCoordinator};
pub use lifecycle::StopSignal;
pub use registry::RegistryTracker;
pub use strategies::NO_AVAILABLE_EXECUTOR;
pub use trigger_pool::{TriggerRequest, TriggerSubmitter};
