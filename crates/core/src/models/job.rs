use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 调度任务定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: i64,
    /// 所属执行器分组
    pub job_group: i64,
    pub job_desc: String,
    pub alarm_email: Option<String>,
    pub schedule_type: ScheduleType,
    /// CRON表达式（带秒字段）或固定频率秒数
    pub schedule_conf: String,
    pub misfire_strategy: MisfireStrategy,
    pub executor_route_strategy: RouteStrategy,
    pub executor_handler: String,
    pub executor_param: String,
    pub executor_block_strategy: BlockStrategy,
    /// 执行超时（秒），0表示不限制
    pub executor_timeout: i32,
    pub executor_fail_retry_count: i32,
    pub child_job_ids: Vec<i64>,
    /// 调度状态：true运行，false停止
    pub trigger_status: bool,
    pub trigger_last_time: Option<DateTime<Utc>>,
    pub trigger_next_time: Option<DateTime<Utc>>,
}

impl JobInfo {
    pub fn new(job_group: i64, executor_handler: impl Into<String>) -> Self {
        Self {
            id: 0,
            job_group,
            job_desc: String::new(),
            alarm_email: None,
            schedule_type: ScheduleType::Cron,
            schedule_conf: "0 * * * * *".to_string(),
            misfire_strategy: MisfireStrategy::DoNothing,
            executor_route_strategy: RouteStrategy::First,
            executor_handler: executor_handler.into(),
            executor_param: String::new(),
            executor_block_strategy: BlockStrategy::SerialExecution,
            executor_timeout: 0,
            executor_fail_retry_count: 0,
            child_job_ids: Vec::new(),
            trigger_status: false,
            trigger_last_time: None,
            trigger_next_time: None,
        }
    }

    /// 停止调度并清空触发时间
    pub fn stop_schedule(&mut self) {
        self.trigger_status = false;
        self.trigger_last_time = None;
        self.trigger_next_time = None;
    }
}

/// 调度类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleType {
    None,
    Cron,
    FixRate,
}

/// 调度过期策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MisfireStrategy {
    /// 忽略本次过期调度
    DoNothing,
    /// 立即补偿触发一次
    FireOnceNow,
}

/// 阻塞处理策略，随触发参数下发给执行器
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockStrategy {
    SerialExecution,
    DiscardLater,
    CoverEarly,
}

/// 执行器路由策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteStrategy {
    First,
    Last,
    Round,
    Random,
    ConsistentHash,
    LeastFrequentlyUsed,
    LeastRecentlyUsed,
    Failover,
    Busyover,
    ShardingBroadcast,
}

/// 触发类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    Manual,
    Cron,
    Retry,
    Parent,
    Api,
    Misfire,
}

macro_rules! str_enum {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $s),+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($s => Some($ty::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(ScheduleType {
    None => "NONE",
    Cron => "CRON",
    FixRate => "FIX_RATE",
});

str_enum!(MisfireStrategy {
    DoNothing => "DO_NOTHING",
    FireOnceNow => "FIRE_ONCE_NOW",
});

str_enum!(BlockStrategy {
    SerialExecution => "SERIAL_EXECUTION",
    DiscardLater => "DISCARD_LATER",
    CoverEarly => "COVER_EARLY",
});

str_enum!(RouteStrategy {
    First => "FIRST",
    Last => "LAST",
    Round => "ROUND",
    Random => "RANDOM",
    ConsistentHash => "CONSISTENT_HASH",
    LeastFrequentlyUsed => "LEAST_FREQUENTLY_USED",
    LeastRecentlyUsed => "LEAST_RECENTLY_USED",
    Failover => "FAILOVER",
    Busyover => "BUSYOVER",
    ShardingBroadcast => "SHARDING_BROADCAST",
});

str_enum!(TriggerType {
    Manual => "MANUAL",
    Cron => "CRON",
    Retry => "RETRY",
    Parent => "PARENT",
    Api => "API",
    Misfire => "MISFIRE",
});

impl TriggerType {
    /// 写入调度日志的触发类型名称
    pub fn title(&self) -> &'static str {
        match self {
            TriggerType::Manual => "手动触发",
            TriggerType::Cron => "Cron触发",
            TriggerType::Retry => "失败重试触发",
            TriggerType::Parent => "父任务触发",
            TriggerType::Api => "API触发",
            TriggerType::Misfire => "调度过期补偿",
        }
    }
}

impl RouteStrategy {
    pub fn title(&self) -> &'static str {
        match self {
            RouteStrategy::First => "第一个",
            RouteStrategy::Last => "最后一个",
            RouteStrategy::Round => "轮询",
            RouteStrategy::Random => "随机",
            RouteStrategy::ConsistentHash => "一致性HASH",
            RouteStrategy::LeastFrequentlyUsed => "最不经常使用",
            RouteStrategy::LeastRecentlyUsed => "最近最久未使用",
            RouteStrategy::Failover => "故障转移",
            RouteStrategy::Busyover => "忙碌转移",
            RouteStrategy::ShardingBroadcast => "分片广播",
        }
    }
}

impl BlockStrategy {
    pub fn title(&self) -> &'static str {
        match self {
            BlockStrategy::SerialExecution => "单机串行",
            BlockStrategy::DiscardLater => "丢弃后续调度",
            BlockStrategy::CoverEarly => "覆盖之前调度",
        }
    }
}
