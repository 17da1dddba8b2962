//! 执行器路由策略
//!
//! 每种策略从分组的在线地址列表中选出本次触发的目标地址。
//! 有状态的策略（轮询、LFU、LRU）按任务维护状态，每24小时重置一次。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use scheduler_core::models::{ExecutorResponse, IdleBeatParam, RouteStrategy};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::client_cache::ExecutorClientCache;

/// 有状态策略的状态有效期
const STATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// 计数超过该值时重新随机初始化
const COUNTER_RESET_LIMIT: u64 = 1_000_000;
/// 一致性哈希每个地址的虚拟节点数
const VIRTUAL_NODES: usize = 100;

/// 路由上下文
pub struct RouteContext<'a> {
    pub job_id: i64,
    /// 本次下发的分片序号，非广播任务为0
    pub shard_index: usize,
    pub addresses: &'a [String],
    pub clients: &'a ExecutorClientCache,
}

/// 路由结果
#[derive(Debug, Clone, PartialEq)]
pub enum RouteSelection {
    /// 选中单个地址，`trail` 记录探测过程
    Single {
        address: String,
        trail: Option<String>,
    },
    /// 无可用地址
    Unavailable(String),
}

impl RouteSelection {
    fn single(address: &str) -> Self {
        RouteSelection::Single {
            address: address.to_string(),
            trail: None,
        }
    }
}

/// 路由策略接口
#[async_trait]
pub trait ExecutorRouteStrategy: Send + Sync {
    /// 地址列表保证非空
    async fn route(&self, ctx: &RouteContext<'_>) -> RouteSelection;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 按任务保存的策略状态，过期后整体清空
struct ExpiringState<T> {
    entries: HashMap<i64, T>,
    expires_at: Instant,
}

impl<T> ExpiringState<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            expires_at: Instant::now() + STATE_TTL,
        }
    }

    fn entries(&mut self) -> &mut HashMap<i64, T> {
        let now = Instant::now();
        if now >= self.expires_at {
            self.entries.clear();
            self.expires_at = now + STATE_TTL;
        }
        &mut self.entries
    }
}

pub struct FirstStrategy;

#[async_trait]
impl ExecutorRouteStrategy for FirstStrategy {
    async fn route(&self, ctx: &RouteContext<'_>) -> RouteSelection {
        RouteSelection::single(&ctx.addresses[0])
    }
}

pub struct LastStrategy;

#[async_trait]
impl ExecutorRouteStrategy for LastStrategy {
    async fn route(&self, ctx: &RouteContext<'_>) -> RouteSelection {
        RouteSelection::single(&ctx.addresses[ctx.addresses.len() - 1])
    }
}

/// 轮询：每个任务一个计数器，首次使用时随机起点，避免所有任务都压在第一台机器上
pub struct RoundStrategy {
    counters: Mutex<ExpiringState<u64>>,
}

impl RoundStrategy {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(ExpiringState::new()),
        }
    }

    fn next_count(&self, job_id: i64) -> u64 {
        let mut state = lock(&self.counters);
        let count = state
            .entries()
            .entry(job_id)
            .and_modify(|count| *count += 1)
            .or_insert_with(|| rand::rng().random_range(0..100));
        if *count > COUNTER_RESET_LIMIT {
            *count = rand::rng().random_range(0..100);
        }
        *count
    }
}

impl Default for RoundStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutorRouteStrategy for RoundStrategy {
    async fn route(&self, ctx: &RouteContext<'_>) -> RouteSelection {
        let count = self.next_count(ctx.job_id);
        let index = (count % ctx.addresses.len() as u64) as usize;
        debug!("轮询策略选择地址: 任务 {}，计数 {}", ctx.job_id, count);
        RouteSelection::single(&ctx.addresses[index])
    }
}

pub struct RandomStrategy;

#[async_trait]
impl ExecutorRouteStrategy for RandomStrategy {
    async fn route(&self, ctx: &RouteContext<'_>) -> RouteSelection {
        let index = rand::rng().random_range(0..ctx.addresses.len());
        RouteSelection::single(&ctx.addresses[index])
    }
}

/// 一致性哈希：地址扩缩容时大部分任务仍落在原机器上
pub struct ConsistentHashStrategy;

impl ConsistentHashStrategy {
    fn hash(key: &str) -> u64 {
        let digest = Sha256::digest(key.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }

    pub fn select<'a>(job_id: i64, addresses: &'a [String]) -> &'a str {
        let mut ring: BTreeMap<u64, &str> = BTreeMap::new();
        for address in addresses {
            for node in 0..VIRTUAL_NODES {
                ring.insert(
                    Self::hash(&format!("SHARD-{address}-NODE-{node}")),
                    address.as_str(),
                );
            }
        }

        let job_hash = Self::hash(&job_id.to_string());
        ring.range(job_hash..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, address)| *address)
            .unwrap_or(addresses[0].as_str())
    }
}

#[async_trait]
impl ExecutorRouteStrategy for ConsistentHashStrategy {
    async fn route(&self, ctx: &RouteContext<'_>) -> RouteSelection {
        RouteSelection::single(Self::select(ctx.job_id, ctx.addresses))
    }
}

/// 最不经常使用：选择该任务使用次数最少的地址
pub struct LeastFrequentlyUsedStrategy {
    usage: Mutex<ExpiringState<HashMap<String, u64>>>,
}

impl LeastFrequentlyUsedStrategy {
    pub fn new() -> Self {
        Self {
            usage: Mutex::new(ExpiringState::new()),
        }
    }

    fn select(&self, job_id: i64, addresses: &[String]) -> String {
        let mut state = lock(&self.usage);
        let usage = state.entries().entry(job_id).or_default();

        // 新地址随机初始计数，避免新上线的机器瞬间接收全部流量
        let mut rng = rand::rng();
        for address in addresses {
            let count = usage.entry(address.clone()).or_insert_with(|| {
                rng.random_range(0..addresses.len() as u64)
            });
            if *count > COUNTER_RESET_LIMIT {
                *count = 0;
            }
        }
        usage.retain(|address, _| addresses.contains(address));

        let selected = usage
            .iter()
            .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(address, _)| address.clone())
            .unwrap_or_else(|| addresses[0].clone());
        if let Some(count) = usage.get_mut(&selected) {
            *count += 1;
        }
        selected
    }
}

impl Default for LeastFrequentlyUsedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutorRouteStrategy for LeastFrequentlyUsedStrategy {
    async fn route(&self, ctx: &RouteContext<'_>) -> RouteSelection {
        RouteSelection::Single {
            address: self.select(ctx.job_id, ctx.addresses),
            trail: None,
        }
    }
}

/// 最近最久未使用：按访问顺序排列，选择最久未被选中的地址
pub struct LeastRecentlyUsedStrategy {
    access_order: Mutex<ExpiringState<Vec<String>>>,
}

impl LeastRecentlyUsedStrategy {
    pub fn new() -> Self {
        Self {
            access_order: Mutex::new(ExpiringState::new()),
        }
    }

    fn select(&self, job_id: i64, addresses: &[String]) -> String {
        let mut state = lock(&self.access_order);
        let order = state.entries().entry(job_id).or_default();

        for address in addresses {
            if !order.contains(address) {
                order.push(address.clone());
            }
        }
        order.retain(|address| addresses.contains(address));

        let selected = order.remove(0);
        order.push(selected.clone());
        selected
    }
}

impl Default for LeastRecentlyUsedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutorRouteStrategy for LeastRecentlyUsedStrategy {
    async fn route(&self, ctx: &RouteContext<'_>) -> RouteSelection {
        RouteSelection::Single {
            address: self.select(ctx.job_id, ctx.addresses),
            trail: None,
        }
    }
}

fn check_message(title: &str, address: &str, response: &ExecutorResponse) -> String {
    format!(
        "{}：<br>address：{}<br>code：{}<br>msg：{}",
        title,
        address,
        response.code,
        response.msg.as_deref().unwrap_or("")
    )
}

/// 故障转移：依次心跳探测，选择第一个存活的地址
pub struct FailoverStrategy;

#[async_trait]
impl ExecutorRouteStrategy for FailoverStrategy {
    async fn route(&self, ctx: &RouteContext<'_>) -> RouteSelection {
        let mut trail = Vec::new();
        for address in ctx.addresses {
            let response = match ctx.clients.get(address) {
                Some(client) => client
                    .beat()
                    .await
                    .unwrap_or_else(|e| ExecutorResponse::fail(e.to_string())),
                None => ExecutorResponse::fail("执行器地址无效"),
            };
            trail.push(check_message("心跳检测", address, &response));

            if response.is_success() {
                return RouteSelection::Single {
                    address: address.clone(),
                    trail: Some(trail.join("<br><br>")),
                };
            }
        }
        RouteSelection::Unavailable(trail.join("<br><br>"))
    }
}

/// 忙碌转移：依次探测任务是否正在执行，选择第一个空闲的地址
pub struct BusyoverStrategy;

#[async_trait]
impl ExecutorRouteStrategy for BusyoverStrategy {
    async fn route(&self, ctx: &RouteContext<'_>) -> RouteSelection {
        let param = IdleBeatParam { job_id: ctx.job_id };
        let mut trail = Vec::new();
        for address in ctx.addresses {
            let response = match ctx.clients.get(address) {
                Some(client) => client
                    .idle_beat(&param)
                    .await
                    .unwrap_or_else(|e| ExecutorResponse::fail(e.to_string())),
                None => ExecutorResponse::fail("执行器地址无效"),
            };
            trail.push(check_message("空闲检测", address, &response));

            if response.is_success() {
                return RouteSelection::Single {
                    address: address.clone(),
                    trail: Some(trail.join("<br><br>")),
                };
            }
        }
        RouteSelection::Unavailable(trail.join("<br><br>"))
    }
}

/// 分片广播：触发构建器按地址数拆分成多次下发，每次取分片序号对应的地址
pub struct ShardingBroadcastStrategy;

#[async_trait]
impl ExecutorRouteStrategy for ShardingBroadcastStrategy {
    async fn route(&self, ctx: &RouteContext<'_>) -> RouteSelection {
        match ctx.addresses.get(ctx.shard_index) {
            Some(address) => RouteSelection::single(address),
            None => RouteSelection::Unavailable(NO_AVAILABLE_EXECUTOR.to_string()),
        }
    }
}

/// 路由器：持有所有策略实例，按任务配置的策略分派
pub struct ExecutorRouter {
    strategies: HashMap<RouteStrategy, Arc<dyn ExecutorRouteStrategy>>,
}

impl ExecutorRouter {
    pub fn new() -> Self {
        let mut strategies: HashMap<RouteStrategy, Arc<dyn ExecutorRouteStrategy>> =
            HashMap::new();
        strategies.insert(RouteStrategy::First, Arc::new(FirstStrategy));
        strategies.insert(RouteStrategy::Last, Arc::new(LastStrategy));
        strategies.insert(RouteStrategy::Round, Arc::new(RoundStrategy::new()));
        strategies.insert(RouteStrategy::Random, Arc::new(RandomStrategy));
        strategies.insert(RouteStrategy::ConsistentHash, Arc::new(ConsistentHashStrategy));
        strategies.insert(
            RouteStrategy::LeastFrequentlyUsed,
            Arc::new(LeastFrequentlyUsedStrategy::new()),
        );
        strategies.insert(
            RouteStrategy::LeastRecentlyUsed,
            Arc::new(LeastRecentlyUsedStrategy::new()),
        );
        strategies.insert(RouteStrategy::Failover, Arc::new(FailoverStrategy));
        strategies.insert(RouteStrategy::Busyover, Arc::new(BusyoverStrategy));
        strategies.insert(
            RouteStrategy::ShardingBroadcast,
            Arc::new(ShardingBroadcastStrategy),
        );
        Self { strategies }
    }

    /// 按策略路由；地址列表为空时直接返回不可用
    pub async fn route(&self, strategy: RouteStrategy, ctx: &RouteContext<'_>) -> RouteSelection {
        if ctx.addresses.is_empty() {
            return RouteSelection::Unavailable(NO_AVAILABLE_EXECUTOR.to_string());
        }
        match self.strategies.get(&strategy) {
            Some(router) => router.route(ctx).await,
            None => RouteSelection::Unavailable(format!("未知的路由策略: {}", strategy)),
        }
    }
}

impl Default for ExecutorRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// 分组没有任何在线地址时的触发失败原因
pub const NO_AVAILABLE_EXECUTOR: &str = "调度失败：执行器地址为空";
