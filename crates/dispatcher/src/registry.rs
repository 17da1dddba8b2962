use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scheduler_core::{
    models::{AddressType, ExecutorResponse, Registration, RegistryParam, RegistryType},
    traits::{JobGroupRepository, RegistryRepository},
    SchedulerResult,
};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};
use tracing::{debug, error, info};

use crate::lifecycle::StopSignal;

/// 执行器注册表维护
///
/// 接收执行器心跳，周期性清理超时的注册记录，并按应用名重建自动注册分组的地址列表。
pub struct RegistryTracker {
    registry_repo: Arc<dyn RegistryRepository>,
    group_repo: Arc<dyn JobGroupRepository>,
    dead_timeout: chrono::Duration,
    beat_interval: Duration,
    metrics: Arc<MetricsCollector>,
}

impl RegistryTracker {
    pub fn new(
        registry_repo: Arc<dyn RegistryRepository>,
        group_repo: Arc<dyn JobGroupRepository>,
        dead_timeout: chrono::Duration,
        beat_interval: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            registry_repo,
            group_repo,
            dead_timeout,
            beat_interval,
            metrics,
        }
    }

    fn validate(param: &RegistryParam) -> Result<RegistryType, ExecutorResponse> {
        if param.registry_key.trim().is_empty() || param.registry_value.trim().is_empty() {
            return Err(ExecutorResponse::fail("Illegal Argument."));
        }
        RegistryType::parse(param.registry_group.trim())
            .ok_or_else(|| ExecutorResponse::fail("Illegal Argument."))
    }

    /// 注册或刷新心跳
    pub async fn registry(&self, param: &RegistryParam, now: DateTime<Utc>) -> ExecutorResponse {
        let registry_type = match Self::validate(param) {
            Ok(registry_type) => registry_type,
            Err(response) => return response,
        };

        match self
            .registry_repo
            .save_or_update(
                registry_type,
                param.registry_key.trim(),
                param.registry_value.trim(),
                now,
            )
            .await
        {
            Ok(()) => {
                StructuredLogger::log_executor_registered(&param.registry_key, &param.registry_value);
                ExecutorResponse::success()
            }
            Err(e) => {
                error!("保存执行器注册信息失败: {}", e);
                ExecutorResponse::fail(e.to_string())
            }
        }
    }

    /// 执行器主动下线
    pub async fn registry_remove(&self, param: &RegistryParam) -> ExecutorResponse {
        let registry_type = match Self::validate(param) {
            Ok(registry_type) => registry_type,
            Err(response) => return response,
        };

        match self
            .registry_repo
            .delete(
                registry_type,
                param.registry_key.trim(),
                param.registry_value.trim(),
            )
            .await
        {
            Ok(removed) => {
                info!(
                    "执行器下线: {} {}，删除 {} 条注册记录",
                    param.registry_key, param.registry_value, removed
                );
                ExecutorResponse::success()
            }
            Err(e) => {
                error!("删除执行器注册信息失败: {}", e);
                ExecutorResponse::fail(e.to_string())
            }
        }
    }

    /// 当前在线的执行器地址
    pub async fn live_addresses(&self, now: DateTime<Utc>) -> SchedulerResult<HashSet<String>> {
        let live = self.registry_repo.find_live(now - self.dead_timeout).await?;
        Ok(live
            .into_iter()
            .filter(|r| r.registry_group == RegistryType::Executor)
            .map(|r| r.registry_value)
            .collect())
    }

    /// 清理一次超时注册并重建自动注册分组的地址列表
    pub async fn refresh_once(&self, now: DateTime<Utc>) -> SchedulerResult<()> {
        let dead_before = now - self.dead_timeout;
        let removed = self.registry_repo.remove_dead(dead_before).await?;
        if removed > 0 {
            info!("清理 {} 条超时的执行器注册记录", removed);
        }

        let live = self.registry_repo.find_live(dead_before).await?;
        let addresses_by_app = group_addresses_by_app(&live);
        let live_count: usize = addresses_by_app.values().map(Vec::len).sum();
        self.metrics.update_live_executors(live_count as f64);

        let groups = self
            .group_repo
            .find_by_address_type(AddressType::Auto)
            .await?;
        for group in groups {
            let addresses = addresses_by_app
                .get(&group.app_name)
                .cloned()
                .unwrap_or_default();
            if addresses != group.address_list {
                debug!(
                    "执行器分组 {} 地址变更: {:?} -> {:?}",
                    group.app_name, group.address_list, addresses
                );
                self.group_repo
                    .update_address_list(group.id, &addresses, now)
                    .await?;
            }
        }
        Ok(())
    }

    /// 注册表维护循环
    pub async fn run(&self, stop: StopSignal) {
        info!("执行器注册表维护线程启动");
        while !stop.is_stopped() {
            if let Err(e) = self.refresh_once(Utc::now()).await {
                StructuredLogger::log_system_error("registry", "refresh", &e);
            }
            if stop.sleep(self.beat_interval).await {
                break;
            }
        }
        info!("执行器注册表维护线程停止");
    }
}

/// 按应用名聚合执行器地址，地址去重并排序
pub fn group_addresses_by_app(registrations: &[Registration]) -> HashMap<String, Vec<String>> {
    let mut grouped: HashMap<String, BTreeSet<String>> = HashMap::new();
    for registration in registrations {
        if registration.registry_group != RegistryType::Executor {
            continue;
        }
        grouped
            .entry(registration.registry_key.clone())
            .or_default()
            .insert(registration.registry_value.clone());
    }
    grouped
        .into_iter()
        .map(|(app, addresses)| (app, addresses.into_iter().collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::models::JobGroup;
    use scheduler_infrastructure::InMemoryStore;

    fn tracker(store: &InMemoryStore) -> RegistryTracker {
        RegistryTracker::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            chrono::Duration::seconds(90),
            Duration::from_secs(30),
            Arc::new(MetricsCollector::new().unwrap()),
        )
    }

    fn registration(group: RegistryType, app: &str, address: &str) -> Registration {
        Registration {
            id: 0,
            registry_group: group,
            registry_key: app.to_string(),
            registry_value: address.to_string(),
            update_time: Utc::now(),
        }
    }

    #[test]
    fn test_group_addresses_sorted_and_deduplicated() {
        let grouped = group_addresses_by_app(&[
            registration(RegistryType::Executor, "app", "http://b"),
            registration(RegistryType::Executor, "app", "http://a"),
            registration(RegistryType::Executor, "app", "http://b"),
            registration(RegistryType::Admin, "app", "http://admin"),
            registration(RegistryType::Executor, "other", "http://c"),
        ]);
        assert_eq!(grouped["app"], vec!["http://a", "http://b"]);
        assert_eq!(grouped["other"], vec!["http://c"]);
    }

    #[tokio::test]
    async fn test_registry_rejects_blank_fields() {
        let store = InMemoryStore::new();
        let tracker = tracker(&store);
        let response = tracker
            .registry(&RegistryParam::executor("", "http://a"), Utc::now())
            .await;
        assert!(!response.is_success());

        let mut bad_group = RegistryParam::executor("app", "http://a");
        bad_group.registry_group = "UNKNOWN".to_string();
        assert!(!tracker.registry(&bad_group, Utc::now()).await.is_success());
        assert!(store.all_registrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_rebuilds_auto_groups_only() {
        let store = InMemoryStore::new();
        let tracker = tracker(&store);
        let now = Utc::now();

        let auto = JobGroupRepository::create(&store, &JobGroup::new("app", "应用"))
            .await
            .unwrap();
        let manual = JobGroupRepository::create(
            &store,
            &JobGroup::manual("app", vec!["http://manual".to_string()]),
        )
        .await
        .unwrap();

        for address in ["http://b", "http://a"] {
            assert!(tracker
                .registry(&RegistryParam::executor("app", address), now)
                .await
                .is_success());
        }
        tracker.refresh_once(now).await.unwrap();

        let auto = JobGroupRepository::get_by_id(&store, auto.id).await.unwrap().unwrap();
        assert_eq!(auto.address_list, vec!["http://a", "http://b"]);
        let manual = JobGroupRepository::get_by_id(&store, manual.id).await.unwrap().unwrap();
        assert_eq!(manual.address_list, vec!["http://manual"]);
    }

    #[tokio::test]
    async fn test_dead_registrations_dropped_after_timeout() {
        let store = InMemoryStore::new();
        let tracker = tracker(&store);
        let now = Utc::now();
        let group = JobGroupRepository::create(&store, &JobGroup::new("app", "应用"))
            .await
            .unwrap();

        tracker
            .registry(&RegistryParam::executor("app", "http://a"), now)
            .await;
        tracker
            .registry(
                &RegistryParam::executor("app", "http://b"),
                now + chrono::Duration::seconds(60),
            )
            .await;

        // 91秒后 a 超时，b 仍在线
        let later = now + chrono::Duration::seconds(91);
        tracker.refresh_once(later).await.unwrap();
        let group = JobGroupRepository::get_by_id(&store, group.id).await.unwrap().unwrap();
        assert_eq!(group.address_list, vec!["http://b"]);
        assert_eq!(
            tracker.live_addresses(later).await.unwrap(),
            HashSet::from(["http://b".to_string()])
        );
        assert_eq!(store.all_registrations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_registry_remove_drops_address() {
        let store = InMemoryStore::new();
        let tracker = tracker(&store);
        let now = Utc::now();
        let param = RegistryParam::executor("app", "http://a");

        tracker.registry(&param, now).await;
        assert!(tracker.registry_remove(&param).await.is_success());
        assert!(tracker.live_addresses(now).await.unwrap().is_empty());
    }
}
