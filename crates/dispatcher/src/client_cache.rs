use std::sync::Arc;

use dashmap::DashMap;
use scheduler_core::traits::{ExecutorClient, ExecutorClientFactory};
use tracing::debug;

/// 执行器客户端缓存
///
/// 按地址缓存客户端，同一地址并发获取时只创建一次。
pub struct ExecutorClientCache {
    factory: Arc<dyn ExecutorClientFactory>,
    access_token: Option<String>,
    clients: DashMap<String, Arc<dyn ExecutorClient>>,
}

impl ExecutorClientCache {
    pub fn new(factory: Arc<dyn ExecutorClientFactory>, access_token: Option<String>) -> Self {
        Self {
            factory,
            access_token,
            clients: DashMap::new(),
        }
    }

    /// 获取地址对应的客户端，空地址返回 `None`
    pub fn get(&self, address: &str) -> Option<Arc<dyn ExecutorClient>> {
        let address = address.trim();
        if address.is_empty() {
            return None;
        }

        if let Some(client) = self.clients.get(address) {
            return Some(client.clone());
        }

        let client = self
            .clients
            .entry(address.to_string())
            .or_insert_with(|| {
                debug!("创建执行器客户端: {}", address);
                self.factory.create(address, self.access_token.as_deref())
            })
            .clone();
        Some(client)
    }

    /// 移除地址对应的客户端，执行器下线后调用
    pub fn remove(&self, address: &str) {
        self.clients.remove(address.trim());
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mocks::MockClientFactory;

    #[test]
    fn test_client_created_once_per_address() {
        let factory = Arc::new(MockClientFactory::default());
        let cache = ExecutorClientCache::new(factory.clone(), None);

        let a = cache.get("http://a").unwrap();
        let again = cache.get(" http://a ").unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        cache.get("http://b").unwrap();

        assert_eq!(factory.created(), 2);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("  ").is_none());

        cache.remove("http://a");
        cache.get("http://a").unwrap();
        assert_eq!(factory.created(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_get_shares_client() {
        let factory = Arc::new(MockClientFactory::default());
        let cache = Arc::new(ExecutorClientCache::new(factory.clone(), None));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get("http://shared").is_some() })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(factory.created(), 1);
    }
}
