use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use scheduler_core::{traits::ClusterLock, SchedulerError, SchedulerResult};
use sha2::{Digest, Sha256};
use sqlx::{pool::PoolConnection, PgPool, Postgres};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// 基于PostgreSQL会话级advisory lock的集群锁
///
/// advisory lock归属于数据库会话，持锁期间占用一个连接，释放时在同一连接上解锁。
pub struct PostgresClusterLock {
    pool: PgPool,
    held: Mutex<HashMap<String, PoolConnection<Postgres>>>,
}

impl PostgresClusterLock {
    const RETRY_INTERVAL: Duration = Duration::from_millis(100);

    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// 锁名到advisory lock键的映射，所有实例必须一致
    pub fn lock_key(scope: &str) -> i64 {
        let digest = Sha256::digest(scope.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        i64::from_be_bytes(bytes)
    }
}

#[async_trait]
impl ClusterLock for PostgresClusterLock {
    async fn acquire(&self, scope: &str, timeout: Duration) -> SchedulerResult<bool> {
        let key = Self::lock_key(scope);
        let deadline = tokio::time::Instant::now() + timeout;

        let mut conn = tokio::time::timeout(timeout, self.pool.acquire())
            .await
            .map_err(|_| SchedulerError::LockUnavailable {
                scope: scope.to_string(),
            })?
            .map_err(SchedulerError::Database)?;

        loop {
            let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
                .bind(key)
                .fetch_one(&mut *conn)
                .await
                .map_err(SchedulerError::Database)?;

            if locked {
                debug!("获取集群锁成功: {}", scope);
                self.held.lock().await.insert(scope.to_string(), conn);
                return Ok(true);
            }

            if tokio::time::Instant::now() + Self::RETRY_INTERVAL > deadline {
                return Ok(false);
            }
            tokio::time::sleep(Self::RETRY_INTERVAL).await;
        }
    }

    async fn release(&self, scope: &str) -> SchedulerResult<()> {
        let Some(mut conn) = self.held.lock().await.remove(scope) else {
            return Ok(());
        };

        let unlocked: bool = match sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(Self::lock_key(scope))
            .fetch_one(&mut *conn)
            .await
        {
            Ok(unlocked) => unlocked,
            Err(e) => {
                // 连接不能带着锁回到连接池，直接关闭会话由数据库释放锁
                drop(conn.detach());
                return Err(SchedulerError::Database(e));
            }
        };

        if !unlocked {
            warn!("集群锁 {} 在释放时已不属于当前会话", scope);
        }
        Ok(())
    }
}
