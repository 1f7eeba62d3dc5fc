//! 订单持久化
//!
//! 在按用户加分布式锁的前提下把队列消息写成订单行。锁防的是恢复回放
//! 与主循环对同一用户的并发写入；重复投递在这里被吸收——已存在的
//! (user, voucher) 订单直接视为成功。库存不再扣减：准入脚本的扣减是
//! 唯一权威，这里只断言唯一性并写行。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use shared::order::{Order, QueueMessage};

use crate::db::{OrderRepository, RepoError};
use crate::store::StoreError;
use crate::utils::LockManager;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    /// 同一用户的另一次持久化正在进行；消息留在 pending-list 稍后回放
    #[error("persistence lock contention for user {0}")]
    LockContention(u64),
}

/// 订单持久化器
pub struct OrderPersister {
    repo: Arc<dyn OrderRepository>,
    locks: Arc<LockManager>,
    lock_ttl: Duration,
}

impl OrderPersister {
    pub fn new(repo: Arc<dyn OrderRepository>, locks: Arc<LockManager>, lock_ttl: Duration) -> Self {
        Self {
            repo,
            locks,
            lock_ttl,
        }
    }

    /// 把一条队列消息持久化为订单，可安全重复调用
    pub async fn persist(&self, msg: &QueueMessage) -> Result<(), PersistError> {
        let resource = format!("order:{}", msg.user_id);
        let Some(handle) = self.locks.try_acquire(&resource, self.lock_ttl).await? else {
            return Err(PersistError::LockContention(msg.user_id));
        };

        let result = self.apply(msg).await;
        if let Err(e) = self.locks.release(handle).await {
            tracing::warn!(user_id = msg.user_id, error = ?e, "Failed to release order lock");
        }
        result
    }

    /// 幂等写入：已存在即成功，唯一冲突即成功
    async fn apply(&self, msg: &QueueMessage) -> Result<(), PersistError> {
        if self.repo.exists(msg.user_id, msg.voucher_id).await? {
            tracing::debug!(
                user_id = msg.user_id,
                voucher_id = msg.voucher_id,
                "Order already persisted, absorbing redelivery"
            );
            return Ok(());
        }

        let order = Order {
            id: msg.order_id,
            user_id: msg.user_id,
            voucher_id: msg.voucher_id,
            created_at: Utc::now(),
        };
        match self.repo.insert(&order).await {
            Ok(()) => {
                tracing::info!(
                    order_id = order.id,
                    user_id = order.user_id,
                    voucher_id = order.voucher_id,
                    "Order persisted"
                );
                Ok(())
            }
            // 唯一冲突说明另一次投递先落了库，等价于成功
            Err(RepoError::Conflict(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryOrderRepository;
    use crate::store::MemoryStore;

    fn persister() -> (Arc<MemoryOrderRepository>, OrderPersister) {
        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryOrderRepository::new());
        let locks = Arc::new(LockManager::new(store));
        let p = OrderPersister::new(repo.clone(), locks, Duration::from_secs(10));
        (repo, p)
    }

    #[tokio::test]
    async fn redelivery_is_idempotent() {
        let (repo, p) = persister();
        let msg = QueueMessage::new(42, 100, 7);

        for _ in 0..3 {
            p.persist(&msg).await.unwrap();
        }

        assert_eq!(repo.len(), 1);
        assert_eq!(repo.get(100, 7).unwrap().id, 42);
    }

    #[tokio::test]
    async fn lock_contention_surfaces_as_retryable() {
        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryOrderRepository::new());
        let locks = Arc::new(LockManager::new(store));
        let p = OrderPersister::new(repo.clone(), locks.clone(), Duration::from_secs(10));

        // 另一条在途持久化持有该用户的锁
        let _held = locks
            .try_acquire("order:100", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        let err = p.persist(&QueueMessage::new(1, 100, 7)).await.unwrap_err();
        assert!(matches!(err, PersistError::LockContention(100)));
        assert!(repo.is_empty());
    }
}
