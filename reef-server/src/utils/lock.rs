//! 分布式互斥锁
//!
//! SET NX EX 获取，存储侧比较后删除释放。owner token 在获取时显式生成
//! （进程 UUID 前缀 + 获取序号），沿调用链显式传递，绝不从执行上下文
//! 反推持有者身份。
//!
//! 获取是单次尝试：锁被占只返回 `None`，退避重试还是快速失败由调用方
//! 决定。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use uuid::Uuid;

use crate::store::{SharedStore, StoreResult, keys};

/// 一次成功获取的锁凭证
///
/// 释放必须出示凭证；token 不再匹配（锁已过期并被他人重新获取）时
/// 释放是无副作用的 no-op。
#[derive(Debug)]
pub struct LockHandle {
    key: String,
    token: String,
}

impl LockHandle {
    /// 锁在存储中的键
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// 分布式锁管理器
pub struct LockManager {
    store: Arc<dyn SharedStore>,
    /// 进程级 token 前缀
    token_prefix: String,
    /// 每次获取递增，保证 token 全局唯一
    seq: AtomicU64,
}

impl LockManager {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            token_prefix: Uuid::new_v4().simple().to_string(),
            seq: AtomicU64::new(0),
        }
    }

    /// 单次尝试获取 `resource` 上的互斥锁
    pub async fn try_acquire(
        &self,
        resource: &str,
        ttl: Duration,
    ) -> StoreResult<Option<LockHandle>> {
        let key = keys::lock_key(resource);
        let token = format!(
            "{}-{}",
            self.token_prefix,
            self.seq.fetch_add(1, Ordering::Relaxed)
        );

        if self.store.set_nx(&key, &token, ttl).await? {
            Ok(Some(LockHandle { key, token }))
        } else {
            Ok(None)
        }
    }

    /// 释放锁；返回 `false` 表示 token 已不匹配，未做任何删除
    pub async fn release(&self, handle: LockHandle) -> StoreResult<bool> {
        self.store.delete_if_equals(&handle.key, &handle.token).await
    }
}
