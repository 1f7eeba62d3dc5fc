//! 分布式 ID 生成器
//!
//! 64 位组合 ID：高位是自定义纪元以来的秒级时间戳（左移 32 位），低位是
//! 共享存储中按 "命名空间 + 日期" 维护的自增序列。同一序列桶内计数器
//! 不回退即可保证唯一；跨实例只做趋势递增（时钟粒度），不保证严格连续。

use std::sync::Arc;

use chrono::Utc;

use crate::store::{SharedStore, StoreError, keys};

/// 自定义纪元：2022-01-01T00:00:00Z
const BEGIN_TIMESTAMP: i64 = 1_640_995_200;
/// 序列号位数
const COUNT_BITS: u32 = 32;

#[derive(Debug, thiserror::Error)]
pub enum AllocatorError {
    /// 共享存储不可达时直接失败，不做本地回退（避免跨实例 ID 冲突）
    #[error("id allocator unavailable: {0}")]
    Unavailable(#[from] StoreError),
}

/// 趋势递增 ID 分配器
pub struct IdAllocator {
    store: Arc<dyn SharedStore>,
}

impl IdAllocator {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// 为命名空间分配下一个 ID，同一命名空间内保证不重复
    pub async fn next_id(&self, namespace: &str) -> Result<u64, AllocatorError> {
        let now = Utc::now();
        let timestamp = now.timestamp() - BEGIN_TIMESTAMP;

        let date = now.format("%Y%m%d").to_string();
        let count = self.store.incr(&keys::counter_key(namespace, &date)).await?;

        Ok(((timestamp as u64) << COUNT_BITS) | (count as u64))
    }
}
