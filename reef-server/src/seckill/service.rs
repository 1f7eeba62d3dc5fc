//! 秒杀下单入口
//!
//! 准入（库存 + 一人一单 + 扣减 + 订单入流）由存储侧脚本单步原子完成，
//! 并发请求之间不存在可观察的中间状态，库存绝不超卖。

use std::sync::Arc;

use shared::types::{UserId, VoucherId};

use crate::store::{SharedStore, StoreError, keys};
use crate::utils::{AllocatorError, IdAllocator};

/// 订单 ID 命名空间
pub const ORDER_ID_NAMESPACE: &str = "order";

/// 一次购买请求的业务结果
///
/// 库存不足与重复下单是正常业务出口，不是错误；每个请求只产生一次，
/// 服务内部不做自动重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// 准入通过，订单已进入待持久化队列
    Admitted { order_id: u64 },
    /// 库存不足
    StockExhausted,
    /// 该用户已购买过此券
    DuplicateOrder,
}

#[derive(Debug, thiserror::Error)]
pub enum SeckillError {
    #[error(transparent)]
    Allocator(#[from] AllocatorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// 准入脚本返回了契约外的代码
    #[error("unexpected admission code: {0}")]
    UnexpectedCode(i64),
}

/// 秒杀服务
pub struct SeckillService {
    store: Arc<dyn SharedStore>,
    ids: Arc<IdAllocator>,
}

impl SeckillService {
    pub fn new(store: Arc<dyn SharedStore>, ids: Arc<IdAllocator>) -> Self {
        Self { store, ids }
    }

    /// 发布秒杀券时预置库存
    pub async fn seed_stock(&self, voucher_id: VoucherId, stock: u32) -> Result<(), StoreError> {
        self.store
            .set(&keys::stock_key(voucher_id), &stock.to_string(), None)
            .await
    }

    /// 购买一张秒杀券
    pub async fn purchase(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> Result<PurchaseOutcome, SeckillError> {
        let order_id = self.ids.next_id(ORDER_ID_NAMESPACE).await?;

        let code = self
            .store
            .check_and_reserve(voucher_id, user_id, order_id)
            .await?;

        match code {
            0 => {
                tracing::debug!(user_id, voucher_id, order_id, "Purchase admitted");
                Ok(PurchaseOutcome::Admitted { order_id })
            }
            1 => Ok(PurchaseOutcome::StockExhausted),
            2 => Ok(PurchaseOutcome::DuplicateOrder),
            other => Err(SeckillError::UnexpectedCode(other)),
        }
    }
}
