//! 内存订单仓储
//!
//! 单机模式与测试用，(user, voucher) 作主键索引。

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use shared::order::Order;
use shared::types::{UserId, VoucherId};

use super::{OrderRepository, RepoError, RepoResult};

#[derive(Default)]
pub struct MemoryOrderRepository {
    orders: DashMap<(UserId, VoucherId), Order>,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订单总数
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn get(&self, user_id: UserId, voucher_id: VoucherId) -> Option<Order> {
        self.orders.get(&(user_id, voucher_id)).map(|o| o.clone())
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn exists(&self, user_id: UserId, voucher_id: VoucherId) -> RepoResult<bool> {
        Ok(self.orders.contains_key(&(user_id, voucher_id)))
    }

    async fn insert(&self, order: &Order) -> RepoResult<()> {
        match self.orders.entry((order.user_id, order.voucher_id)) {
            Entry::Occupied(_) => Err(RepoError::Conflict(format!(
                "order for user {} voucher {} already exists",
                order.user_id, order.voucher_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(order.clone());
                Ok(())
            }
        }
    }
}
