//! 订单仓储接口
//!
//! 持久层是外部协作者：本服务只通过这个窄接口写订单，不包含任何
//! 建表/查询代码。`(user_id, voucher_id)` 的唯一性由实现在写入时兜底
//! （准入脚本之外的第二道防线，吸收队列重复投递）。

pub mod memory;

use async_trait::async_trait;
use shared::order::Order;
use shared::types::{UserId, VoucherId};

pub use memory::MemoryOrderRepository;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// 唯一约束冲突：同 (user, voucher) 的订单已存在
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),
}

/// 订单仓储
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// 该用户在该券上是否已有订单
    async fn exists(&self, user_id: UserId, voucher_id: VoucherId) -> RepoResult<bool>;

    /// 插入订单；同 (user, voucher) 已存在时返回 [`RepoError::Conflict`]
    async fn insert(&self, order: &Order) -> RepoResult<()>;
}
