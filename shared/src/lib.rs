//! Shared types for Reef
//!
//! 订单领域类型与队列线格式，生产端（准入脚本）与消费端（持久化 worker）
//! 共用，保持两侧编解码一致。

pub mod order;
pub mod types;

// Re-exports
pub use order::{DecodeError, Order, QueueMessage};
pub use types::{OrderId, UserId, VoucherId};
