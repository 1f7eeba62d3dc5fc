//! 秒杀订单领域类型
//!
//! [`QueueMessage`] 是订单流上的线格式（扁平 string map，字段名固定），
//! [`Order`] 是持久化后的订单行。入流时间由流消息 ID 本身携带，
//! 不在字段里重复。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{OrderId, UserId, VoucherId};

/// 流消息字段名：订单 ID
pub const FIELD_ID: &str = "id";
/// 流消息字段名：用户 ID
pub const FIELD_USER_ID: &str = "userId";
/// 流消息字段名：券 ID
pub const FIELD_VOUCHER_ID: &str = "voucherId";

/// 已持久化的秒杀订单
///
/// 不变量：同一 `(user_id, voucher_id)` 至多一行，由仓储在写入时兜底。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub voucher_id: VoucherId,
    pub created_at: DateTime<Utc>,
}

/// 进入订单流的购买意向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMessage {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub voucher_id: VoucherId,
}

/// 队列消息编解码错误
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("missing field: {0}")]
    Missing(&'static str),

    #[error("invalid field {field}: {value}")]
    Invalid { field: &'static str, value: String },
}

impl QueueMessage {
    pub fn new(order_id: OrderId, user_id: UserId, voucher_id: VoucherId) -> Self {
        Self {
            order_id,
            user_id,
            voucher_id,
        }
    }

    /// 编码为流消息字段
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            (FIELD_ID.to_string(), self.order_id.to_string()),
            (FIELD_USER_ID.to_string(), self.user_id.to_string()),
            (FIELD_VOUCHER_ID.to_string(), self.voucher_id.to_string()),
        ]
    }

    /// 从流消息字段解码
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, DecodeError> {
        Ok(Self {
            order_id: parse_field(fields, FIELD_ID)?,
            user_id: parse_field(fields, FIELD_USER_ID)?,
            voucher_id: parse_field(fields, FIELD_VOUCHER_ID)?,
        })
    }
}

fn parse_field(fields: &HashMap<String, String>, field: &'static str) -> Result<u64, DecodeError> {
    let raw = fields.get(field).ok_or(DecodeError::Missing(field))?;
    raw.parse().map_err(|_| DecodeError::Invalid {
        field,
        value: raw.clone(),
    })
}
