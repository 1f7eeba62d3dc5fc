//! 基础 ID 类型别名

/// 订单 ID（时间戳高位 + 序列号低位的 64 位组合）
pub type OrderId = u64;

/// 用户 ID
pub type UserId = u64;

/// 秒杀券 ID
pub type VoucherId = u64;
