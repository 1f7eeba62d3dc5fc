//! 共享存储键空间
//!
//! 所有跨组件共用的键前缀集中在这里，防止两个实现（内存/Redis）
//! 和准入脚本各写一份后漂移。

/// 缓存键前缀（追加实体 ID）
pub const CACHE_SHOP_KEY: &str = "cache:shop:";
/// 秒杀券缓存键前缀
pub const CACHE_VOUCHER_KEY: &str = "cache:voucher:";

/// 分布式锁键前缀
pub const LOCK_PREFIX: &str = "lock:";

/// ID 分配器计数器前缀
pub const COUNTER_PREFIX: &str = "icr:";

/// 秒杀库存键前缀
pub const SECKILL_STOCK_PREFIX: &str = "seckill:stock:";
/// 秒杀已购用户集合前缀
pub const SECKILL_BUYERS_PREFIX: &str = "seckill:order:";

/// 订单流名
pub const ORDER_STREAM: &str = "stream.orders";

pub fn lock_key(resource: &str) -> String {
    format!("{LOCK_PREFIX}{resource}")
}

pub fn counter_key(namespace: &str, date: &str) -> String {
    format!("{COUNTER_PREFIX}{namespace}:{date}")
}

pub fn stock_key(voucher_id: u64) -> String {
    format!("{SECKILL_STOCK_PREFIX}{voucher_id}")
}

pub fn buyers_key(voucher_id: u64) -> String {
    format!("{SECKILL_BUYERS_PREFIX}{voucher_id}")
}
