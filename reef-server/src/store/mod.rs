//! 共享存储抽象
//!
//! 所有跨请求的可变状态（库存、购买标记、缓存条目、订单流）都放在共享
//! 存储里，进程内不持有权威副本。这里把存储抽象为"带条件写、TTL、
//! 计数器和追加日志的原子 KV"：
//!
//! - [`memory::MemoryStore`] - 内存实现，单机模式与测试用
//! - [`redis::RedisStore`] - Redis 实现，生产部署用
//!
//! 两个实现对同一操作给出相同的原子性保证，测试可以互换。

pub mod keys;
pub mod memory;
pub mod redis;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// 共享存储错误
///
/// 业务结果（库存不足、重复下单）不是错误，走 [`SharedStore::check_and_reserve`]
/// 的返回码；这里只有基础设施层面的失败。
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 存储不可达（瞬态，调用方决定是否重试）
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// 存储侧脚本执行失败（致命，绝不折算成某种库存结果）
    #[error("store script failed: {0}")]
    Script(String),

    /// 流 / 消费组状态异常
    #[error("stream error: {0}")]
    Stream(String),
}

/// 流上的一条已投递消息
#[derive(Debug, Clone)]
pub struct StreamEntry {
    /// 消息 ID（ACK 用）
    pub id: String,
    /// 扁平 string map 字段
    pub fields: HashMap<String, String>,
}

/// 原子 KV + 追加日志存储
///
/// 所有方法都可能因网络 I/O 阻塞，但不会持有任何应用层锁。
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// 读取字符串值；不存在（或已过期）返回 `None`
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// 写入，可选 TTL
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// 删除，返回键是否存在
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// 条件写：键不存在时才写入（SET NX EX 语义，锁获取用）
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// 原子比较并删除：当前值等于 `expected` 才删除（锁释放用）
    ///
    /// 比较与删除必须是单步原子操作，中间不允许其他写入插入。
    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// 原子自增，返回自增后的值
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// 秒杀准入：库存检查 + 一人一单检查 + 扣减 + 订单消息入流，
    /// 单步原子执行，并发请求之间不存在可观察的中间状态。
    ///
    /// 返回 `0` 准入成功、`1` 库存不足、`2` 重复下单。
    /// 检查顺序固定：先库存后重复，重复用户绝不扣减库存。
    async fn check_and_reserve(
        &self,
        voucher_id: u64,
        user_id: u64,
        order_id: u64,
    ) -> StoreResult<i64>;

    /// 向流追加一条消息，返回消息 ID
    async fn stream_append(
        &self,
        stream: &str,
        fields: &[(String, String)],
    ) -> StoreResult<String>;

    /// 确保消费组存在（流不存在时一并创建，游标指向流尾）
    async fn ensure_group(&self, stream: &str, group: &str) -> StoreResult<()>;

    /// 组内读取一条新消息，最多阻塞 `block`；超时返回 `None`
    ///
    /// 读到的消息进入该消费者的 pending-list，直到被 ACK。
    async fn stream_read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> StoreResult<Option<StreamEntry>>;

    /// 从 pending-list 头部读取一条已投递未确认的消息；清空时返回 `None`
    async fn stream_read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> StoreResult<Option<StreamEntry>>;

    /// 确认消息，将其移出 pending-list
    async fn stream_ack(&self, stream: &str, group: &str, id: &str) -> StoreResult<()>;
}
