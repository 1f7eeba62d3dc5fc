//! 服务配置

use std::time::Duration;

use crate::cache::CacheConfig;
use crate::store::keys;

/// 服务配置 - 所有配置项
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | REDIS_URL | (未设置) | 共享存储地址；未设置时用内存存储（单机模式） |
/// | WORK_DIR | /var/lib/reef | 工作目录（日志等） |
/// | ENVIRONMENT | development | 运行环境 |
/// | CACHE_TTL_SECS | 1800 | 缓存正常 TTL |
/// | CACHE_NULL_TTL_SECS | 120 | 空值标记 TTL |
/// | CACHE_LOGICAL_TTL_SECS | 600 | 逻辑过期时长 |
/// | CACHE_LOCK_TTL_SECS | 10 | 缓存重建锁 TTL |
/// | CACHE_MUTEX_RETRY_MAX | 20 | 互斥重建整读重试上限 |
/// | CACHE_MUTEX_RETRY_DELAY_MS | 50 | 互斥重建重试间隔 |
/// | REBUILD_WORKERS | 10 | 缓存重建工作池大小 |
/// | REBUILD_QUEUE_DEPTH | 256 | 缓存重建队列深度 |
/// | ORDER_LOCK_TTL_SECS | 10 | 订单用户锁 TTL |
/// | ORDER_STREAM | stream.orders | 订单流名 |
/// | ORDER_GROUP | g1 | 消费组名（每套部署固定） |
/// | ORDER_CONSUMER | c1 | 消费者名 |
/// | QUEUE_BLOCK_MS | 2000 | 流阻塞读时长 |
/// | QUEUE_MAX_ATTEMPTS | 16 | 单条消息重试上限（超过即隔离） |
/// | SHUTDOWN_TIMEOUT_MS | 10000 | 关闭超时(毫秒) |
///
/// # 示例
///
/// ```ignore
/// REDIS_URL=redis://127.0.0.1/ WORK_DIR=/data/reef cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 共享存储地址，`None` 表示单机内存模式
    pub redis_url: Option<String>,
    /// 工作目录
    pub work_dir: String,
    /// 运行环境: development | staging | production
    pub environment: String,

    // === 缓存 ===
    /// 缓存正常 TTL（秒）
    pub cache_ttl_secs: u64,
    /// 空值标记 TTL（秒）
    pub cache_null_ttl_secs: u64,
    /// 逻辑过期时长（秒）
    pub cache_logical_ttl_secs: u64,
    /// 缓存重建锁 TTL（秒）
    pub cache_lock_ttl_secs: u64,
    /// 互斥重建整读重试上限
    pub cache_mutex_retry_max: u32,
    /// 互斥重建重试间隔（毫秒）
    pub cache_mutex_retry_delay_ms: u64,
    /// 缓存重建工作池大小
    pub rebuild_workers: usize,
    /// 缓存重建队列深度
    pub rebuild_queue_depth: usize,

    // === 订单管线 ===
    /// 订单用户锁 TTL（秒）
    pub order_lock_ttl_secs: u64,
    /// 订单流名
    pub order_stream: String,
    /// 消费组名
    pub order_group: String,
    /// 消费者名
    pub order_consumer: String,
    /// 流阻塞读时长（毫秒）
    pub queue_block_ms: u64,
    /// 单条消息重试上限
    pub queue_max_attempts: u32,

    /// 关闭超时（毫秒）
    pub shutdown_timeout_ms: u64,
}

impl Config {
    /// 从环境变量加载配置，未设置的用默认值
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/reef".into()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),

            cache_ttl_secs: env_parse("CACHE_TTL_SECS", 1800),
            cache_null_ttl_secs: env_parse("CACHE_NULL_TTL_SECS", 120),
            cache_logical_ttl_secs: env_parse("CACHE_LOGICAL_TTL_SECS", 600),
            cache_lock_ttl_secs: env_parse("CACHE_LOCK_TTL_SECS", 10),
            cache_mutex_retry_max: env_parse("CACHE_MUTEX_RETRY_MAX", 20),
            cache_mutex_retry_delay_ms: env_parse("CACHE_MUTEX_RETRY_DELAY_MS", 50),
            rebuild_workers: env_parse("REBUILD_WORKERS", 10),
            rebuild_queue_depth: env_parse("REBUILD_QUEUE_DEPTH", 256),

            order_lock_ttl_secs: env_parse("ORDER_LOCK_TTL_SECS", 10),
            order_stream: std::env::var("ORDER_STREAM")
                .unwrap_or_else(|_| keys::ORDER_STREAM.into()),
            order_group: std::env::var("ORDER_GROUP").unwrap_or_else(|_| "g1".into()),
            order_consumer: std::env::var("ORDER_CONSUMER").unwrap_or_else(|_| "c1".into()),
            queue_block_ms: env_parse("QUEUE_BLOCK_MS", 2000),
            queue_max_attempts: env_parse("QUEUE_MAX_ATTEMPTS", 16),

            shutdown_timeout_ms: env_parse("SHUTDOWN_TIMEOUT_MS", 10000),
        }
    }

    /// 缓存策略参数
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_secs(self.cache_ttl_secs),
            null_ttl: Duration::from_secs(self.cache_null_ttl_secs),
            logical_ttl: Duration::from_secs(self.cache_logical_ttl_secs),
            lock_ttl: Duration::from_secs(self.cache_lock_ttl_secs),
            mutex_retry_max: self.cache_mutex_retry_max,
            mutex_retry_delay: Duration::from_millis(self.cache_mutex_retry_delay_ms),
        }
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
