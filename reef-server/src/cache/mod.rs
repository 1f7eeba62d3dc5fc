//! 读穿缓存守卫
//!
//! 三种读取策略应对穿透与击穿，按 key 命名空间选用（同一命名空间只用
//! 一种）：
//!
//! - [`CacheGuard::get_or_load`] - 空值缓存直读：查不到的 key 也缓存一个
//!   短 TTL 空标记，压制穿透
//! - [`CacheGuard::get_or_load_locked`] - 互斥重建：真缓存缺失时先抢
//!   重建锁再回源，同一 key 并发缺失只有一个加载者
//! - [`CacheGuard::get_with_logical_expiry`] - 逻辑过期：读永远立刻返回
//!   （哪怕已过期），过期时把重建派发到有界后台工作池，可用性优先
//!
//! 守卫不理解记录内容，只做 JSON（反）序列化；回源是调用方传入的
//! `loader`，守卫对其返回 `None`/`Some` 一视同仁地缓存。

pub mod rebuild;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::store::{SharedStore, StoreError};
use crate::utils::LockManager;

pub use rebuild::{RebuildJob, RebuildPool, RebuildTicket};

/// 空值标记：长度为零的 payload
const NULL_MARKER: &str = "";

/// 缓存策略参数
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// 正常条目 TTL
    pub ttl: Duration,
    /// 空值标记 TTL（短）
    pub null_ttl: Duration,
    /// 逻辑过期时长
    pub logical_ttl: Duration,
    /// 重建锁 TTL
    pub lock_ttl: Duration,
    /// 互斥重建整读重试上限
    pub mutex_retry_max: u32,
    /// 互斥重建重试间隔
    pub mutex_retry_delay: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            null_ttl: Duration::from_secs(2 * 60),
            logical_ttl: Duration::from_secs(10 * 60),
            lock_ttl: Duration::from_secs(10),
            mutex_retry_max: 20,
            mutex_retry_delay: Duration::from_millis(50),
        }
    }
}

/// 逻辑过期信封：payload 带内嵌过期时间，存储侧不设 TTL
#[derive(serde::Serialize, serde::Deserialize)]
struct TimedEnvelope {
    /// 逻辑过期时间（Unix millis）
    expire_at: i64,
    data: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cache payload codec failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("cache loader failed: {0}")]
    Loader(#[source] anyhow::Error),

    /// 互斥重建重试次数耗尽
    #[error("cache rebuild lock contention on {0}")]
    LockContention(String),
}

/// 读穿缓存守卫
pub struct CacheGuard {
    store: Arc<dyn SharedStore>,
    locks: Arc<LockManager>,
    rebuild: RebuildPool,
    config: CacheConfig,
}

impl CacheGuard {
    pub fn new(
        store: Arc<dyn SharedStore>,
        locks: Arc<LockManager>,
        rebuild: RebuildPool,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            locks,
            rebuild,
            config,
        }
    }

    /// 写入缓存（物理 TTL）
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_string(value)?;
        self.store.set(key, &json, Some(ttl)).await?;
        Ok(())
    }

    /// 写入逻辑过期信封（无物理 TTL）— 逻辑过期策略的预热入口
    pub async fn set_with_logical_expiry<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        logical_ttl: Duration,
    ) -> Result<(), CacheError> {
        let envelope = TimedEnvelope {
            expire_at: Utc::now().timestamp_millis() + logical_ttl.as_millis() as i64,
            data: serde_json::to_value(value)?,
        };
        let json = serde_json::to_string(&envelope)?;
        self.store.set(key, &json, None).await?;
        Ok(())
    }

    /// 记录落库更新后失效缓存
    pub async fn evict(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.store.delete(key).await?)
    }

    /// 空值缓存直读
    ///
    /// 命中真值直接返回；命中空标记返回 `None` 且不回源；缓存缺失才回源，
    /// 回源 `None` 写短 TTL 空标记，`Some` 写正常 TTL。
    pub async fn get_or_load<ID, T, F, Fut>(
        &self,
        prefix: &str,
        id: ID,
        loader: F,
    ) -> Result<Option<T>, CacheError>
    where
        ID: std::fmt::Display,
        T: Serialize + DeserializeOwned,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        let key = format!("{prefix}{id}");
        if let Some(raw) = self.store.get(&key).await? {
            return decode_entry(raw);
        }

        match loader(id).await.map_err(CacheError::Loader)? {
            None => {
                self.store
                    .set(&key, NULL_MARKER, Some(self.config.null_ttl))
                    .await?;
                Ok(None)
            }
            Some(value) => {
                self.set(&key, &value, self.config.ttl).await?;
                Ok(Some(value))
            }
        }
    }

    /// 互斥重建读
    ///
    /// 真缓存缺失时先抢 key 级重建锁再回源；抢不到就小睡后整读重试，
    /// 次数有上限。拿到锁后再查一次缓存，排队期间可能已被先行者重建。
    pub async fn get_or_load_locked<ID, T, F, Fut>(
        &self,
        prefix: &str,
        id: ID,
        loader: F,
    ) -> Result<Option<T>, CacheError>
    where
        ID: std::fmt::Display,
        T: Serialize + DeserializeOwned,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        let key = format!("{prefix}{id}");

        let mut attempts = 0;
        let handle = loop {
            if let Some(raw) = self.store.get(&key).await? {
                return decode_entry(raw);
            }
            match self.locks.try_acquire(&key, self.config.lock_ttl).await? {
                Some(handle) => break handle,
                None => {
                    attempts += 1;
                    if attempts > self.config.mutex_retry_max {
                        return Err(CacheError::LockContention(key));
                    }
                    tokio::time::sleep(self.config.mutex_retry_delay).await;
                }
            }
        };

        let result = self.fill(&key, id, loader).await;
        if let Err(e) = self.locks.release(handle).await {
            tracing::warn!(key = %key, error = ?e, "Failed to release cache rebuild lock");
        }
        result
    }

    /// 逻辑过期读
    ///
    /// key 必须预热过（[`Self::set_with_logical_expiry`]）；缺失视为无数据，
    /// 前台路径绝不回源。已过期时尝试抢重建锁：抢到就把重建派发到后台
    /// 工作池（队列满则放弃并回滚锁），抢不到说明重建已在进行——两种
    /// 情况都立刻返回手头的旧值。
    pub async fn get_with_logical_expiry<ID, T, F, Fut>(
        &self,
        prefix: &str,
        id: ID,
        loader: F,
    ) -> Result<Option<T>, CacheError>
    where
        ID: std::fmt::Display + Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(ID) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send,
    {
        let key = format!("{prefix}{id}");
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        if raw.is_empty() {
            return Ok(None);
        }

        let envelope: TimedEnvelope = serde_json::from_str(&raw)?;
        let expire_at = envelope.expire_at;
        let value: T = serde_json::from_value(envelope.data)?;

        if expire_at > Utc::now().timestamp_millis() {
            return Ok(Some(value));
        }

        // 已逻辑过期：抢到重建锁才派发，否则别人正在重建，旧值照常返回
        if let Some(handle) = self.locks.try_acquire(&key, self.config.lock_ttl).await? {
            match self.rebuild.try_reserve() {
                Some(ticket) => {
                    let store = self.store.clone();
                    let locks = self.locks.clone();
                    let logical_ttl = self.config.logical_ttl;
                    let null_ttl = self.config.null_ttl;
                    let job_key = key.clone();
                    ticket.submit(Box::pin(async move {
                        let outcome: Result<(), CacheError> = async {
                            match loader(id).await.map_err(CacheError::Loader)? {
                                Some(fresh) => {
                                    let envelope = TimedEnvelope {
                                        expire_at: Utc::now().timestamp_millis()
                                            + logical_ttl.as_millis() as i64,
                                        data: serde_json::to_value(&fresh)?,
                                    };
                                    let json = serde_json::to_string(&envelope)?;
                                    store.set(&job_key, &json, None).await?;
                                }
                                None => {
                                    // 记录已消失，降级为空标记
                                    store.set(&job_key, NULL_MARKER, Some(null_ttl)).await?;
                                }
                            }
                            Ok(())
                        }
                        .await;
                        match outcome {
                            Ok(()) => tracing::debug!(key = %job_key, "Cache entry rebuilt"),
                            Err(e) => {
                                tracing::error!(key = %job_key, error = ?e, "Cache rebuild failed")
                            }
                        }
                        if let Err(e) = locks.release(handle).await {
                            tracing::warn!(key = %job_key, error = ?e, "Failed to release rebuild lock");
                        }
                    }));
                }
                None => {
                    tracing::warn!(key = %key, "Rebuild queue full, dropping rebuild task");
                    if let Err(e) = self.locks.release(handle).await {
                        tracing::warn!(key = %key, error = ?e, "Failed to release rebuild lock");
                    }
                }
            }
        }

        Ok(Some(value))
    }

    /// 抢到重建锁后的回源与填充
    async fn fill<ID, T, F, Fut>(
        &self,
        key: &str,
        id: ID,
        loader: F,
    ) -> Result<Option<T>, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        // 双重检查：排队抢锁期间可能已被先行者重建
        if let Some(raw) = self.store.get(key).await? {
            return decode_entry(raw);
        }

        match loader(id).await.map_err(CacheError::Loader)? {
            None => {
                self.store
                    .set(key, NULL_MARKER, Some(self.config.null_ttl))
                    .await?;
                Ok(None)
            }
            Some(value) => {
                self.set(key, &value, self.config.ttl).await?;
                Ok(Some(value))
            }
        }
    }
}

fn decode_entry<T: DeserializeOwned>(raw: String) -> Result<Option<T>, CacheError> {
    if raw.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&raw)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, keys};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Shop {
        id: u64,
        name: String,
    }

    fn shop(id: u64) -> Shop {
        Shop {
            id,
            name: format!("shop-{id}"),
        }
    }

    fn guard_with(config: CacheConfig) -> (Arc<MemoryStore>, Arc<LockManager>, Arc<CacheGuard>) {
        let store = Arc::new(MemoryStore::new());
        let locks = Arc::new(LockManager::new(store.clone()));
        let pool = RebuildPool::new(2, 8);
        let guard = Arc::new(CacheGuard::new(store.clone(), locks.clone(), pool, config));
        (store, locks, guard)
    }

    fn test_config() -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_secs(60),
            null_ttl: Duration::from_millis(200),
            logical_ttl: Duration::from_millis(100),
            lock_ttl: Duration::from_secs(5),
            mutex_retry_max: 20,
            mutex_retry_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn null_marker_suppresses_repeat_loads() {
        let (_, _, guard) = guard_with(test_config());
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let result: Option<Shop> = guard
                .get_or_load(keys::CACHE_SHOP_KEY, 1u64, move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
                .await
                .unwrap();
            assert!(result.is_none());
        }

        // 空值标记生效，后两次读不回源
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn null_marker_expires_and_reloads() {
        let (_, _, guard) = guard_with(test_config());
        let calls = Arc::new(AtomicUsize::new(0));

        let load = |calls: Arc<AtomicUsize>| {
            move |_id: u64| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        };

        let _: Option<Shop> = guard
            .get_or_load(keys::CACHE_SHOP_KEY, 1u64, load(calls.clone()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let _: Option<Shop> = guard
            .get_or_load(keys::CACHE_SHOP_KEY, 1u64, load(calls.clone()))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn loaded_value_is_cached() {
        let (_, _, guard) = guard_with(test_config());
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let result: Option<Shop> = guard
                .get_or_load(keys::CACHE_SHOP_KEY, 7u64, move |id| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(shop(id)))
                })
                .await
                .unwrap();
            assert_eq!(result, Some(shop(7)));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mutex_policy_single_loader_under_concurrency() {
        let (_, _, guard) = guard_with(test_config());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let guard = guard.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                guard
                    .get_or_load_locked(keys::CACHE_SHOP_KEY, 9u64, move |id| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Some(shop(id)))
                    })
                    .await
                    .unwrap()
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), Some(shop(9)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "exactly one loader call");
    }

    #[tokio::test]
    async fn mutex_policy_bounded_retries() {
        let mut config = test_config();
        config.mutex_retry_max = 2;
        let (_, locks, guard) = guard_with(config);

        // 外部长期持有该 key 的重建锁
        let key = format!("{}13", keys::CACHE_SHOP_KEY);
        let _held = locks
            .try_acquire(&key, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let result: Result<Option<Shop>, _> = guard
            .get_or_load_locked(keys::CACHE_SHOP_KEY, 13u64, move |id| async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(Some(shop(id)))
            })
            .await;

        assert!(matches!(result, Err(CacheError::LockContention(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "loader must not run");
    }

    #[tokio::test]
    async fn logical_expiry_returns_stale_and_rebuilds_once() {
        let (_, _, guard) = guard_with(test_config());
        let key = format!("{}21", keys::CACHE_SHOP_KEY);

        // 预热一个立刻过期的条目
        guard
            .set_with_logical_expiry(&key, &shop(21), Duration::ZERO)
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let load = |calls: Arc<AtomicUsize>| {
            move |id: u64| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Some(Shop {
                    id,
                    name: "rebuilt".to_string(),
                }))
            }
        };

        // 过期读：立刻拿到旧值，同时触发一次后台重建
        let first: Option<Shop> = guard
            .get_with_logical_expiry(keys::CACHE_SHOP_KEY, 21u64, load(calls.clone()))
            .await
            .unwrap();
        assert_eq!(first, Some(shop(21)));

        // 重建进行中：依旧返回旧值，不触发第二次重建
        let second: Option<Shop> = guard
            .get_with_logical_expiry(keys::CACHE_SHOP_KEY, 21u64, load(calls.clone()))
            .await
            .unwrap();
        assert_eq!(second, Some(shop(21)));

        tokio::time::sleep(Duration::from_millis(150)).await;
        let third: Option<Shop> = guard
            .get_with_logical_expiry(keys::CACHE_SHOP_KEY, 21u64, load(calls.clone()))
            .await
            .unwrap();
        assert_eq!(third.unwrap().name, "rebuilt");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "single rebuild");
    }

    #[tokio::test]
    async fn logical_expiry_absent_key_is_no_data() {
        let (_, _, guard) = guard_with(test_config());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();

        let result: Option<Shop> = guard
            .get_with_logical_expiry(keys::CACHE_SHOP_KEY, 404u64, move |id| async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(Some(shop(id)))
            })
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0, "foreground path never loads");
    }

    #[tokio::test]
    async fn logical_expiry_rebuild_handles_vanished_record() {
        let (_, _, guard) = guard_with(test_config());
        let key = format!("{}33", keys::CACHE_SHOP_KEY);
        guard
            .set_with_logical_expiry(&key, &shop(33), Duration::ZERO)
            .await
            .unwrap();

        // 记录已从底层删除：重建应写入空标记
        let stale: Option<Shop> = guard
            .get_with_logical_expiry(keys::CACHE_SHOP_KEY, 33u64, |_| async { Ok(None) })
            .await
            .unwrap();
        assert_eq!(stale, Some(shop(33)), "stale value still served");

        tokio::time::sleep(Duration::from_millis(80)).await;
        let gone: Option<Shop> = guard
            .get_with_logical_expiry(keys::CACHE_SHOP_KEY, 33u64, |_| async {
                Ok(Some(shop(33)))
            })
            .await
            .unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn evict_removes_entry() {
        let (_, _, guard) = guard_with(test_config());
        let key = format!("{}5", keys::CACHE_SHOP_KEY);
        guard.set(&key, &shop(5), Duration::from_secs(60)).await.unwrap();

        assert!(guard.evict(&key).await.unwrap());

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let result: Option<Shop> = guard
            .get_or_load(keys::CACHE_SHOP_KEY, 5u64, move |id| async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(Some(shop(id)))
            })
            .await
            .unwrap();
        assert_eq!(result, Some(shop(5)));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "evicted entry reloads");
    }
}
