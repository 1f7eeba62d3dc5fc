//! 服务状态

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::cache::{CacheGuard, RebuildPool};
use crate::core::config::Config;
use crate::core::tasks::BackgroundTasks;
use crate::db::OrderRepository;
use crate::seckill::{OrderPersister, OrderQueue, OrderWorker, SeckillService};
use crate::store::{MemoryStore, RedisStore, SharedStore};
use crate::utils::{IdAllocator, LockManager};

/// 服务状态 - 持有所有组件的共享引用
///
/// 所有组件都以 `Arc` 共享，克隆成本极低。共享存储是唯一的跨请求
/// 权威状态，这里只是句柄。
///
/// | 字段 | 说明 |
/// |------|------|
/// | config | 配置项（不可变） |
/// | store | 共享存储（内存或 Redis） |
/// | locks | 分布式锁管理器 |
/// | ids | 趋势递增 ID 分配器 |
/// | cache | 读穿缓存守卫 |
/// | seckill | 秒杀准入服务 |
/// | repo | 订单仓储（外部协作者） |
#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub store: Arc<dyn SharedStore>,
    pub locks: Arc<LockManager>,
    pub ids: Arc<IdAllocator>,
    pub cache: Arc<CacheGuard>,
    pub seckill: Arc<SeckillService>,
    pub repo: Arc<dyn OrderRepository>,
}

impl ServerState {
    /// 初始化服务状态
    ///
    /// 按 `REDIS_URL` 选择存储后端，依次串起锁、ID、缓存、秒杀组件。
    /// 订单仓储由调用方注入（生产环境是数据库实现，单机/测试用内存实现）。
    pub async fn initialize(
        config: &Config,
        repo: Arc<dyn OrderRepository>,
    ) -> anyhow::Result<Self> {
        let store: Arc<dyn SharedStore> = match &config.redis_url {
            Some(url) => {
                tracing::info!("Connecting to shared store (redis)");
                Arc::new(
                    RedisStore::connect(url)
                        .await
                        .context("failed to connect to redis")?,
                )
            }
            None => {
                tracing::warn!("REDIS_URL not set, using in-memory store (standalone mode)");
                Arc::new(MemoryStore::new())
            }
        };

        let locks = Arc::new(LockManager::new(store.clone()));
        let ids = Arc::new(IdAllocator::new(store.clone()));
        let rebuild = RebuildPool::new(config.rebuild_workers, config.rebuild_queue_depth);
        let cache = Arc::new(CacheGuard::new(
            store.clone(),
            locks.clone(),
            rebuild,
            config.cache_config(),
        ));
        let seckill = Arc::new(SeckillService::new(store.clone(), ids.clone()));

        Ok(Self {
            config: config.clone(),
            store,
            locks,
            ids,
            cache,
            seckill,
            repo,
        })
    }

    /// 构造订单流句柄
    pub fn order_queue(&self) -> OrderQueue {
        OrderQueue::new(
            self.store.clone(),
            self.config.order_stream.clone(),
            self.config.order_group.clone(),
            self.config.order_consumer.clone(),
            Duration::from_millis(self.config.queue_block_ms),
        )
    }

    /// 启动后台任务（订单消费 worker）
    ///
    /// 必须在对外提供服务之前调用。
    pub async fn start_background_tasks(
        &self,
        tasks: &mut BackgroundTasks,
    ) -> anyhow::Result<()> {
        let queue = self.order_queue();
        queue
            .ensure_group()
            .await
            .context("failed to create order consumer group")?;

        let persister = OrderPersister::new(
            self.repo.clone(),
            self.locks.clone(),
            Duration::from_secs(self.config.order_lock_ttl_secs),
        );
        let worker = OrderWorker::new(queue, persister, self.config.queue_max_attempts);

        let shutdown = tasks.shutdown_token();
        tasks.spawn("order_consumer", worker.run(shutdown));
        Ok(())
    }
}
