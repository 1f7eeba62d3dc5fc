//! Reef Server - 热点读与秒杀写的存储防护层
//!
//! # 架构概述
//!
//! 本模块保护底层关系存储不被两类流量打穿：
//!
//! - **热点读** (`cache`): 读穿缓存守卫，空值缓存 / 互斥重建 / 逻辑过期
//!   三种策略应对穿透、击穿与雪崩
//! - **秒杀写** (`seckill`): 原子准入 → 订单流 → 单线程消费 → 幂等持久化，
//!   库存硬约束与一人一单在存储侧单步原子保证
//! - **共享存储** (`store`): 原子 KV + 追加日志抽象，内存/Redis 双后端
//! - **分布式原语** (`utils`): 分布式锁（token 凭证释放）、趋势递增 ID
//!
//! # 模块结构
//!
//! ```text
//! reef-server/src/
//! ├── core/          # 配置、状态、后台任务
//! ├── store/         # 共享存储抽象与实现
//! ├── cache/         # 读穿缓存守卫 + 重建工作池
//! ├── seckill/       # 准入、订单流、消费、持久化
//! ├── db/            # 订单仓储（外部协作者接口）
//! └── utils/         # 日志、分布式锁、ID 分配器
//! ```

pub mod cache;
pub mod core;
pub mod db;
pub mod seckill;
pub mod store;
pub mod utils;

// Re-export 公共类型
pub use crate::cache::{CacheConfig, CacheError, CacheGuard, RebuildPool};
pub use crate::core::{BackgroundTasks, Config, ServerState};
pub use crate::db::{MemoryOrderRepository, OrderRepository, RepoError};
pub use crate::seckill::{
    OrderPersister, OrderQueue, OrderWorker, PurchaseOutcome, SeckillService,
};
pub use crate::store::{MemoryStore, RedisStore, SharedStore, StoreError};
pub use crate::utils::{IdAllocator, LockHandle, LockManager};

// Re-export logger functions
pub use crate::utils::logger::{init_logger, init_logger_with_file};

pub fn print_banner() {
    println!(
        r#"
    ____  ________________
   / __ \/ ____/ ____/ __/
  / /_/ / __/ / __/ / /_
 / _, _/ /___/ /___/ __/
/_/ |_/_____/_____/_/
    "#
    );
}
