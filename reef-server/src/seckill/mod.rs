//! 秒杀管线
//!
//! 写入热点的完整链路：
//!
//! ```text
//! 请求 ──> SeckillService::purchase     （准入：原子脚本，微秒级）
//!              │ Admitted(order_id)      （订单消息已随脚本原子入流）
//!              ▼
//!         stream.orders                  （持久追加日志 + 消费组）
//!              │
//!              ▼
//!         OrderWorker                    （单线程顺序消费）
//!              │ 按用户加锁
//!              ▼
//!         OrderPersister ──> OrderRepository（幂等落库）
//! ```
//!
//! 请求在准入通过后立刻返回订单号，不等待持久化；持久化失败由
//! pending-list 恢复流程异步消化，对请求方不可见。

pub mod persister;
pub mod queue;
pub mod service;
pub mod worker;

pub use persister::{OrderPersister, PersistError};
pub use queue::{OrderQueue, QueueError};
pub use service::{PurchaseOutcome, SeckillError, SeckillService};
pub use worker::OrderWorker;
