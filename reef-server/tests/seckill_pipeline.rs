//! 秒杀管线集成测试
//!
//! 用内存存储把准入 → 订单流 → 消费 → 持久化整条链路跑起来，
//! 验证并发准入的精确性、崩溃恢复与幂等持久化。

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use reef_server::db::{MemoryOrderRepository, OrderRepository};
use reef_server::seckill::{OrderPersister, OrderQueue, OrderWorker, PurchaseOutcome, SeckillService};
use reef_server::store::keys::ORDER_STREAM;
use reef_server::store::{MemoryStore, SharedStore, keys};
use reef_server::utils::{IdAllocator, LockManager};

struct Pipeline {
    store: Arc<MemoryStore>,
    locks: Arc<LockManager>,
    repo: Arc<MemoryOrderRepository>,
    seckill: Arc<SeckillService>,
}

impl Pipeline {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let locks = Arc::new(LockManager::new(store.clone()));
        let ids = Arc::new(IdAllocator::new(store.clone()));
        let seckill = Arc::new(SeckillService::new(store.clone(), ids));
        Self {
            store,
            locks,
            repo: Arc::new(MemoryOrderRepository::new()),
            seckill,
        }
    }

    fn queue(&self) -> OrderQueue {
        OrderQueue::new(
            self.store.clone(),
            ORDER_STREAM,
            "g1",
            "c1",
            Duration::from_millis(50),
        )
    }

    fn persister(&self) -> OrderPersister {
        OrderPersister::new(self.repo.clone(), self.locks.clone(), Duration::from_secs(10))
    }

    fn worker(&self, max_attempts: u32) -> OrderWorker {
        OrderWorker::new(self.queue(), self.persister(), max_attempts)
    }

    async fn stock(&self, voucher_id: u64) -> i64 {
        self.store
            .get(&keys::stock_key(voucher_id))
            .await
            .unwrap()
            .unwrap_or_else(|| "0".into())
            .parse()
            .unwrap()
    }
}

/// 等待条件成立，最多 2 秒
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

#[tokio::test]
async fn concurrent_admission_admits_exactly_stock() {
    let p = Pipeline::new();
    p.queue().ensure_group().await.unwrap();
    p.seckill.seed_stock(7, 3).await.unwrap();

    let mut handles = Vec::new();
    for user_id in 1..=5u64 {
        let seckill = p.seckill.clone();
        handles.push(tokio::spawn(async move {
            // 打乱到达顺序
            let jitter = rand::thread_rng().gen_range(0..5u64);
            tokio::time::sleep(Duration::from_millis(jitter)).await;
            seckill.purchase(7, user_id).await
        }));
    }

    let mut admitted = 0;
    let mut exhausted = 0;
    for h in handles {
        match h.await.unwrap().unwrap() {
            PurchaseOutcome::Admitted { .. } => admitted += 1,
            PurchaseOutcome::StockExhausted => exhausted += 1,
            PurchaseOutcome::DuplicateOrder => panic!("distinct users cannot be duplicates"),
        }
    }

    assert_eq!(admitted, 3);
    assert_eq!(exhausted, 2);
    assert_eq!(p.stock(7).await, 0, "stock drained exactly to zero");
}

#[tokio::test]
async fn duplicate_purchase_is_rejected_without_decrement() {
    let p = Pipeline::new();
    p.queue().ensure_group().await.unwrap();
    p.seckill.seed_stock(7, 10).await.unwrap();

    let first = p.seckill.purchase(7, 42).await.unwrap();
    assert!(matches!(first, PurchaseOutcome::Admitted { .. }));

    let second = p.seckill.purchase(7, 42).await.unwrap();
    assert_eq!(second, PurchaseOutcome::DuplicateOrder);
    assert_eq!(p.stock(7).await, 9, "second attempt must not touch stock");
}

#[tokio::test]
async fn admitted_orders_are_persisted_by_worker() {
    let p = Pipeline::new();
    p.queue().ensure_group().await.unwrap();
    p.seckill.seed_stock(7, 3).await.unwrap();

    let shutdown = CancellationToken::new();
    let worker_handle = tokio::spawn(p.worker(4).run(shutdown.clone()));

    let mut order_ids = Vec::new();
    for user_id in 1..=3u64 {
        match p.seckill.purchase(7, user_id).await.unwrap() {
            PurchaseOutcome::Admitted { order_id } => order_ids.push((user_id, order_id)),
            other => panic!("expected admission, got {other:?}"),
        }
    }

    let repo = p.repo.clone();
    wait_until(move || repo.len() == 3).await;

    // 落库的订单号与准入返回的一致
    for (user_id, order_id) in order_ids {
        assert_eq!(p.repo.get(user_id, 7).unwrap().id, order_id);
    }

    shutdown.cancel();
    worker_handle.await.unwrap();
}

#[tokio::test]
async fn crash_recovery_replays_pending_exactly_once() {
    let p = Pipeline::new();
    let queue = p.queue();
    queue.ensure_group().await.unwrap();
    p.seckill.seed_stock(7, 1).await.unwrap();

    let outcome = p.seckill.purchase(7, 42).await.unwrap();
    assert!(matches!(outcome, PurchaseOutcome::Admitted { .. }));

    // 模拟崩溃：消息已投递但没有 ACK，也没有落库
    queue.next_new().await.unwrap().unwrap();
    assert!(p.repo.is_empty());

    // 重启 worker：启动即回放 pending-list
    let shutdown = CancellationToken::new();
    let worker_handle = tokio::spawn(p.worker(4).run(shutdown.clone()));

    let repo = p.repo.clone();
    wait_until(move || repo.len() == 1).await;
    assert!(p.repo.exists(42, 7).await.unwrap());

    // 消息已被确认，pending-list 清空，且只落了一单
    let mut drained = false;
    for _ in 0..200 {
        if p.store
            .stream_read_pending(ORDER_STREAM, "g1", "c1")
            .await
            .unwrap()
            .is_none()
        {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(drained, "pending list should be drained after recovery");
    assert_eq!(p.repo.len(), 1);

    shutdown.cancel();
    worker_handle.await.unwrap();
}

#[tokio::test]
async fn poison_message_is_quarantined() {
    let p = Pipeline::new();
    let queue = p.queue();
    queue.ensure_group().await.unwrap();
    p.seckill.seed_stock(7, 1).await.unwrap();

    assert!(matches!(
        p.seckill.purchase(7, 42).await.unwrap(),
        PurchaseOutcome::Admitted { .. }
    ));
    // 投递但不 ACK，留在 pending-list
    queue.next_new().await.unwrap().unwrap();

    // 外部永久持有用户锁，持久化必定失败
    let _held = p
        .locks
        .try_acquire("order:42", Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    // 恢复流程：重试 2 次后隔离（记日志 + ACK），不会卡死
    let worker = p.worker(2);
    let shutdown = CancellationToken::new();
    tokio::time::timeout(Duration::from_secs(5), worker.recover(&shutdown))
        .await
        .expect("recovery must terminate after quarantine");

    assert!(
        p.store
            .stream_read_pending(ORDER_STREAM, "g1", "c1")
            .await
            .unwrap()
            .is_none(),
        "quarantined message is acknowledged"
    );
    assert!(p.repo.is_empty(), "poison message was never persisted");
}

#[tokio::test]
async fn redelivered_message_does_not_touch_stock() {
    let p = Pipeline::new();
    let queue = p.queue();
    queue.ensure_group().await.unwrap();
    p.seckill.seed_stock(7, 5).await.unwrap();

    assert!(matches!(
        p.seckill.purchase(7, 42).await.unwrap(),
        PurchaseOutcome::Admitted { .. }
    ));
    let stock_after_admission = p.stock(7).await;

    // 同一条消息持久化三次（模拟 at-least-once 重复投递）
    let (_, msg) = queue.next_new().await.unwrap().unwrap();
    let persister = p.persister();
    for _ in 0..3 {
        persister.persist(&msg).await.unwrap();
    }

    assert_eq!(p.repo.len(), 1, "exactly one order row");
    assert_eq!(
        p.stock(7).await,
        stock_after_admission,
        "persistence never mutates stock"
    );
}
