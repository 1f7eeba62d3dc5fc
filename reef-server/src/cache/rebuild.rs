//! 缓存重建工作池
//!
//! 逻辑过期策略的重建任务在这里异步执行：固定 worker 数 + 有界队列。
//! 队列满时拒绝新任务（调用方回滚重建锁并继续返回旧值），不做无界扩张。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

/// 重建任务（已装箱的 future，完成后自行释放重建锁）
pub type RebuildJob = Pin<Box<dyn Future<Output = ()> + Send>>;

/// 队列席位：拿到席位再构造任务，投递不会失败
pub struct RebuildTicket<'a> {
    permit: mpsc::Permit<'a, RebuildJob>,
}

impl RebuildTicket<'_> {
    pub fn submit(self, job: RebuildJob) {
        self.permit.send(job);
    }
}

/// 有界重建工作池
pub struct RebuildPool {
    tx: mpsc::Sender<RebuildJob>,
}

impl RebuildPool {
    /// 启动 `workers` 个工作协程，队列深度 `queue_depth`
    ///
    /// 必须在 tokio 运行时内调用。发送端全部关闭后 worker 自然退出。
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel::<RebuildJob>(queue_depth.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for worker_id in 0..workers.max(1) {
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
                tracing::debug!(worker_id, "Cache rebuild worker stopped");
            });
        }

        Self { tx }
    }

    /// 预约一个队列席位；队列满返回 `None`
    pub fn try_reserve(&self) -> Option<RebuildTicket<'_>> {
        self.tx.try_reserve().ok().map(|permit| RebuildTicket { permit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn jobs_run_on_workers() {
        let pool = RebuildPool::new(2, 8);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = counter.clone();
            let ticket = pool.try_reserve().expect("queue should have capacity");
            ticket.submit(Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn full_queue_rejects_dispatch() {
        // 单 worker 被慢任务占住，队列深度 1
        let pool = RebuildPool::new(1, 1);

        let slow = pool.try_reserve().unwrap();
        slow.submit(Box::pin(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }));
        // 让 worker 取走慢任务
        tokio::time::sleep(Duration::from_millis(20)).await;

        let filler = pool.try_reserve().expect("one slot in queue");
        filler.submit(Box::pin(async {}));

        assert!(pool.try_reserve().is_none(), "queue full should reject");
    }
}
