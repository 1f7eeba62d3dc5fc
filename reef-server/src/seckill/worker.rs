//! 订单消费 Worker
//!
//! 单线程顺序消费：读一条 → 持久化 → ACK。任何处理失败都不 ACK，转入
//! pending-list 恢复流程从头回放直到清空；持久化幂等，重放安全。
//! 启动时也先跑一遍恢复，消化上次崩溃残留的未确认消息。
//!
//! Worker 对瞬态错误永不退出，只区分"没有消息"（继续轮询）和
//! "处理失败"（进入恢复）。

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::persister::OrderPersister;
use super::queue::{OrderQueue, QueueError};

/// 恢复流程中两次失败之间的退避
const RECOVERY_BACKOFF: Duration = Duration::from_millis(20);
/// 流读取失败后的退避
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// 订单消费 Worker
pub struct OrderWorker {
    queue: OrderQueue,
    persister: OrderPersister,
    /// 单条消息重试上限，超过即隔离（记日志 + ACK 跳过）
    max_attempts: u32,
}

impl OrderWorker {
    pub fn new(queue: OrderQueue, persister: OrderPersister, max_attempts: u32) -> Self {
        Self {
            queue,
            persister,
            max_attempts: max_attempts.max(1),
        }
    }

    /// 运行消费循环（阻塞直到收到 shutdown 信号）
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(stream = self.queue.stream(), "Order consumer worker started");

        // 上次崩溃可能留下已投递未确认的消息，先回放
        self.recover(&shutdown).await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Order worker received shutdown signal");
                    break;
                }
                next = self.queue.next_new() => match next {
                    // 阻塞读超时，没有新消息，继续轮询
                    Ok(None) => continue,
                    Ok(Some((id, msg))) => {
                        match self.persister.persist(&msg).await {
                            Ok(()) => self.ack_logged(&id).await,
                            Err(e) => {
                                tracing::error!(
                                    message_id = %id,
                                    order_id = msg.order_id,
                                    error = ?e,
                                    "Order processing failed, entering recovery"
                                );
                                self.recover(&shutdown).await;
                            }
                        }
                    }
                    Err(QueueError::Decode { id, source }) => {
                        // 编码坏掉的消息永远修不好，直接隔离
                        tracing::error!(message_id = %id, error = %source, "Undecodable order message, quarantining");
                        self.ack_logged(&id).await;
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, "Failed to read order stream");
                        tokio::time::sleep(READ_ERROR_BACKOFF).await;
                    }
                }
            }
        }
    }

    /// pending-list 恢复：从头回放未确认消息直到清空
    ///
    /// 同一条消息反复失败超过上限后隔离（记日志 + ACK），避免毒消息
    /// 卡死整个消费组。
    pub async fn recover(&self, shutdown: &CancellationToken) {
        let mut attempts: HashMap<String, u32> = HashMap::new();

        loop {
            if shutdown.is_cancelled() {
                return;
            }
            match self.queue.next_pending().await {
                Ok(None) => {
                    tracing::debug!("Pending list drained");
                    return;
                }
                Ok(Some((id, msg))) => match self.persister.persist(&msg).await {
                    Ok(()) => {
                        self.ack_logged(&id).await;
                        attempts.remove(&id);
                    }
                    Err(e) => {
                        let n = attempts.entry(id.clone()).or_insert(0);
                        *n += 1;
                        if *n >= self.max_attempts {
                            tracing::error!(
                                message_id = %id,
                                order_id = msg.order_id,
                                attempts = *n,
                                error = ?e,
                                "Poison message quarantined, acknowledging without persistence"
                            );
                            self.ack_logged(&id).await;
                            attempts.remove(&id);
                        } else {
                            tracing::warn!(
                                message_id = %id,
                                attempt = *n,
                                error = ?e,
                                "Pending message reprocess failed, backing off"
                            );
                            tokio::time::sleep(RECOVERY_BACKOFF).await;
                        }
                    }
                },
                Err(QueueError::Decode { id, source }) => {
                    tracing::error!(message_id = %id, error = %source, "Undecodable pending message, quarantining");
                    self.ack_logged(&id).await;
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to read pending list");
                    tokio::time::sleep(READ_ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// ACK；失败只记日志——消息会被重新投递，持久化幂等兜底
    async fn ack_logged(&self, id: &str) {
        if let Err(e) = self.queue.ack(id).await {
            tracing::error!(message_id = %id, error = ?e, "Failed to acknowledge message");
        }
    }
}
