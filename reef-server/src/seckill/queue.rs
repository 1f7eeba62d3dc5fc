//! 订单流
//!
//! 固定流名 + 消费组的持久追加日志。组内每条消息只投递给一个消费者，
//! ACK 前留在 pending-list，崩溃后可回放。同一分区内保持入流顺序，
//! 跨分区不保证。

use std::sync::Arc;
use std::time::Duration;

use shared::order::QueueMessage;

use crate::store::{SharedStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// 消息字段缺失或非法；消息还在 pending-list 里，由消费方隔离
    #[error("undecodable queue message {id}: {source}")]
    Decode {
        id: String,
        source: shared::order::DecodeError,
    },
}

/// 订单流句柄
pub struct OrderQueue {
    store: Arc<dyn SharedStore>,
    stream: String,
    group: String,
    consumer: String,
    /// 新消息阻塞读时长
    block: Duration,
}

impl OrderQueue {
    pub fn new(
        store: Arc<dyn SharedStore>,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        block: Duration,
    ) -> Self {
        Self {
            store,
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            block,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// 确保消费组存在，启动时调用一次
    pub async fn ensure_group(&self) -> Result<(), QueueError> {
        self.store.ensure_group(&self.stream, &self.group).await?;
        Ok(())
    }

    /// 直接向流追加一条订单消息
    ///
    /// 正常下单路径里消息由准入脚本原子追加，这个入口留给补单和测试。
    pub async fn enqueue(&self, msg: &QueueMessage) -> Result<String, QueueError> {
        let id = self
            .store
            .stream_append(&self.stream, &msg.to_fields())
            .await?;
        Ok(id)
    }

    /// 读取一条新消息，最多阻塞配置的时长；超时返回 `None`
    pub async fn next_new(&self) -> Result<Option<(String, QueueMessage)>, QueueError> {
        let entry = self
            .store
            .stream_read_new(&self.stream, &self.group, &self.consumer, self.block)
            .await?;
        decode(entry)
    }

    /// 从 pending-list 头部读取一条已投递未确认的消息
    pub async fn next_pending(&self) -> Result<Option<(String, QueueMessage)>, QueueError> {
        let entry = self
            .store
            .stream_read_pending(&self.stream, &self.group, &self.consumer)
            .await?;
        decode(entry)
    }

    /// 确认消息
    pub async fn ack(&self, id: &str) -> Result<(), QueueError> {
        self.store.stream_ack(&self.stream, &self.group, id).await?;
        Ok(())
    }
}

fn decode(
    entry: Option<crate::store::StreamEntry>,
) -> Result<Option<(String, QueueMessage)>, QueueError> {
    let Some(entry) = entry else {
        return Ok(None);
    };
    match QueueMessage::from_fields(&entry.fields) {
        Ok(msg) => Ok(Some((entry.id, msg))),
        Err(source) => Err(QueueError::Decode {
            id: entry.id,
            source,
        }),
    }
}
