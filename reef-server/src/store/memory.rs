//! 内存版共享存储
//!
//! 单机模式与测试用。一把互斥锁覆盖全部状态，天然给出与 Redis 后端
//! 相同的原子性：条件写、计数器、准入脚本、消费组 pending 语义。
//! TTL 惰性过期（访问时检查），阻塞读用短轮询模拟。

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{SharedStore, StoreError, StoreResult, StreamEntry, keys};
use shared::order;

/// 轮询模拟阻塞读的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(5);

struct ValueEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl ValueEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|t| Instant::now() >= t)
    }
}

#[derive(Default)]
struct StreamState {
    /// 追加日志本体
    entries: Vec<(String, HashMap<String, String>)>,
    next_seq: u64,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct GroupState {
    /// 下一条未投递消息在日志中的下标
    cursor: usize,
    /// 已投递未确认的消息 ID，投递顺序
    pending: Vec<String>,
}

#[derive(Default)]
struct Inner {
    kv: HashMap<String, ValueEntry>,
    sets: HashMap<String, HashSet<String>>,
    streams: HashMap<String, StreamState>,
}

/// 内存共享存储
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn append_locked(
        stream: &mut StreamState,
        fields: Vec<(String, String)>,
    ) -> String {
        stream.next_seq += 1;
        let id = format!("{}-0", stream.next_seq);
        stream.entries.push((id.clone(), fields.into_iter().collect()));
        id
    }

    /// 尝试投递一条新消息（非阻塞），组不存在时报错
    fn try_deliver(&self, stream: &str, group: &str) -> StoreResult<Option<StreamEntry>> {
        let mut inner = self.inner.lock();
        let state = inner
            .streams
            .get_mut(stream)
            .ok_or_else(|| StoreError::Stream(format!("no such stream: {stream}")))?;
        let cursor = state
            .groups
            .get(group)
            .ok_or_else(|| StoreError::Stream(format!("no such group: {group}")))?
            .cursor;

        if cursor >= state.entries.len() {
            return Ok(None);
        }
        let (id, fields) = state.entries[cursor].clone();
        if let Some(grp) = state.groups.get_mut(group) {
            grp.cursor = cursor + 1;
            grp.pending.push(id.clone());
        }
        Ok(Some(StreamEntry { id, fields }))
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut inner = self.inner.lock();
        match inner.kv.get(key) {
            Some(entry) if entry.expired() => {
                inner.kv.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.kv.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        match inner.kv.remove(key) {
            Some(entry) => Ok(!entry.expired()),
            None => Ok(false),
        }
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        if inner.kv.get(key).is_some_and(|e| !e.expired()) {
            return Ok(false);
        }
        inner.kv.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        let matches = inner
            .kv
            .get(key)
            .is_some_and(|e| !e.expired() && e.value == expected);
        if matches {
            inner.kv.remove(key);
        }
        Ok(matches)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut inner = self.inner.lock();
        let current = match inner.kv.get(key) {
            Some(entry) if !entry.expired() => entry
                .value
                .parse::<i64>()
                .map_err(|_| StoreError::Script(format!("non-numeric value at {key}")))?,
            _ => 0,
        };
        let next = current + 1;
        inner.kv.insert(
            key.to_string(),
            ValueEntry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn check_and_reserve(
        &self,
        voucher_id: u64,
        user_id: u64,
        order_id: u64,
    ) -> StoreResult<i64> {
        let mut inner = self.inner.lock();

        let stock_key = keys::stock_key(voucher_id);
        let stock = match inner.kv.get(&stock_key) {
            Some(entry) if !entry.expired() => entry
                .value
                .parse::<i64>()
                .map_err(|_| StoreError::Script(format!("non-numeric stock at {stock_key}")))?,
            _ => 0,
        };
        if stock <= 0 {
            return Ok(1);
        }

        let buyers_key = keys::buyers_key(voucher_id);
        let user = user_id.to_string();
        if inner
            .sets
            .get(&buyers_key)
            .is_some_and(|s| s.contains(&user))
        {
            return Ok(2);
        }

        inner.kv.insert(
            stock_key,
            ValueEntry {
                value: (stock - 1).to_string(),
                expires_at: None,
            },
        );
        inner.sets.entry(buyers_key).or_default().insert(user);

        let msg = order::QueueMessage::new(order_id, user_id, voucher_id);
        let stream = inner.streams.entry(keys::ORDER_STREAM.to_string()).or_default();
        Self::append_locked(stream, msg.to_fields());

        Ok(0)
    }

    async fn stream_append(
        &self,
        stream: &str,
        fields: &[(String, String)],
    ) -> StoreResult<String> {
        let mut inner = self.inner.lock();
        let state = inner.streams.entry(stream.to_string()).or_default();
        Ok(Self::append_locked(state, fields.to_vec()))
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let state = inner.streams.entry(stream.to_string()).or_default();
        let len = state.entries.len();
        state.groups.entry(group.to_string()).or_insert(GroupState {
            cursor: len,
            pending: Vec::new(),
        });
        Ok(())
    }

    async fn stream_read_new(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        block: Duration,
    ) -> StoreResult<Option<StreamEntry>> {
        let deadline = Instant::now() + block;
        loop {
            if let Some(entry) = self.try_deliver(stream, group)? {
                return Ok(Some(entry));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn stream_read_pending(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
    ) -> StoreResult<Option<StreamEntry>> {
        let inner = self.inner.lock();
        let state = inner
            .streams
            .get(stream)
            .ok_or_else(|| StoreError::Stream(format!("no such stream: {stream}")))?;
        let grp = state
            .groups
            .get(group)
            .ok_or_else(|| StoreError::Stream(format!("no such group: {group}")))?;

        let Some(id) = grp.pending.first() else {
            return Ok(None);
        };
        let entry = state
            .entries
            .iter()
            .find(|(eid, _)| eid == id)
            .map(|(eid, fields)| StreamEntry {
                id: eid.clone(),
                fields: fields.clone(),
            })
            .ok_or_else(|| StoreError::Stream(format!("pending id {id} missing from log")))?;
        Ok(Some(entry))
    }

    async fn stream_ack(&self, stream: &str, group: &str, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.streams.get_mut(stream)
            && let Some(grp) = state.groups.get_mut(group)
        {
            grp.pending.retain(|p| p != id);
        }
        Ok(())
    }
}
