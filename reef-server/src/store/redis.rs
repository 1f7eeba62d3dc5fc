//! Redis 版共享存储
//!
//! 生产部署后端。锁释放与秒杀准入用 Lua 脚本保证单步原子性，订单流用
//! Redis Streams 消费组。阻塞式流读取走独立连接，避免拖慢同连接上的
//! 普通命令。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Script};

use super::{SharedStore, StoreError, StoreResult, StreamEntry, keys};

/// 比较后删除（锁释放）：token 匹配才删除
const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
end
return 0
"#;

/// 秒杀准入：库存 → 一人一单 → 扣减 + 标记 + 订单入流，整段原子执行。
/// 键前缀与 keys.rs 保持一致。
const ADMISSION_SCRIPT: &str = r#"
local voucherId = ARGV[1]
local userId = ARGV[2]
local orderId = ARGV[3]
local stockKey = 'seckill:stock:' .. voucherId
local buyersKey = 'seckill:order:' .. voucherId

local stock = redis.call('get', stockKey)
if (stock == false or tonumber(stock) <= 0) then
    return 1
end
if (redis.call('sismember', buyersKey, userId) == 1) then
    return 2
end

redis.call('incrby', stockKey, -1)
redis.call('sadd', buyersKey, userId)
redis.call('xadd', ARGV[4], '*', 'id', orderId, 'userId', userId, 'voucherId', voucherId)
return 0
"#;

/// Redis 共享存储
pub struct RedisStore {
    conn: ConnectionManager,
    /// 阻塞读专用连接（XREADGROUP BLOCK 会占住多路复用连接）
    blocking_conn: ConnectionManager,
    release_script: Script,
    admission_script: Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(unavailable)?;
        let blocking_conn = ConnectionManager::new(client).await.map_err(unavailable)?;
        Ok(Self {
            conn,
            blocking_conn,
            release_script: Script::new(RELEASE_SCRIPT),
            admission_script: Script::new(ADMISSION_SCRIPT),
        })
    }
}

fn unavailable(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// 脚本调用错误分类：连接层问题归为不可用，其余是脚本失败
fn script_error(e: redis::RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Script(e.to_string())
    }
}

fn first_entry(reply: StreamReadReply) -> StoreResult<Option<StreamEntry>> {
    for key in reply.keys {
        for sid in key.ids {
            let mut fields = HashMap::with_capacity(sid.map.len());
            for (name, value) in sid.map {
                let text: String = redis::from_redis_value(&value)
                    .map_err(|e| StoreError::Stream(format!("non-string field {name}: {e}")))?;
                fields.insert(name, text);
            }
            return Ok(Some(StreamEntry { id: sid.id, fields }));
        }
    }
    Ok(None)
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(unavailable)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                let _: () = conn
                    .set_ex(key, value, ttl.as_secs().max(1))
                    .await
                    .map_err(unavailable)?;
            }
            None => {
                let _: () = conn.set(key, value).await.map_err(unavailable)?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await.map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(script_error)?;
        Ok(deleted > 0)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1).await.map_err(unavailable)
    }

    async fn check_and_reserve(
        &self,
        voucher_id: u64,
        user_id: u64,
        order_id: u64,
    ) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        self.admission_script
            .arg(voucher_id.to_string())
            .arg(user_id.to_string())
            .arg(order_id.to_string())
            .arg(keys::ORDER_STREAM)
            .invoke_async(&mut conn)
            .await
            .map_err(script_error)
    }

    async fn stream_append(
        &self,
        stream: &str,
        fields: &[(String, String)],
    ) -> StoreResult<String> {
        let mut conn = self.conn.clone();
        conn.xadd(stream, "*", fields).await.map_err(unavailable)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let created: Result<String, redis::RedisError> =
            conn.xgroup_create_mkstream(stream, group, "$").await;
        match created {
            Ok(_) => Ok(()),
            // 组已存在不算错误
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(StoreError::Stream(e.to_string())),
        }
    }

    async fn stream_read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> StoreResult<Option<StreamEntry>> {
        let mut conn = self.blocking_conn.clone();
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(1)
            .block(block.as_millis() as usize);
        let reply: StreamReadReply = conn
            .xread_options(&[stream], &[">"], &options)
            .await
            .map_err(unavailable)?;
        first_entry(reply)
    }

    async fn stream_read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> StoreResult<Option<StreamEntry>> {
        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default().group(group, consumer).count(1);
        let reply: StreamReadReply = conn
            .xread_options(&[stream], &["0"], &options)
            .await
            .map_err(unavailable)?;
        first_entry(reply)
    }

    async fn stream_ack(&self, stream: &str, group: &str, id: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(stream, group, &[id])
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
