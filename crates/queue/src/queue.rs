//! Redis-backed queue with visibility leases.
//!
//! Layout per queue (`courier:queue:{name}`):
//! - `:visible` list of message ids ready for receive
//! - `:inflight` sorted set of received ids scored by lease deadline (ms)
//! - `:sent` sorted set of all ids scored by send time (ms), for oldest age
//! - `:msg:{id}` hash with `body`, `attributes` (JSON), `receive_count`,
//!   `sent_at` and the current `receipt`
//!
//! A receive issues a fresh receipt per delivery; delete and release only
//! accept the current one, checked in the same script that applies the
//! change. Release hands back the delivery it was charged; an expired lease
//! keeps it. Expired leases are returned to the visible list at the start of
//! every receive.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Script};
use redis::aio::ConnectionManager;
use uuid::Uuid;

use courier_common::error::ProviderError;
use courier_common::providers::{MessageAttributes, QueueAttribute, QueueProvider};
use courier_common::types::DeadLetteredMessage;

use crate::KEY_PREFIX;

/// Interval between empty-queue polls while long-polling.
const POLL_STEP: Duration = Duration::from_millis(100);

/// KEYS: message hash, inflight, sent. ARGV: receipt, id.
/// Returns 0 for a stale receipt, 1 when deleted.
const DELETE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'receipt') ~= ARGV[1] then
    return 0
end
redis.call('DEL', KEYS[1])
redis.call('ZREM', KEYS[2], ARGV[2])
redis.call('ZREM', KEYS[3], ARGV[2])
return 1
"#;

/// KEYS: message hash, inflight, visible. ARGV: receipt, id.
/// Returns 0 for a stale receipt, -1 when not in flight, 1 when released.
const RELEASE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'receipt') ~= ARGV[1] then
    return 0
end
if redis.call('ZREM', KEYS[2], ARGV[2]) == 0 then
    return -1
end
redis.call('HDEL', KEYS[1], 'receipt')
if tonumber(redis.call('HGET', KEYS[1], 'receive_count') or '0') > 0 then
    redis.call('HINCRBY', KEYS[1], 'receive_count', -1)
end
redis.call('RPUSH', KEYS[3], ARGV[2])
return 1
"#;

/// Redis [`QueueProvider`] bound to one queue.
pub struct RedisQueue {
    conn: ConnectionManager,
    name: String,
    visibility_timeout: Duration,
    delete_script: Script,
    release_script: Script,
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager, name: impl Into<String>, visibility_timeout: Duration) -> Self {
        Self {
            conn,
            name: name.into(),
            visibility_timeout,
            delete_script: Script::new(DELETE_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }

    fn key(&self, suffix: &str) -> String {
        queue_key(&self.name, suffix)
    }

    fn message_key(&self, id: &str) -> String {
        queue_key(&self.name, &format!("msg:{}", id))
    }

    /// Move every in-flight message whose lease has expired back to visible.
    async fn requeue_expired(&self, conn: &mut ConnectionManager) -> Result<usize, ProviderError> {
        let inflight = self.key("inflight");
        let now_ms = Utc::now().timestamp_millis();
        let expired: Vec<String> = conn.zrangebyscore(&inflight, "-inf", now_ms).await?;

        let mut requeued = 0;
        for id in expired {
            // Only the caller that removes the lease requeues the message
            let removed: i64 = conn.zrem(&inflight, &id).await?;
            if removed == 0 {
                continue;
            }
            let _: () = redis::pipe()
                .atomic()
                .hdel(self.message_key(&id), "receipt")
                .ignore()
                .rpush(self.key("visible"), &id)
                .ignore()
                .query_async(conn)
                .await?;
            requeued += 1;
        }

        if requeued > 0 {
            tracing::debug!(queue = %self.name, requeued, "Returned expired leases to queue");
        }
        Ok(requeued)
    }

    async fn receive_available(
        &self,
        conn: &mut ConnectionManager,
        max: usize,
    ) -> Result<Vec<DeadLetteredMessage>, ProviderError> {
        let visible = self.key("visible");
        let inflight = self.key("inflight");
        let mut received = Vec::new();

        while received.len() < max {
            let id: Option<String> = conn.lpop(&visible, None).await?;
            let Some(id) = id else {
                break;
            };

            let message_key = self.message_key(&id);
            let (body, attributes): (Option<String>, Option<String>) = redis::cmd("HMGET")
                .arg(&message_key)
                .arg("body")
                .arg("attributes")
                .query_async(conn)
                .await?;
            // Deleted while queued
            let Some(body) = body else {
                continue;
            };

            let receipt = Uuid::new_v4().to_string();
            let deadline_ms = Utc::now().timestamp_millis() + self.visibility_timeout.as_millis() as i64;
            let (receive_count,): (u32,) = redis::pipe()
                .atomic()
                .hincr(&message_key, "receive_count", 1)
                .hset(&message_key, "receipt", &receipt)
                .ignore()
                .zadd(&inflight, &id, deadline_ms)
                .ignore()
                .query_async(conn)
                .await?;

            let attributes: MessageAttributes = match attributes {
                Some(json) => serde_json::from_str(&json)?,
                None => MessageAttributes::new(),
            };

            received.push(DeadLetteredMessage {
                receipt_handle: format!("{}:{}", id, receipt),
                id,
                body,
                receive_count,
                attributes,
            });
        }

        Ok(received)
    }
}

#[async_trait]
impl QueueProvider for RedisQueue {
    fn queue_name(&self) -> &str {
        &self.name
    }

    async fn receive_batch(
        &self,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<DeadLetteredMessage>, ProviderError> {
        let mut conn = self.conn.clone();
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            self.requeue_expired(&mut conn).await?;
            let received = self.receive_available(&mut conn, max).await?;

            let now = tokio::time::Instant::now();
            if !received.is_empty() || max == 0 || now >= deadline {
                tracing::trace!(queue = %self.name, count = received.len(), "Received batch");
                return Ok(received);
            }
            tokio::time::sleep(POLL_STEP.min(deadline - now)).await;
        }
    }

    async fn send(&self, body: &str, attributes: &MessageAttributes) -> Result<String, ProviderError> {
        let mut conn = self.conn.clone();
        let id = Uuid::new_v4().to_string();
        let sent_at_ms = Utc::now().timestamp_millis();
        let attributes = serde_json::to_string(attributes)?;

        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(
                self.message_key(&id),
                &[
                    ("body", body.to_string()),
                    ("attributes", attributes),
                    ("receive_count", "0".to_string()),
                    ("sent_at", sent_at_ms.to_string()),
                ],
            )
            .ignore()
            .zadd(self.key("sent"), &id, sent_at_ms)
            .ignore()
            .rpush(self.key("visible"), &id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::debug!(queue = %self.name, message_id = %id, "Message sent");
        Ok(id)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), ProviderError> {
        let (id, receipt) = parse_receipt_handle(receipt_handle)?;
        let mut conn = self.conn.clone();

        let outcome: i64 = self
            .delete_script
            .key(self.message_key(id))
            .key(self.key("inflight"))
            .key(self.key("sent"))
            .arg(receipt)
            .arg(id)
            .invoke_async(&mut conn)
            .await?;
        script_outcome(id, outcome)?;

        tracing::debug!(queue = %self.name, message_id = %id, "Message deleted");
        Ok(())
    }

    async fn release(&self, receipt_handle: &str) -> Result<(), ProviderError> {
        let (id, receipt) = parse_receipt_handle(receipt_handle)?;
        let mut conn = self.conn.clone();

        let outcome: i64 = self
            .release_script
            .key(self.message_key(id))
            .key(self.key("inflight"))
            .key(self.key("visible"))
            .arg(receipt)
            .arg(id)
            .invoke_async(&mut conn)
            .await?;
        script_outcome(id, outcome)?;

        tracing::debug!(queue = %self.name, message_id = %id, "Message released");
        Ok(())
    }

    async fn attributes(
        &self,
        names: &[QueueAttribute],
    ) -> Result<HashMap<QueueAttribute, i64>, ProviderError> {
        let mut conn = self.conn.clone();
        let mut attributes = HashMap::new();

        for name in names {
            let value = match name {
                QueueAttribute::ApproximateNumberOfMessages => {
                    conn.llen::<_, i64>(self.key("visible")).await?
                }
                QueueAttribute::ApproximateNumberOfMessagesNotVisible => {
                    conn.zcard::<_, i64>(self.key("inflight")).await?
                }
                QueueAttribute::ApproximateAgeOfOldestMessage => {
                    let oldest: Vec<(String, f64)> =
                        conn.zrange_withscores(self.key("sent"), 0, 0).await?;
                    match oldest.first() {
                        Some((_, sent_at_ms)) => {
                            (Utc::now().timestamp_millis() - *sent_at_ms as i64).max(0) / 1000
                        }
                        None => 0,
                    }
                }
            };
            attributes.insert(*name, value);
        }

        Ok(attributes)
    }
}

/// Map a delete/release script result to an error.
fn script_outcome(id: &str, outcome: i64) -> Result<(), ProviderError> {
    match outcome {
        1 => Ok(()),
        -1 => Err(ProviderError::Queue(format!("Message {} is not in flight", id))),
        _ => Err(ProviderError::Queue(format!(
            "Stale receipt handle for message {}",
            id
        ))),
    }
}

/// `courier:queue:{name}:{suffix}`
pub(crate) fn queue_key(name: &str, suffix: &str) -> String {
    format!("{}:queue:{}:{}", KEY_PREFIX, name, suffix)
}

/// Split `"{id}:{receipt}"`. Message ids may themselves contain `:`.
pub(crate) fn parse_receipt_handle(handle: &str) -> Result<(&str, &str), ProviderError> {
    match handle.rsplit_once(':') {
        Some((id, receipt)) if !id.is_empty() && !receipt.is_empty() => Ok((id, receipt)),
        _ => Err(ProviderError::Queue(format!(
            "Malformed receipt handle '{}'",
            handle
        ))),
    }
}
