// ============================================================================
// Redis-backed Delivery Queue
// ============================================================================
//
// Key layout (all under the configured prefix):
// - {prefix}pending  - list of MessagePack-encoded entries awaiting delivery
// - {prefix}inflight - hash id -> encoded entry, one field per active lease
// - {prefix}leases   - sorted set id -> lease deadline (unix millis)
// - {prefix}dead     - list of dead-lettered entries
//
// Lease reclaim is claim-by-ZREM: a worker only requeues an expired entry
// if its ZREM removed the member, so two workers never requeue the same
// lease. LPOP gives single-receiver visibility on the pending list itself.
//
// ============================================================================

use crate::config::QueueConfig;
use crate::error::{AppError, AppResult};
use crate::message::Envelope;
use crate::metrics;
use crate::queue::{DeliveryQueue, FailOutcome, QueueDepth, QueueEntry};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, cmd, AsyncCommands, Client};
use tracing::{debug, warn};

pub struct RedisDeliveryQueue {
    conn: ConnectionManager,
    prefix: String,
    max_attempts: u32,
    visibility_timeout_ms: i64,
}

impl RedisDeliveryQueue {
    pub async fn connect(config: &QueueConfig) -> AppResult<Self> {
        tracing::debug!("Opening Redis client...");
        let client = Client::open(config.redis_url.as_str())?;

        tracing::debug!("Getting Redis connection manager...");
        let conn = client.get_connection_manager().await?;

        tracing::info!(
            key_prefix = %config.key_prefix,
            max_delivery_attempts = config.max_delivery_attempts,
            visibility_timeout_secs = config.visibility_timeout_secs,
            "Connected to Redis delivery queue"
        );

        Ok(Self {
            conn,
            prefix: config.key_prefix.clone(),
            max_attempts: config.max_delivery_attempts,
            visibility_timeout_ms: (config.visibility_timeout_secs * 1000) as i64,
        })
    }

    fn pending_key(&self) -> String {
        format!("{}pending", self.prefix)
    }

    fn inflight_key(&self) -> String {
        format!("{}inflight", self.prefix)
    }

    fn leases_key(&self) -> String {
        format!("{}leases", self.prefix)
    }

    fn dead_key(&self) -> String {
        format!("{}dead", self.prefix)
    }

    /// Requeue or dead-letter entries whose lease deadline has passed.
    async fn reclaim_expired(&self, now_ms: i64) -> AppResult<()> {
        let mut conn = self.conn.clone();

        let expired: Vec<String> = cmd("ZRANGEBYSCORE")
            .arg(self.leases_key())
            .arg("-inf")
            .arg(now_ms)
            .query_async(&mut conn)
            .await?;

        for id in expired {
            // Claim by ZREM: only the worker that removes the member
            // requeues the entry.
            let removed: i64 = conn.zrem(self.leases_key(), &id).await?;
            if removed == 0 {
                continue;
            }

            let bytes: Option<Vec<u8>> = conn.hget(self.inflight_key(), &id).await?;
            let _: () = conn.hdel(self.inflight_key(), &id).await?;

            let Some(bytes) = bytes else { continue };
            let mut entry: QueueEntry = rmp_serde::from_slice(&bytes)?;
            entry.lease_token.clear();

            if entry.attempts >= self.max_attempts {
                warn!(
                    message_id = %entry.envelope.message_id,
                    attempts = entry.attempts,
                    "Lease expired on final attempt, dead-lettering entry"
                );
                metrics::DEAD_LETTERED_TOTAL.inc();
                let encoded = rmp_serde::encode::to_vec_named(&entry)?;
                let _: () = conn.rpush(self.dead_key(), encoded).await?;
            } else {
                debug!(
                    message_id = %entry.envelope.message_id,
                    attempts = entry.attempts,
                    "Lease expired, entry visible again"
                );
                let encoded = rmp_serde::encode::to_vec_named(&entry)?;
                let _: () = conn.rpush(self.pending_key(), encoded).await?;
            }
        }

        Ok(())
    }

    /// Fetch the in-flight record for an entry if the caller's lease is
    /// still current.
    async fn take_if_leased(&self, entry: &QueueEntry) -> AppResult<Option<QueueEntry>> {
        let mut conn = self.conn.clone();

        let bytes: Option<Vec<u8>> = conn.hget(self.inflight_key(), &entry.id).await?;
        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let stored: QueueEntry = rmp_serde::from_slice(&bytes)?;
        if stored.lease_token != entry.lease_token {
            return Ok(None);
        }

        let _: () = conn.hdel(self.inflight_key(), &entry.id).await?;
        let _: () = conn.zrem(self.leases_key(), &entry.id).await?;

        Ok(Some(stored))
    }
}

#[async_trait]
impl DeliveryQueue for RedisDeliveryQueue {
    async fn enqueue(&self, envelope: Envelope) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let entry = QueueEntry::new(envelope);
        let encoded = rmp_serde::encode::to_vec_named(&entry)?;
        let _: () = conn.rpush(self.pending_key(), encoded).await?;
        Ok(())
    }

    async fn dequeue_batch(&self, max: usize) -> AppResult<Vec<QueueEntry>> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.reclaim_expired(now_ms).await?;

        let mut conn = self.conn.clone();
        let mut batch = Vec::new();

        for _ in 0..max {
            let bytes: Option<Vec<u8>> = cmd("LPOP")
                .arg(self.pending_key())
                .query_async(&mut conn)
                .await?;
            let Some(bytes) = bytes else { break };

            let mut entry: QueueEntry = rmp_serde::from_slice(&bytes)?;
            entry.attempts += 1;
            entry.lease_token = uuid::Uuid::new_v4().to_string();

            let encoded = rmp_serde::encode::to_vec_named(&entry)?;
            let _: () = conn.hset(self.inflight_key(), &entry.id, encoded).await?;
            let _: () = conn
                .zadd(self.leases_key(), &entry.id, now_ms + self.visibility_timeout_ms)
                .await?;

            batch.push(entry);
        }

        Ok(batch)
    }

    async fn ack(&self, entry: &QueueEntry) -> AppResult<()> {
        match self.take_if_leased(entry).await? {
            Some(_) => Ok(()),
            None => Err(AppError::queue(format!(
                "cannot ack entry {}: lease expired or reassigned",
                entry.id
            ))),
        }
    }

    async fn fail(&self, entry: &QueueEntry) -> AppResult<FailOutcome> {
        let Some(mut stored) = self.take_if_leased(entry).await? else {
            return Err(AppError::queue(format!(
                "cannot fail entry {}: lease expired or reassigned",
                entry.id
            )));
        };

        let mut conn = self.conn.clone();
        stored.lease_token.clear();
        let encoded = rmp_serde::encode::to_vec_named(&stored)?;

        if stored.attempts >= self.max_attempts {
            metrics::DEAD_LETTERED_TOTAL.inc();
            let _: () = conn.rpush(self.dead_key(), encoded).await?;
            Ok(FailOutcome::DeadLettered)
        } else {
            // Backoff between retries is provided by the worker poll
            // interval; the entry is visible again immediately.
            let _: () = conn.rpush(self.pending_key(), encoded).await?;
            Ok(FailOutcome::Requeued)
        }
    }

    async fn depth(&self) -> AppResult<QueueDepth> {
        let mut conn = self.conn.clone();
        let pending: usize = conn.llen(self.pending_key()).await?;
        let in_flight: usize = conn.hlen(self.inflight_key()).await?;
        let dead_lettered: usize = conn.llen(self.dead_key()).await?;
        Ok(QueueDepth {
            pending,
            in_flight,
            dead_lettered,
        })
    }

    async fn dead_letters(&self) -> AppResult<Vec<QueueEntry>> {
        let mut conn = self.conn.clone();
        let raw: Vec<Vec<u8>> = conn.lrange(self.dead_key(), 0, -1).await?;

        let mut entries = Vec::with_capacity(raw.len());
        for bytes in raw {
            entries.push(rmp_serde::from_slice(&bytes)?);
        }
        Ok(entries)
    }
}
