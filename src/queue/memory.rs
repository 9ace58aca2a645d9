use crate::config::QueueConfig;
use crate::error::{AppError, AppResult};
use crate::message::Envelope;
use crate::metrics;
use crate::queue::{DeliveryQueue, FailOutcome, QueueDepth, QueueEntry};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

struct PendingEntry {
    entry: QueueEntry,
    visible_at: Instant,
}

struct LeasedEntry {
    entry: QueueEntry,
    deadline: Instant,
}

struct Inner {
    pending: VecDeque<PendingEntry>,
    in_flight: HashMap<String, LeasedEntry>,
    dead: Vec<QueueEntry>,
}

/// In-process delivery queue with lease semantics.
///
/// Uses `tokio::time::Instant` so lease-expiry behavior is testable under
/// paused time. All operations are short critical sections on one mutex;
/// the lease is the only per-entry lock discipline, same as a real broker.
pub struct InMemoryQueue {
    inner: Mutex<Inner>,
    max_attempts: u32,
    visibility_timeout: Duration,
    retry_backoff: Duration,
}

impl InMemoryQueue {
    pub fn new(max_attempts: u32, visibility_timeout: Duration, retry_backoff: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: VecDeque::new(),
                in_flight: HashMap::new(),
                dead: Vec::new(),
            }),
            max_attempts,
            visibility_timeout,
            retry_backoff,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(
            config.max_delivery_attempts,
            Duration::from_secs(config.visibility_timeout_secs),
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| AppError::internal("delivery queue lock poisoned"))
    }

    /// Return expired leases to the pending queue, or dead-letter them when
    /// the attempt ceiling was reached on the final delivery.
    fn reclaim_expired(inner: &mut Inner, max_attempts: u32, now: Instant) {
        let expired: Vec<String> = inner
            .in_flight
            .iter()
            .filter(|(_, leased)| leased.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some(leased) = inner.in_flight.remove(&id) {
                let mut entry = leased.entry;
                entry.lease_token.clear();
                if entry.attempts >= max_attempts {
                    warn!(
                        message_id = %entry.envelope.message_id,
                        attempts = entry.attempts,
                        "Lease expired on final attempt, dead-lettering entry"
                    );
                    metrics::DEAD_LETTERED_TOTAL.inc();
                    inner.dead.push(entry);
                } else {
                    debug!(
                        message_id = %entry.envelope.message_id,
                        attempts = entry.attempts,
                        "Lease expired, entry visible again"
                    );
                    inner.pending.push_back(PendingEntry {
                        entry,
                        visible_at: now,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl DeliveryQueue for InMemoryQueue {
    async fn enqueue(&self, envelope: Envelope) -> AppResult<()> {
        let mut inner = self.lock()?;
        inner.pending.push_back(PendingEntry {
            entry: QueueEntry::new(envelope),
            visible_at: Instant::now(),
        });
        Ok(())
    }

    async fn dequeue_batch(&self, max: usize) -> AppResult<Vec<QueueEntry>> {
        let now = Instant::now();
        let mut inner = self.lock()?;

        Self::reclaim_expired(&mut inner, self.max_attempts, now);

        let mut batch = Vec::new();
        let mut index = 0;
        while index < inner.pending.len() && batch.len() < max {
            if inner.pending[index].visible_at > now {
                index += 1;
                continue;
            }
            if let Some(pending) = inner.pending.remove(index) {
                let mut entry = pending.entry;
                entry.attempts += 1;
                entry.lease_token = uuid::Uuid::new_v4().to_string();
                inner.in_flight.insert(
                    entry.id.clone(),
                    LeasedEntry {
                        entry: entry.clone(),
                        deadline: now + self.visibility_timeout,
                    },
                );
                batch.push(entry);
            }
        }

        Ok(batch)
    }

    async fn ack(&self, entry: &QueueEntry) -> AppResult<()> {
        let mut inner = self.lock()?;

        match inner.in_flight.get(&entry.id) {
            Some(leased) if leased.entry.lease_token == entry.lease_token => {
                inner.in_flight.remove(&entry.id);
                Ok(())
            }
            _ => Err(AppError::queue(format!(
                "cannot ack entry {}: lease expired or reassigned",
                entry.id
            ))),
        }
    }

    async fn fail(&self, entry: &QueueEntry) -> AppResult<FailOutcome> {
        let now = Instant::now();
        let mut inner = self.lock()?;

        let leased = match inner.in_flight.get(&entry.id) {
            Some(leased) if leased.entry.lease_token == entry.lease_token => {
                inner.in_flight.remove(&entry.id)
            }
            _ => None,
        };

        let Some(leased) = leased else {
            return Err(AppError::queue(format!(
                "cannot fail entry {}: lease expired or reassigned",
                entry.id
            )));
        };

        let mut entry = leased.entry;
        entry.lease_token.clear();

        if entry.attempts >= self.max_attempts {
            metrics::DEAD_LETTERED_TOTAL.inc();
            inner.dead.push(entry);
            Ok(FailOutcome::DeadLettered)
        } else {
            inner.pending.push_back(PendingEntry {
                entry,
                visible_at: now + self.retry_backoff,
            });
            Ok(FailOutcome::Requeued)
        }
    }

    async fn depth(&self) -> AppResult<QueueDepth> {
        let inner = self.lock()?;
        Ok(QueueDepth {
            pending: inner.pending.len(),
            in_flight: inner.in_flight.len(),
            dead_lettered: inner.dead.len(),
        })
    }

    async fn dead_letters(&self) -> AppResult<Vec<QueueEntry>> {
        let inner = self.lock()?;
        Ok(inner.dead.clone())
    }
}
