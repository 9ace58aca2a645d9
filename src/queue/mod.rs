// ============================================================================
// Delivery Queue
// ============================================================================
//
// Durable buffer for Out-direction envelopes, decoupling publish rate from
// delivery rate. The queue leases each entry to exactly one egress worker at
// a time (visibility timeout); a lease that expires without ack or fail
// makes the entry visible again for another worker. Entries that exhaust
// the attempt ceiling move verbatim to the dead letter sink - a terminal
// state requiring operator intervention.
//
// The trait is the seam for testability: the in-memory backend serves tests
// and single-instance deployments, the Redis backend serves multi-process
// deployments.
//
// ============================================================================

pub mod memory;
pub mod redis;

pub use memory::InMemoryQueue;
pub use redis::RedisDeliveryQueue;

use crate::bus::{MessageBus, SubscriptionHandle};
use crate::error::AppResult;
use crate::message::{Direction, Envelope};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// One leased delivery of an envelope.
///
/// `attempts` counts deliveries: it increments each time the entry is
/// claimed by a worker. `lease_token` is unique per delivery and must match
/// on ack/fail, so a worker whose lease expired can never settle an entry
/// that has since been claimed by a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub envelope: Envelope,
    pub attempts: u32,
    pub lease_token: String,
}

impl QueueEntry {
    pub fn new(envelope: Envelope) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            envelope,
            attempts: 0,
            lease_token: String::new(),
        }
    }
}

/// Outcome of failing an in-flight entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Attempt ceiling not reached; the entry becomes visible again after
    /// the configured backoff.
    Requeued,
    /// Attempt ceiling reached; the entry moved to the dead letter sink.
    DeadLettered,
}

/// Queue depth snapshot for health checks and operators.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueDepth {
    pub pending: usize,
    pub in_flight: usize,
    pub dead_lettered: usize,
}

/// Durable delivery queue contract.
///
/// The queue performs no direction filtering; the bus subscription filter
/// guarantees structurally that only Out-direction envelopes arrive here.
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Buffer an envelope for delivery.
    async fn enqueue(&self, envelope: Envelope) -> AppResult<()>;

    /// Claim up to `max` visible entries, leasing each to the caller.
    /// Returns fewer than `max` when the queue holds fewer visible entries.
    async fn dequeue_batch(&self, max: usize) -> AppResult<Vec<QueueEntry>>;

    /// Settle a delivered entry, removing it permanently.
    /// Errors if the caller's lease is no longer current.
    async fn ack(&self, entry: &QueueEntry) -> AppResult<()>;

    /// Record a failed delivery attempt. Re-queues the entry or
    /// dead-letters it once the attempt ceiling is reached.
    /// Errors if the caller's lease is no longer current.
    async fn fail(&self, entry: &QueueEntry) -> AppResult<FailOutcome>;

    /// Current depth snapshot.
    async fn depth(&self) -> AppResult<QueueDepth>;

    /// Dead-lettered entries, for out-of-band inspection. Never replayed
    /// automatically.
    async fn dead_letters(&self) -> AppResult<Vec<QueueEntry>>;
}

/// Bridge the bus to the delivery queue.
///
/// This subscription is the sole place direction-based routing is declared:
/// a static `direction == Out` filter. In-direction envelopes never reach
/// the queue.
pub async fn spawn_outbound_bridge(
    bus: &MessageBus,
    queue: Arc<dyn DeliveryQueue>,
) -> SubscriptionHandle {
    let (handle, mut rx) = bus
        .subscribe(Arc::new(|envelope: &Envelope| {
            envelope.direction == Direction::Out
        }))
        .await;

    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let message_id = envelope.message_id.clone();
            match queue.enqueue(envelope).await {
                Ok(()) => {
                    metrics::MESSAGES_ENQUEUED_TOTAL.inc();
                    debug!(message_id = %message_id, "Outbound envelope enqueued");
                }
                Err(e) => {
                    error!(
                        error = %e,
                        message_id = %message_id,
                        "Failed to enqueue outbound envelope"
                    );
                }
            }
        }
        debug!("Outbound bridge stopped");
    });

    handle
}
