// ============================================================================
// Message Bus
// ============================================================================
//
// In-process broadcast topic. Every published envelope is offered to every
// registered subscriber; each subscriber declares a filter predicate and
// owns an unbounded channel, so a slow or dead subscriber never blocks
// siblings. Delivery is at-least-once with best-effort ordering only.
//
// ============================================================================

use crate::message::Envelope;
use crate::metrics;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Per-subscriber filter predicate, evaluated against every published envelope.
pub type FilterPredicate = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

struct BusSubscriber {
    filter: FilterPredicate,
    tx: mpsc::UnboundedSender<Envelope>,
}

type Subscribers = Arc<RwLock<HashMap<u64, BusSubscriber>>>;

/// Handle returned by [`MessageBus::subscribe`].
///
/// `unsubscribe` is idempotent and immediately stops further deliveries;
/// envelopes already dispatched to the subscriber's channel are not recalled.
pub struct SubscriptionHandle {
    id: u64,
    subscribers: Subscribers,
}

impl SubscriptionHandle {
    pub async fn unsubscribe(&self) {
        if self.subscribers.write().await.remove(&self.id).is_some() {
            tracing::debug!(subscriber_id = self.id, "Bus subscriber removed");
        }
    }
}

pub struct MessageBus {
    subscribers: Subscribers,
    next_id: AtomicU64,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a subscriber with a filter predicate.
    ///
    /// Returns the unsubscribe handle and the subscriber's receiving end.
    pub async fn subscribe(
        &self,
        filter: FilterPredicate,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Envelope>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.subscribers
            .write()
            .await
            .insert(id, BusSubscriber { filter, tx });

        tracing::debug!(subscriber_id = id, "Bus subscriber registered");

        let handle = SubscriptionHandle {
            id,
            subscribers: Arc::clone(&self.subscribers),
        };
        (handle, rx)
    }

    /// Publish an envelope to every subscriber whose filter matches.
    ///
    /// Dispatch is a non-blocking channel send per subscriber; subscribers
    /// whose receiving end is gone are pruned. Returns the number of
    /// subscribers the envelope was dispatched to.
    pub async fn publish(&self, envelope: &Envelope) -> usize {
        let mut subscribers = self.subscribers.write().await;
        let mut dispatched = 0;

        subscribers.retain(|id, subscriber| {
            if !(subscriber.filter)(envelope) {
                return !subscriber.tx.is_closed();
            }
            match subscriber.tx.send(envelope.clone()) {
                Ok(()) => {
                    dispatched += 1;
                    true
                }
                Err(_) => {
                    tracing::debug!(subscriber_id = *id, "Pruning closed bus subscriber");
                    false
                }
            }
        });

        metrics::MESSAGES_PUBLISHED_TOTAL
            .with_label_values(&[match envelope.direction {
                crate::message::Direction::In => "in",
                crate::message::Direction::Out => "out",
            }])
            .inc();

        tracing::debug!(
            message_id = %envelope.message_id,
            direction = ?envelope.direction,
            dispatched = dispatched,
            "Envelope published"
        );

        dispatched
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
