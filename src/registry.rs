// ============================================================================
// Subscription Registry
// ============================================================================
//
// Maps an authenticated (user_id, connection_id) pair to the live
// subscription streams interested in it. Duplicate subscriptions for one
// pair are allowed and both receive duplicate pushes - documented
// at-least-once behavior, deliberately not deduped here.
//
// ============================================================================

use crate::message::Envelope;
use crate::resolver::ResolverPipeline;
use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, RwLock};
use tokio_stream::Stream;

/// Addressing key for all Out-direction deliveries.
pub type ClientKey = (String, String);

/// One live client's registered interest in a single (user_id,
/// connection_id) pair.
///
/// The stream yields only Out-direction envelopes whose key matches the
/// subscription, and terminates when the connection is removed from the
/// registry or the registry side is dropped.
pub struct Subscription {
    pub user_id: String,
    pub connection_id: String,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Envelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

pub struct SubscriptionRegistry {
    clients: RwLock<HashMap<ClientKey, Vec<mpsc::UnboundedSender<Envelope>>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Register a live subscription for a (user_id, connection_id) pair.
    ///
    /// Callers must only subscribe with their own authenticated user_id;
    /// that authorization check lives at the transport edge, outside the
    /// relay.
    pub async fn subscribe(&self, user_id: &str, connection_id: &str) -> Subscription {
        let key = (user_id.to_string(), connection_id.to_string());
        let (tx, rx) = mpsc::unbounded_channel();

        self.clients
            .write()
            .await
            .entry(key)
            .or_default()
            .push(tx);

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            "Subscription registered"
        );

        Subscription {
            user_id: user_id.to_string(),
            connection_id: connection_id.to_string(),
            rx,
        }
    }

    /// Drop every subscription for a pair, terminating its streams.
    /// Returns the number of subscriptions removed.
    pub async fn disconnect(&self, user_id: &str, connection_id: &str) -> usize {
        let key = (user_id.to_string(), connection_id.to_string());
        let removed = self
            .clients
            .write()
            .await
            .remove(&key)
            .map(|senders| senders.len())
            .unwrap_or(0);

        if removed > 0 {
            tracing::debug!(
                user_id = %user_id,
                connection_id = %connection_id,
                removed = removed,
                "Subscriptions disconnected"
            );
        }
        removed
    }

    /// Fan an envelope out through the resolver pipeline to every matching
    /// live subscription. Closed subscriptions are pruned along the way.
    /// Returns the number of streams the envelope was pushed to.
    pub async fn deliver(&self, envelope: &Envelope, pipeline: &ResolverPipeline) -> usize {
        let mut clients = self.clients.write().await;
        let mut delivered = 0;

        clients.retain(|key, senders| {
            match pipeline.resolve(envelope.clone(), key) {
                Some(resolved) => {
                    senders.retain(|tx| tx.send(resolved.clone()).is_ok());
                    delivered += senders.len();
                }
                None => {
                    senders.retain(|tx| !tx.is_closed());
                }
            }
            !senders.is_empty()
        });

        delivered
    }

    pub async fn live_subscriptions(&self) -> usize {
        self.clients
            .read()
            .await
            .values()
            .map(|senders| senders.len())
            .sum()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
