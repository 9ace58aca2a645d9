// ============================================================================
// Message Bus Tests
// ============================================================================
//
// Filtered fan-out, subscriber isolation and the bus-to-queue bridge.
//
// ============================================================================

use chat_relay::bus::MessageBus;
use chat_relay::message::{Direction, Envelope};
use chat_relay::queue::{spawn_outbound_bridge, DeliveryQueue, InMemoryQueue};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_filter_selects_matching_direction_only() {
    let bus = MessageBus::new();

    let (_handle, mut rx) = bus
        .subscribe(Arc::new(|e: &Envelope| e.direction == Direction::Out))
        .await;

    let dispatched = bus.publish(&Envelope::inbound("alice", "c1", "question")).await;
    assert_eq!(dispatched, 0);

    let dispatched = bus.publish(&Envelope::outbound("alice", "c1", "answer")).await;
    assert_eq!(dispatched, 1);

    let received = rx.recv().await.unwrap();
    assert_eq!(received.direction, Direction::Out);
    assert_eq!(received.body, "answer");

    // Nothing else was dispatched to this subscriber.
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_every_matching_subscriber_receives_a_copy() {
    let bus = MessageBus::new();

    let (_h1, mut rx1) = bus.subscribe(Arc::new(|_: &Envelope| true)).await;
    let (_h2, mut rx2) = bus.subscribe(Arc::new(|_: &Envelope| true)).await;
    let (_h3, mut rx3) = bus
        .subscribe(Arc::new(|e: &Envelope| e.user_id == "bob"))
        .await;

    let dispatched = bus.publish(&Envelope::outbound("alice", "c1", "hi")).await;
    assert_eq!(dispatched, 2);

    assert_eq!(rx1.recv().await.unwrap().body, "hi");
    assert_eq!(rx2.recv().await.unwrap().body, "hi");
    assert!(rx3.try_recv().is_err());
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent_and_keeps_buffered_messages() {
    let bus = MessageBus::new();
    let (handle, mut rx) = bus.subscribe(Arc::new(|_: &Envelope| true)).await;

    bus.publish(&Envelope::outbound("alice", "c1", "before")).await;

    handle.unsubscribe().await;
    handle.unsubscribe().await;
    assert_eq!(bus.subscriber_count().await, 0);

    let dispatched = bus.publish(&Envelope::outbound("alice", "c1", "after")).await;
    assert_eq!(dispatched, 0);

    // The envelope dispatched before unsubscribe is still deliverable.
    assert_eq!(rx.recv().await.unwrap().body, "before");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_dropped_subscriber_never_blocks_siblings() {
    let bus = MessageBus::new();

    let (_dead_handle, dead_rx) = bus.subscribe(Arc::new(|_: &Envelope| true)).await;
    let (_live_handle, mut live_rx) = bus.subscribe(Arc::new(|_: &Envelope| true)).await;

    // Simulate a subscriber that went away without unsubscribing.
    drop(dead_rx);

    for i in 0..10 {
        bus.publish(&Envelope::outbound("alice", "c1", &format!("m{}", i)))
            .await;
    }

    for i in 0..10 {
        assert_eq!(live_rx.recv().await.unwrap().body, format!("m{}", i));
    }

    // The closed subscriber was pruned during publish.
    assert_eq!(bus.subscriber_count().await, 1);
}

#[tokio::test]
async fn test_outbound_bridge_enqueues_out_direction_only() {
    let bus = MessageBus::new();
    let queue: Arc<dyn DeliveryQueue> = Arc::new(InMemoryQueue::new(
        3,
        Duration::from_secs(30),
        Duration::ZERO,
    ));

    let _bridge = spawn_outbound_bridge(&bus, queue.clone()).await;

    bus.publish(&Envelope::inbound("alice", "c1", "question")).await;
    bus.publish(&Envelope::outbound("alice", "c1", "answer")).await;
    bus.publish(&Envelope::inbound("bob", "c2", "another question")).await;

    // The bridge enqueues on a spawned task; give it a beat.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let depth = queue.depth().await.unwrap();
    assert_eq!(depth.pending, 1);

    let batch = queue.dequeue_batch(10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].envelope.direction, Direction::Out);
    assert_eq!(batch[0].envelope.body, "answer");
}
