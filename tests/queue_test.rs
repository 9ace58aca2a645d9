// ============================================================================
// Delivery Queue Tests
// ============================================================================
//
// Lease discipline, attempt ceiling and dead-letter behavior of the
// in-memory backend. Lease-expiry cases run under paused tokio time.
//
// ============================================================================

mod test_utils;

use chat_relay::message::Envelope;
use chat_relay::queue::{DeliveryQueue, FailOutcome, InMemoryQueue};
use std::time::Duration;
use test_utils::test_queue;

#[tokio::test]
async fn test_enqueue_dequeue_ack_lifecycle() {
    let queue = test_queue();

    queue
        .enqueue(Envelope::outbound("alice", "c1", "hello"))
        .await
        .unwrap();

    let depth = queue.depth().await.unwrap();
    assert_eq!((depth.pending, depth.in_flight, depth.dead_lettered), (1, 0, 0));

    let batch = queue.dequeue_batch(10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].attempts, 1);
    assert!(!batch[0].lease_token.is_empty());

    let depth = queue.depth().await.unwrap();
    assert_eq!((depth.pending, depth.in_flight, depth.dead_lettered), (0, 1, 0));

    queue.ack(&batch[0]).await.unwrap();

    let depth = queue.depth().await.unwrap();
    assert_eq!((depth.pending, depth.in_flight, depth.dead_lettered), (0, 0, 0));
}

#[tokio::test]
async fn test_leased_entry_invisible_to_other_workers() {
    let queue = test_queue();
    queue
        .enqueue(Envelope::outbound("alice", "c1", "hello"))
        .await
        .unwrap();

    let first = queue.dequeue_batch(10).await.unwrap();
    assert_eq!(first.len(), 1);

    // A second claimant sees nothing while the lease is live.
    let second = queue.dequeue_batch(10).await.unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn test_success_on_final_attempt_is_not_dead_lettered() {
    let queue = test_queue();
    queue
        .enqueue(Envelope::outbound("alice", "c1", "hello"))
        .await
        .unwrap();

    for attempt in 1..=2 {
        let batch = queue.dequeue_batch(1).await.unwrap();
        assert_eq!(batch[0].attempts, attempt);
        assert_eq!(queue.fail(&batch[0]).await.unwrap(), FailOutcome::Requeued);
    }

    // Third attempt succeeds; the ceiling only applies to failures.
    let batch = queue.dequeue_batch(1).await.unwrap();
    assert_eq!(batch[0].attempts, 3);
    queue.ack(&batch[0]).await.unwrap();

    let depth = queue.depth().await.unwrap();
    assert_eq!(depth.dead_lettered, 0);
}

#[tokio::test]
async fn test_dead_letter_after_attempt_ceiling() {
    let queue = test_queue();
    queue
        .enqueue(Envelope::outbound("alice", "c1", "poison"))
        .await
        .unwrap();

    for _ in 0..2 {
        let batch = queue.dequeue_batch(1).await.unwrap();
        assert_eq!(queue.fail(&batch[0]).await.unwrap(), FailOutcome::Requeued);
    }

    let batch = queue.dequeue_batch(1).await.unwrap();
    assert_eq!(batch[0].attempts, 3);
    assert_eq!(
        queue.fail(&batch[0]).await.unwrap(),
        FailOutcome::DeadLettered
    );

    // Dead-lettered entries are terminal: no fourth delivery.
    assert!(queue.dequeue_batch(10).await.unwrap().is_empty());

    let dead = queue.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].envelope.body, "poison");
    assert_eq!(dead[0].attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn test_expired_lease_makes_entry_visible_again() {
    let queue = InMemoryQueue::new(3, Duration::from_secs(30), Duration::ZERO);
    queue
        .enqueue(Envelope::outbound("alice", "c1", "hello"))
        .await
        .unwrap();

    let first = queue.dequeue_batch(1).await.unwrap();
    assert_eq!(first[0].attempts, 1);

    // Worker crashes: no ack, no fail. Let the lease run out.
    tokio::time::advance(Duration::from_secs(31)).await;

    let second = queue.dequeue_batch(1).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, first[0].id);
    assert_eq!(second[0].attempts, 2);

    // The crashed worker's lease token no longer settles anything.
    assert!(queue.ack(&first[0]).await.is_err());
    assert!(queue.fail(&first[0]).await.is_err());

    // The current lease holder still can.
    queue.ack(&second[0]).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_lease_expiry_on_final_attempt_dead_letters() {
    let queue = InMemoryQueue::new(3, Duration::from_secs(30), Duration::ZERO);
    queue
        .enqueue(Envelope::outbound("alice", "c1", "hello"))
        .await
        .unwrap();

    for _ in 0..3 {
        let batch = queue.dequeue_batch(1).await.unwrap();
        assert_eq!(batch.len(), 1);
        tokio::time::advance(Duration::from_secs(31)).await;
    }

    // The third lease expired with the ceiling reached.
    assert!(queue.dequeue_batch(10).await.unwrap().is_empty());
    assert_eq!(queue.depth().await.unwrap().dead_lettered, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_backoff_delays_visibility() {
    let queue = InMemoryQueue::new(3, Duration::from_secs(30), Duration::from_secs(5));
    queue
        .enqueue(Envelope::outbound("alice", "c1", "hello"))
        .await
        .unwrap();

    let batch = queue.dequeue_batch(1).await.unwrap();
    assert_eq!(queue.fail(&batch[0]).await.unwrap(), FailOutcome::Requeued);

    // Not visible until the backoff elapses.
    assert!(queue.dequeue_batch(10).await.unwrap().is_empty());

    tokio::time::advance(Duration::from_secs(6)).await;

    let batch = queue.dequeue_batch(10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].attempts, 2);
}

#[tokio::test]
async fn test_batch_claim_respects_max() {
    let queue = test_queue();
    for i in 0..5 {
        queue
            .enqueue(Envelope::outbound("alice", "c1", &format!("m{}", i)))
            .await
            .unwrap();
    }

    let batch = queue.dequeue_batch(3).await.unwrap();
    assert_eq!(batch.len(), 3);

    let rest = queue.dequeue_batch(10).await.unwrap();
    assert_eq!(rest.len(), 2);

    // FIFO across claims.
    assert_eq!(batch[0].envelope.body, "m0");
    assert_eq!(rest[1].envelope.body, "m4");
}
