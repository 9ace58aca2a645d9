// ============================================================================
// Egress Worker Tests
// ============================================================================
//
// At-least-once delivery through the worker's processing path: transient
// failure retries, attempt exhaustion and the run loop itself.
//
// ============================================================================

mod test_utils;

use chat_relay::config::{LoggingConfig, WorkerConfig};
use chat_relay::delivery_worker::{process_entry, EgressWorker, ProcessResult};
use chat_relay::message::Envelope;
use chat_relay::queue::DeliveryQueue;
use chat_relay::transport::OutboundTransport;
use std::sync::Arc;
use std::time::Duration;
use test_utils::{test_logging_config, test_queue, FailingTransport, FlakyTransport};
use tokio::sync::watch;

#[tokio::test]
async fn test_transient_failure_then_delivered_once() {
    let queue = test_queue();
    let transport = FlakyTransport::new(2);
    let logging = test_logging_config();

    queue
        .enqueue(Envelope::outbound("alice", "c1", "hello"))
        .await
        .unwrap();

    // Two failed attempts, then success on the third.
    for expected in [ProcessResult::Retrying, ProcessResult::Retrying] {
        let batch = queue.dequeue_batch(1).await.unwrap();
        let result = process_entry(&queue, &transport, &batch[0], &logging)
            .await
            .unwrap();
        assert_eq!(result, expected);
    }

    let batch = queue.dequeue_batch(1).await.unwrap();
    assert_eq!(batch[0].attempts, 3);
    let result = process_entry(&queue, &transport, &batch[0], &logging)
        .await
        .unwrap();
    assert_eq!(result, ProcessResult::Delivered);

    // Delivered exactly once; the queue is drained.
    assert_eq!(transport.delivered_count(), 1);
    let depth = queue.depth().await.unwrap();
    assert_eq!((depth.pending, depth.in_flight, depth.dead_lettered), (0, 0, 0));
}

#[tokio::test]
async fn test_exhausted_attempts_dead_letter() {
    let queue = test_queue();
    let transport = FailingTransport;
    let logging = test_logging_config();

    queue
        .enqueue(Envelope::outbound("alice", "c1", "poison"))
        .await
        .unwrap();

    let mut last = ProcessResult::Retrying;
    while let Some(entry) = queue.dequeue_batch(1).await.unwrap().into_iter().next() {
        last = process_entry(&queue, &transport, &entry, &logging)
            .await
            .unwrap();
    }

    assert_eq!(last, ProcessResult::DeadLettered);
    let dead = queue.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].envelope.body, "poison");
}

#[tokio::test]
async fn test_worker_run_loop_drains_queue_and_shuts_down() {
    let queue: Arc<dyn DeliveryQueue> = Arc::new(test_queue());
    let transport = Arc::new(FlakyTransport::new(0));

    for i in 0..5 {
        queue
            .enqueue(Envelope::outbound("alice", "c1", &format!("m{}", i)))
            .await
            .unwrap();
    }

    let config = WorkerConfig {
        count: 1,
        batch_size: 2,
        poll_interval_ms: 10,
    };
    let logging = LoggingConfig {
        enable_user_identifiers: true,
        hash_salt: "test-salt".to_string(),
    };

    let worker = EgressWorker::new(
        0,
        queue.clone(),
        transport.clone() as Arc<dyn OutboundTransport>,
        &config,
        logging,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    // Wait for the worker to drain everything.
    for _ in 0..100 {
        if transport.delivered_count() == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(transport.delivered_count(), 5);

    let depth = queue.depth().await.unwrap();
    assert_eq!((depth.pending, depth.in_flight), (0, 0));

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_one_bad_entry_does_not_stop_the_batch() {
    let queue: Arc<dyn DeliveryQueue> = Arc::new(test_queue());
    // First push fails, every later push succeeds.
    let transport = Arc::new(FlakyTransport::new(1));

    for i in 0..3 {
        queue
            .enqueue(Envelope::outbound("alice", "c1", &format!("m{}", i)))
            .await
            .unwrap();
    }

    let config = WorkerConfig {
        count: 1,
        batch_size: 10,
        poll_interval_ms: 10,
    };
    let worker = EgressWorker::new(
        0,
        queue.clone(),
        transport.clone() as Arc<dyn OutboundTransport>,
        &config,
        test_logging_config(),
    );

    let processed = worker.process_batch().await.unwrap();
    assert_eq!(processed, 3);

    // m1 and m2 delivered despite m0 failing; m0 is pending again.
    assert_eq!(transport.delivered_count(), 2);
    assert_eq!(queue.depth().await.unwrap().pending, 1);

    let retried = worker.process_batch().await.unwrap();
    assert_eq!(retried, 1);
    assert_eq!(transport.delivered_count(), 3);
}
