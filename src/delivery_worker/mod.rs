// ============================================================================
// Egress Worker
// ============================================================================
//
// Pulls leased batches from the delivery queue and pushes each envelope
// through the outbound transport. Workers scale horizontally with no
// coordination beyond the queue's lease discipline; a crashed worker loses
// nothing because its leases expire and peers reclaim the entries.
//
// ============================================================================

pub mod processor;

pub use processor::{process_entry, ProcessResult};

use crate::config::{LoggingConfig, WorkerConfig};
use crate::error::AppResult;
use crate::queue::DeliveryQueue;
use crate::transport::OutboundTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct EgressWorker {
    id: usize,
    queue: Arc<dyn DeliveryQueue>,
    transport: Arc<dyn OutboundTransport>,
    batch_size: usize,
    poll_interval: Duration,
    logging: LoggingConfig,
}

impl EgressWorker {
    pub fn new(
        id: usize,
        queue: Arc<dyn DeliveryQueue>,
        transport: Arc<dyn OutboundTransport>,
        config: &WorkerConfig,
        logging: LoggingConfig,
    ) -> Self {
        Self {
            id,
            queue,
            transport,
            batch_size: config.batch_size,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            logging,
        }
    }

    /// Run until the shutdown signal flips. There is no mid-flight
    /// cancellation of an in-progress delivery; the lease timeout is the
    /// only control.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = self.id, "Egress worker started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(worker_id = self.id, "Egress worker shutting down");
                    break;
                }
                result = self.process_batch() => {
                    match result {
                        Ok(0) => tokio::time::sleep(self.poll_interval).await,
                        Ok(_) => {}
                        Err(e) => {
                            error!(
                                worker_id = self.id,
                                error = %e,
                                "Batch processing failed"
                            );
                            tokio::time::sleep(self.poll_interval).await;
                        }
                    }
                }
            }
        }
    }

    /// Claim and process one batch. Per-entry failures are isolated: one
    /// bad entry never stops the rest of the batch.
    pub async fn process_batch(&self) -> AppResult<usize> {
        let batch = self.queue.dequeue_batch(self.batch_size).await?;
        let claimed = batch.len();

        for entry in &batch {
            if let Err(e) = process_entry(
                self.queue.as_ref(),
                self.transport.as_ref(),
                entry,
                &self.logging,
            )
            .await
            {
                warn!(
                    worker_id = self.id,
                    error = %e,
                    message_id = %entry.envelope.message_id,
                    "Entry processing failed"
                );
            }
        }

        Ok(claimed)
    }
}
