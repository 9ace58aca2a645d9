use crate::config::LoggingConfig;
use crate::error::AppResult;
use crate::metrics;
use crate::queue::{DeliveryQueue, FailOutcome, QueueEntry};
use crate::transport::OutboundTransport;
use crate::utils::log_safe_id;
use tracing::{debug, error, info, warn};

/// Result of processing one leased queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    /// Transport push succeeded; the entry was acked and removed.
    Delivered,
    /// Transport push failed; the entry was returned for redelivery.
    Retrying,
    /// Transport push failed on the final attempt; the entry moved to the
    /// dead letter sink.
    DeadLettered,
}

/// Deliver one leased entry and settle it with the queue.
///
/// Any transport error - including "no live connection" - counts as a
/// failed attempt. Settlement can itself fail when the lease expired while
/// the transport call was in flight; that error propagates so the caller
/// can log it, and the redelivered entry is handled by whichever worker
/// holds the new lease.
pub async fn process_entry(
    queue: &dyn DeliveryQueue,
    transport: &dyn OutboundTransport,
    entry: &QueueEntry,
    logging: &LoggingConfig,
) -> AppResult<ProcessResult> {
    let envelope = &entry.envelope;
    let user_ref = if logging.enable_user_identifiers {
        envelope.user_id.clone()
    } else {
        log_safe_id(&envelope.user_id, &logging.hash_salt)
    };

    debug!(
        message_id = %envelope.message_id,
        user = %user_ref,
        attempt = entry.attempts,
        "Processing queue entry"
    );

    let start = std::time::Instant::now();

    match transport.send_to_client(envelope).await {
        Ok(()) => {
            queue.ack(entry).await?;

            metrics::DELIVERIES_TOTAL.inc();
            metrics::DELIVERY_TIME.observe(start.elapsed().as_secs_f64());

            info!(
                message_id = %envelope.message_id,
                user = %user_ref,
                attempt = entry.attempts,
                "Envelope delivered and acked"
            );
            Ok(ProcessResult::Delivered)
        }
        Err(transport_err) => {
            metrics::DELIVERY_FAILURES_TOTAL.inc();

            match queue.fail(entry).await? {
                FailOutcome::Requeued => {
                    warn!(
                        message_id = %envelope.message_id,
                        user = %user_ref,
                        attempt = entry.attempts,
                        error = %transport_err,
                        "Delivery failed, entry requeued"
                    );
                    Ok(ProcessResult::Retrying)
                }
                FailOutcome::DeadLettered => {
                    error!(
                        message_id = %envelope.message_id,
                        user = %user_ref,
                        attempts = entry.attempts,
                        error = %transport_err,
                        "Delivery attempts exhausted, entry dead-lettered"
                    );
                    Ok(ProcessResult::DeadLettered)
                }
            }
        }
    }
}
