use crate::error::AppResult;
use crate::queue::DeliveryQueue;

pub async fn health_check(queue: &dyn DeliveryQueue) -> AppResult<()> {
    let depth = queue.depth().await?;
    tracing::debug!(
        pending = depth.pending,
        in_flight = depth.in_flight,
        dead_lettered = depth.dead_lettered,
        "Health check OK"
    );
    Ok(())
}
