// Standalone egress worker: drains the shared Redis delivery queue and
// pushes envelopes to the GraphQL endpoint that owns the live connections.
// Runs apart from the relay server so the delivery fleet scales on its own.

use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_relay::config::{Config, QueueBackend};
use chat_relay::delivery_worker::EgressWorker;
use chat_relay::queue::{DeliveryQueue, RedisDeliveryQueue};
use chat_relay::transport::{GraphqlTransport, OutboundTransport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    if config.queue.backend != QueueBackend::Redis {
        error!("Standalone egress workers require QUEUE_BACKEND=redis");
        return Err("standalone egress workers require the Redis queue backend".into());
    }

    let graphql_url = config.transport.graphql_url.as_deref().ok_or(
        "GRAPHQL_URL must be set: standalone workers have no in-process registry to push to",
    )?;

    let queue: Arc<dyn DeliveryQueue> =
        Arc::new(RedisDeliveryQueue::connect(&config.queue).await?);
    let transport: Arc<dyn OutboundTransport> =
        Arc::new(GraphqlTransport::new(graphql_url, &config.transport)?);

    info!(
        endpoint = %graphql_url,
        count = config.worker.count,
        "Starting standalone egress workers"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::with_capacity(config.worker.count);
    for worker_id in 0..config.worker.count {
        let worker = EgressWorker::new(
            worker_id,
            queue.clone(),
            transport.clone(),
            &config.worker,
            config.logging.clone(),
        );
        handles.push(tokio::spawn(worker.run(shutdown_rx.clone())));
    }

    signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping egress workers...");

    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}
