use anyhow::Result;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use std::convert::Infallible;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming as IncomingBody, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;

pub mod bus;
pub mod config;
pub mod context;
pub mod delivery_worker;
pub mod error;
pub mod health;
pub mod ingress;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod transport;
pub mod utils;

use bus::MessageBus;
use config::{Config, QueueBackend};
use context::AppContext;
use delivery_worker::EgressWorker;
use error::AppError;
use ingress::{InboundRequest, OutboundRequest};
use queue::{spawn_outbound_bridge, DeliveryQueue, InMemoryQueue, RedisDeliveryQueue};
use registry::SubscriptionRegistry;
use transport::{GraphqlTransport, OutboundTransport, RegistryTransport};

type HttpResult = Result<Response<Full<Bytes>>, Infallible>;

fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Ok(content_type) = "application/json".parse() {
        response.headers_mut().insert("content-type", content_type);
    }
    response
}

async fn read_body(req: Request<IncomingBody>) -> Result<Bytes, AppError> {
    let collected = req
        .into_body()
        .collect()
        .await
        .map_err(|e| AppError::validation(format!("failed to read request body: {}", e)))?;
    Ok(collected.to_bytes())
}

/// Accept a client message: `POST /v1/messages` with the authenticated
/// principal in `x-user-id` (real authentication lives at the edge, outside
/// the relay).
async fn handle_inbound(req: Request<IncomingBody>, ctx: &AppContext) -> Response<Full<Bytes>> {
    let principal = req
        .headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let result = async {
        let body = read_body(req).await?;
        let request: InboundRequest = serde_json::from_slice(&body)?;
        ctx.ingress.accept(&principal, request).await
    }
    .await;

    match result {
        Ok(ack) => match serde_json::to_vec(&ack) {
            Ok(json) => json_response(StatusCode::ACCEPTED, json),
            Err(e) => AppError::from(e).to_hyper_response(),
        },
        Err(e) => e.to_hyper_response(),
    }
}

/// Publish a backend response: `POST /v1/responses` from the
/// chat-processing collaborator.
async fn handle_outbound(req: Request<IncomingBody>, ctx: &AppContext) -> Response<Full<Bytes>> {
    let result = async {
        let body = read_body(req).await?;
        let request: OutboundRequest = serde_json::from_slice(&body)?;
        ctx.ingress.publish_response(request).await
    }
    .await;

    match result {
        Ok(ack) => match serde_json::to_vec(&ack) {
            Ok(json) => json_response(StatusCode::ACCEPTED, json),
            Err(e) => AppError::from(e).to_hyper_response(),
        },
        Err(e) => e.to_hyper_response(),
    }
}

async fn http_handler(req: Request<IncomingBody>, ctx: AppContext) -> HttpResult {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") => match health::health_check(ctx.queue.as_ref()).await {
            Ok(_) => plain_response(StatusCode::OK, "OK"),
            Err(e) => {
                tracing::error!("Health check failed: {}", e);
                plain_response(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
            }
        },
        (&Method::GET, "/metrics") => match metrics::gather_metrics() {
            Ok(metrics_data) => {
                let mut res = Response::new(Full::new(Bytes::from(metrics_data)));
                if let Ok(content_type) = "text/plain; version=0.0.4".parse() {
                    res.headers_mut().insert("Content-Type", content_type);
                }
                res
            }
            Err(e) => {
                tracing::error!("Failed to gather metrics: {}", e);
                plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        },
        (&Method::POST, "/v1/messages") => handle_inbound(req, &ctx).await,
        (&Method::POST, "/v1/responses") => handle_outbound(req, &ctx).await,
        _ => plain_response(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

pub async fn run_http_server(ctx: AppContext, listener: TcpListener) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let ctx = ctx.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| http_handler(req, ctx.clone()));

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Error serving HTTP connection: {:?}", err);
            }
        });
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env()?);

    // Message bus
    let bus = Arc::new(MessageBus::new());

    // Delivery queue backend
    let queue: Arc<dyn DeliveryQueue> = match config.queue.backend {
        QueueBackend::Memory => {
            tracing::info!("Using in-memory delivery queue");
            Arc::new(InMemoryQueue::from_config(&config.queue))
        }
        QueueBackend::Redis => {
            tracing::info!("Using Redis delivery queue");
            Arc::new(RedisDeliveryQueue::connect(&config.queue).await?)
        }
    };

    // Bus -> queue bridge: the one place direction routing is declared
    let bridge = spawn_outbound_bridge(&bus, queue.clone()).await;

    // Subscription registry and outbound transport
    let registry = Arc::new(SubscriptionRegistry::new());
    let transport: Arc<dyn OutboundTransport> = match &config.transport.graphql_url {
        Some(url) => {
            tracing::info!(endpoint = %url, "Using GraphQL outbound transport");
            Arc::new(GraphqlTransport::new(url, &config.transport)?)
        }
        None => {
            tracing::info!("Using in-process registry outbound transport");
            Arc::new(RegistryTransport::new(registry.clone()))
        }
    };

    // Egress workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    for worker_id in 0..config.worker.count {
        let worker = EgressWorker::new(
            worker_id,
            queue.clone(),
            transport.clone(),
            &config.worker,
            config.logging.clone(),
        );
        tokio::spawn(worker.run(shutdown_rx.clone()));
    }
    tracing::info!(count = config.worker.count, "Egress workers started");

    // HTTP surface: ingress + health + metrics
    let bind_address = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!("Relay server listening on http://{}", bind_address);

    let ingress = Arc::new(ingress::IngressAdapter::new(bus.clone()));
    let ctx = AppContext::new(config.clone(), bus.clone(), queue.clone(), registry, ingress);

    tokio::select! {
        res = run_http_server(ctx, listener) => {
            if let Err(e) = res {
                tracing::error!("HTTP server failed: {}", e);
            }
        },
        _ = signal::ctrl_c() => {
            tracing::info!("Shutdown signal received. Shutting down...");
        }
    }

    bridge.unsubscribe().await;
    let _ = shutdown_tx.send(true);

    Ok(())
}
