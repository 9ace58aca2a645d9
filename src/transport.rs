// ============================================================================
// Outbound Transport
// ============================================================================
//
// The narrow interface the egress worker pushes through. Delivery is
// at-least-once: a transport call must be safely repeatable, the envelope's
// message_id is the client-side dedupe handle.
//
// ============================================================================

use crate::config::TransportConfig;
use crate::error::{AppError, AppResult};
use crate::message::Envelope;
use crate::registry::SubscriptionRegistry;
use crate::resolver::ResolverPipeline;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait OutboundTransport: Send + Sync {
    /// Push an envelope to the client connection it addresses.
    ///
    /// Errors on any failure, including "no such live connection"; the
    /// caller decides whether that means retry or dead-letter.
    async fn send_to_client(&self, envelope: &Envelope) -> AppResult<()>;
}

/// In-process transport: resolves the addressing pair against the
/// subscription registry and fans out through the resolver pipeline.
pub struct RegistryTransport {
    registry: Arc<SubscriptionRegistry>,
    pipeline: ResolverPipeline,
}

impl RegistryTransport {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            registry,
            pipeline: ResolverPipeline::standard(),
        }
    }
}

#[async_trait]
impl OutboundTransport for RegistryTransport {
    async fn send_to_client(&self, envelope: &Envelope) -> AppResult<()> {
        let delivered = self.registry.deliver(envelope, &self.pipeline).await;

        if delivered == 0 {
            return Err(AppError::transport(format!(
                "no live subscription for connection {}",
                envelope.connection_id
            )));
        }

        debug!(
            message_id = %envelope.message_id,
            delivered = delivered,
            "Envelope pushed to live subscription(s)"
        );
        Ok(())
    }
}

const SEND_MESSAGE_TO_CLIENT_MUTATION: &str = "\
mutation SendMessageToClient($userId: String!, $connectionId: String!, $body: String!) {
  sendMessageToClient(userId: $userId, connectionId: $connectionId, body: $body) {
    userId
    connectionId
    body
  }
}";

/// HTTP transport: delivers by invoking the `sendMessageToClient` mutation
/// on a remote GraphQL endpoint. Used by standalone egress workers that run
/// apart from the process holding the live connections.
pub struct GraphqlTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl GraphqlTransport {
    pub fn new(endpoint: &str, config: &TransportConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: config.graphql_api_key.clone(),
        })
    }
}

#[async_trait]
impl OutboundTransport for GraphqlTransport {
    async fn send_to_client(&self, envelope: &Envelope) -> AppResult<()> {
        let payload = serde_json::json!({
            "query": SEND_MESSAGE_TO_CLIENT_MUTATION,
            "variables": {
                "userId": envelope.user_id,
                "connectionId": envelope.connection_id,
                "body": envelope.body,
            },
        });

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::transport(format!(
                "GraphQL endpoint returned {}",
                status
            )));
        }

        let body: serde_json::Value = response.json().await?;
        if let Some(errors) = body.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                return Err(AppError::transport(format!(
                    "sendMessageToClient mutation failed: {}",
                    errors[0]
                )));
            }
        }

        debug!(
            message_id = %envelope.message_id,
            "Envelope delivered via GraphQL mutation"
        );
        Ok(())
    }
}
