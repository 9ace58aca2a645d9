// ============================================================================
// Ingress Adapter
// ============================================================================
//
// Receives a raw inbound message, validates and normalizes it into an
// envelope, and publishes it to the bus. Publish is fire-and-forget: the
// acknowledgment means "an envelope was published", never "the message was
// delivered". On validation failure nothing is published - no partial side
// effects. The same contract applies symmetrically when the chat-processing
// collaborator publishes Out-direction responses.
//
// ============================================================================

use crate::bus::MessageBus;
use crate::config::MAX_MESSAGE_BODY_SIZE;
use crate::error::{AppError, AppResult};
use crate::message::Envelope;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Normalized inbound request: the output of the client-facing transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundRequest {
    pub connection_id: String,
    pub body: String,
}

/// Out-direction publish request from the chat-processing collaborator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundRequest {
    pub user_id: String,
    pub connection_id: String,
    pub body: String,
}

/// Synchronous acknowledgment that an envelope was published.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub message_id: String,
}

pub struct IngressAdapter {
    bus: Arc<MessageBus>,
}

impl IngressAdapter {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus }
    }

    /// Accept a client-to-backend message from an authenticated principal.
    pub async fn accept(&self, principal: &str, request: InboundRequest) -> AppResult<Ack> {
        if principal.is_empty() {
            return Err(AppError::validation("missing authenticated principal"));
        }
        if request.connection_id.is_empty() {
            return Err(AppError::validation("connectionId must not be empty"));
        }
        if request.body.is_empty() {
            return Err(AppError::validation("body must not be empty"));
        }
        if request.body.len() > MAX_MESSAGE_BODY_SIZE {
            return Err(AppError::validation(format!(
                "body exceeds {} bytes",
                MAX_MESSAGE_BODY_SIZE
            )));
        }

        let envelope = Envelope::inbound(principal, &request.connection_id, &request.body);
        self.publish(envelope).await
    }

    /// Publish a backend-to-client response on behalf of the
    /// chat-processing collaborator.
    pub async fn publish_response(&self, request: OutboundRequest) -> AppResult<Ack> {
        if request.user_id.is_empty() {
            return Err(AppError::validation("userId must not be empty"));
        }
        if request.connection_id.is_empty() {
            return Err(AppError::validation("connectionId must not be empty"));
        }
        if request.body.is_empty() {
            return Err(AppError::validation("body must not be empty"));
        }
        if request.body.len() > MAX_MESSAGE_BODY_SIZE {
            return Err(AppError::validation(format!(
                "body exceeds {} bytes",
                MAX_MESSAGE_BODY_SIZE
            )));
        }

        let envelope = Envelope::outbound(&request.user_id, &request.connection_id, &request.body);
        self.publish(envelope).await
    }

    async fn publish(&self, envelope: Envelope) -> AppResult<Ack> {
        envelope
            .validate()
            .map_err(|e| AppError::validation(e.to_string()))?;

        let message_id = envelope.message_id.clone();
        let dispatched = self.bus.publish(&envelope).await;

        info!(
            message_id = %message_id,
            direction = ?envelope.direction,
            dispatched = dispatched,
            "Envelope accepted and published"
        );

        Ok(Ack { message_id })
    }
}
