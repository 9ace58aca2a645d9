use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Direction of a message flowing through the relay.
///
/// Set exactly once when the envelope is created at ingress and never
/// mutated downstream. All direction-based routing keys off this tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    /// Client to backend.
    #[serde(rename = "IN")]
    In,

    /// Backend to client.
    #[serde(rename = "OUT")]
    Out,
}

/// Normalized message envelope carrying direction, addressing and payload.
///
/// Serialized to JSON on the wire and to MessagePack inside the delivery
/// queue. `(user_id, connection_id)` together form the addressing key for
/// all Out-direction deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique message ID (UUID v4). Clients dedupe redeliveries on this.
    pub message_id: String,

    /// Routing direction, immutable after creation.
    pub direction: Direction,

    /// Authenticated principal that owns the conversation.
    pub user_id: String,

    /// The specific live client connection. A user may hold several
    /// simultaneous connections; delivery targets exactly one.
    pub connection_id: String,

    /// Opaque payload. The relay never inspects it beyond direction tagging.
    pub body: String,

    /// Unix timestamp in seconds at envelope creation.
    pub timestamp: i64,
}

impl Envelope {
    fn new(direction: Direction, user_id: &str, connection_id: &str, body: &str) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            direction,
            user_id: user_id.to_string(),
            connection_id: connection_id.to_string(),
            body: body.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Create a client-to-backend envelope.
    pub fn inbound(user_id: &str, connection_id: &str, body: &str) -> Self {
        Self::new(Direction::In, user_id, connection_id, body)
    }

    /// Create a backend-to-client envelope.
    pub fn outbound(user_id: &str, connection_id: &str, body: &str) -> Self {
        Self::new(Direction::Out, user_id, connection_id, body)
    }

    /// Validate envelope structure before publishing.
    pub fn validate(&self) -> Result<()> {
        if self.message_id.is_empty() {
            anyhow::bail!("message_id is required");
        }
        if self.user_id.is_empty() {
            anyhow::bail!("user_id is required");
        }
        if self.connection_id.is_empty() {
            anyhow::bail!("connection_id is required");
        }
        if self.body.is_empty() {
            anyhow::bail!("body is required");
        }

        Ok(())
    }
}
