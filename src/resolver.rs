// ============================================================================
// Resolver Pipeline
// ============================================================================
//
// A single logical "deliver to client" call fans out to many live
// subscriptions through an ordered list of stages, each given the output of
// the previous one. The standard pipeline is two stages: a pass-through
// transform that re-emits the envelope unchanged, then an identity filter
// that yields the envelope only to the subscriber whose (user_id,
// connection_id) match. This keeps the durable delivery path and the
// live-fanout path decoupled: the worker knows only the identifiers, the
// registry knows nothing about retries or dead-lettering.
//
// ============================================================================

use crate::message::Envelope;
use crate::registry::ClientKey;

/// One stage of the fan-out pipeline.
///
/// Returning `None` silently drops the envelope for that subscriber only.
/// Not an error: many subscribers coexist and only the matching one acts.
pub trait ResolverStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&self, envelope: Envelope, subscriber: &ClientKey) -> Option<Envelope>;
}

/// No-op transform stage: re-emits the envelope unchanged.
pub struct PassthroughStage;

impl ResolverStage for PassthroughStage {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn resolve(&self, envelope: Envelope, _subscriber: &ClientKey) -> Option<Envelope> {
        Some(envelope)
    }
}

/// Identity filter stage: the envelope must carry the subscriber's own
/// (user_id, connection_id) to pass.
pub struct IdentityFilterStage;

impl ResolverStage for IdentityFilterStage {
    fn name(&self) -> &'static str {
        "identity_filter"
    }

    fn resolve(&self, envelope: Envelope, subscriber: &ClientKey) -> Option<Envelope> {
        let (user_id, connection_id) = subscriber;
        if envelope.user_id == *user_id && envelope.connection_id == *connection_id {
            Some(envelope)
        } else {
            None
        }
    }
}

/// Ordered chain of resolver stages.
pub struct ResolverPipeline {
    stages: Vec<Box<dyn ResolverStage>>,
}

impl ResolverPipeline {
    pub fn new(stages: Vec<Box<dyn ResolverStage>>) -> Self {
        Self { stages }
    }

    /// The production pipeline: pass-through, then identity filter.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(PassthroughStage),
            Box::new(IdentityFilterStage),
        ])
    }

    /// Run the envelope through every stage for one subscriber.
    pub fn resolve(&self, envelope: Envelope, subscriber: &ClientKey) -> Option<Envelope> {
        let mut current = envelope;
        for stage in &self.stages {
            match stage.resolve(current, subscriber) {
                Some(next) => current = next,
                None => {
                    tracing::trace!(
                        stage = stage.name(),
                        user_id = %subscriber.0,
                        connection_id = %subscriber.1,
                        "Resolver stage dropped envelope for subscriber"
                    );
                    return None;
                }
            }
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(user: &str, conn: &str) -> ClientKey {
        (user.to_string(), conn.to_string())
    }

    #[test]
    fn test_passthrough_reemits_unchanged() {
        let envelope = Envelope::outbound("alice", "c1", "hi");
        let resolved = PassthroughStage
            .resolve(envelope.clone(), &key("bob", "c2"))
            .unwrap();

        assert_eq!(resolved.message_id, envelope.message_id);
        assert_eq!(resolved.body, "hi");
    }

    #[test]
    fn test_identity_filter_matches_own_key_only() {
        let envelope = Envelope::outbound("alice", "c1", "hi");

        assert!(IdentityFilterStage
            .resolve(envelope.clone(), &key("alice", "c1"))
            .is_some());
        assert!(IdentityFilterStage
            .resolve(envelope.clone(), &key("alice", "c2"))
            .is_none());
        assert!(IdentityFilterStage
            .resolve(envelope, &key("bob", "c1"))
            .is_none());
    }

    #[test]
    fn test_standard_pipeline_chains_stages() {
        let pipeline = ResolverPipeline::standard();
        let envelope = Envelope::outbound("alice", "c1", "hi");

        let resolved = pipeline.resolve(envelope.clone(), &key("alice", "c1"));
        assert_eq!(resolved.unwrap().body, "hi");

        assert!(pipeline.resolve(envelope, &key("bob", "c2")).is_none());
    }
}
