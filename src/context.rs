use crate::bus::MessageBus;
use crate::config::Config;
use crate::ingress::IngressAdapter;
use crate::queue::DeliveryQueue;
use crate::registry::SubscriptionRegistry;
use std::sync::Arc;

/// Shared application context passed to every HTTP connection task.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub bus: Arc<MessageBus>,
    pub queue: Arc<dyn DeliveryQueue>,
    pub registry: Arc<SubscriptionRegistry>,
    pub ingress: Arc<IngressAdapter>,
}

impl AppContext {
    pub fn new(
        config: Arc<Config>,
        bus: Arc<MessageBus>,
        queue: Arc<dyn DeliveryQueue>,
        registry: Arc<SubscriptionRegistry>,
        ingress: Arc<IngressAdapter>,
    ) -> Self {
        Self {
            config,
            bus,
            queue,
            registry,
            ingress,
        }
    }
}
