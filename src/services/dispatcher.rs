//! Event fan-out: resolves which subscriptions listen for an event and
//! launches one detached delivery per match.

use std::sync::Arc;

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::WebhookError;
use crate::events;
use crate::models::WebhookEnvelope;
use crate::services::DeliveryService;
use crate::store::WebhookStore;

/// Fans a domain event out to every matching subscription of a tenant.
///
/// Fire-and-forget: `trigger` returns as soon as the deliveries are spawned,
/// so emitting a webhook never adds latency to the business operation that
/// produced the event. Delivery failures are observable only through the
/// delivery log.
pub struct EventDispatcher {
    store: Arc<dyn WebhookStore>,
    delivery: Arc<DeliveryService>,
}

impl EventDispatcher {
    pub fn new(store: Arc<dyn WebhookStore>, delivery: Arc<DeliveryService>) -> Self {
        Self { store, delivery }
    }

    /// Trigger webhook deliveries for a domain event.
    ///
    /// Unknown event types are logged and dropped rather than surfaced to the
    /// caller: a typo at an emit site must not break the business operation.
    pub async fn trigger(&self, tenant_id: Uuid, event_type: &str, data: serde_json::Value) {
        if !events::is_valid_event_type(event_type) {
            warn!(
                target: "webhook_dispatch",
                %tenant_id,
                event_type,
                "Ignoring trigger for unknown event type"
            );
            return;
        }

        let subscriptions = match self
            .store
            .find_active_subscriptions(tenant_id, event_type)
            .await
        {
            Ok(subs) => subs,
            Err(e) => {
                error!(
                    target: "webhook_dispatch",
                    %tenant_id,
                    event_type,
                    error = %e,
                    "Failed to look up subscriptions for event"
                );
                return;
            }
        };

        if subscriptions.is_empty() {
            debug!(
                target: "webhook_dispatch",
                %tenant_id,
                event_type,
                "No active subscriptions for event"
            );
            return;
        }

        // Serialize once; every subscriber and every retry signs and sends
        // these exact bytes.
        let envelope = WebhookEnvelope::new(event_type, data);
        let payload = match serde_json::to_string(&envelope) {
            Ok(p) => p,
            Err(e) => {
                error!(
                    target: "webhook_dispatch",
                    %tenant_id,
                    event_type,
                    error = %e,
                    "Failed to serialize event envelope"
                );
                return;
            }
        };

        debug!(
            target: "webhook_dispatch",
            %tenant_id,
            event_type,
            subscriptions = subscriptions.len(),
            "Dispatching event"
        );

        for subscription in subscriptions {
            let delivery = Arc::clone(&self.delivery);
            let event_type = envelope.event.clone();
            let payload = payload.clone();
            let subscription_id = subscription.id;

            // One detached task per subscriber isolates failures: a hanging
            // endpoint cannot delay its neighbors.
            tokio::spawn(async move {
                if let Err(e) = delivery
                    .deliver(subscription_id, &event_type, &payload, 1)
                    .await
                {
                    error!(
                        target: "webhook_dispatch",
                        %subscription_id,
                        event_type,
                        error = %e,
                        "Delivery task failed"
                    );
                }
            });
        }
    }

    /// Trigger using a typed registry entry instead of a raw string.
    pub async fn trigger_event(
        &self,
        tenant_id: Uuid,
        event_type: events::WebhookEventType,
        data: serde_json::Value,
    ) {
        self.trigger(tenant_id, event_type.as_str(), data).await;
    }

    /// Shared store handle, for callers wiring the dispatcher into an
    /// application state.
    pub fn store(&self) -> Arc<dyn WebhookStore> {
        Arc::clone(&self.store)
    }
}

// Dispatcher behavior is covered by the integration tests, which assert
// fan-out counts and isolation against live mock endpoints.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryWebhookStore;

    #[tokio::test]
    async fn test_trigger_unknown_event_is_dropped() {
        let store: Arc<dyn WebhookStore> = Arc::new(MemoryWebhookStore::new());
        let delivery =
            Arc::new(DeliveryService::new(Arc::clone(&store), vec![0x42; 32]).expect("client"));
        let dispatcher = EventDispatcher::new(Arc::clone(&store), delivery);

        dispatcher
            .trigger(Uuid::new_v4(), "pet.exploded", serde_json::json!({}))
            .await;

        // No subscriptions exist, so nothing to assert beyond not panicking;
        // the registry check rejects before any store access.
    }
}
