//! Router wiring for the webhook API.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{deliveries, subscriptions};
use crate::services::{DeliveryService, SubscriptionService};
use crate::store::WebhookStore;

/// Shared state for the webhook routes.
#[derive(Clone)]
pub struct WebhooksState {
    pub subscriptions: Arc<SubscriptionService>,
    pub delivery: Arc<DeliveryService>,
    pub store: Arc<dyn WebhookStore>,
}

impl WebhooksState {
    pub fn new(
        subscriptions: Arc<SubscriptionService>,
        delivery: Arc<DeliveryService>,
        store: Arc<dyn WebhookStore>,
    ) -> Self {
        Self {
            subscriptions,
            delivery,
            store,
        }
    }
}

/// Build the webhook API router, nested under `/webhooks` by the host
/// application. Tenant auth middleware is the host's responsibility; every
/// route expects a `TenantId` request extension.
pub fn webhooks_router(state: WebhooksState) -> Router {
    Router::new()
        .route(
            "/webhooks/subscriptions",
            post(subscriptions::create_subscription).get(subscriptions::list_subscriptions),
        )
        .route(
            "/webhooks/subscriptions/{id}",
            get(subscriptions::get_subscription)
                .patch(subscriptions::update_subscription)
                .delete(subscriptions::delete_subscription),
        )
        .route(
            "/webhooks/subscriptions/{id}/test",
            post(subscriptions::test_subscription),
        )
        .route(
            "/webhooks/subscriptions/{id}/rotate-secret",
            post(subscriptions::rotate_secret),
        )
        .route(
            "/webhooks/event-types",
            get(subscriptions::list_event_types),
        )
        .route("/webhooks/deliveries", get(deliveries::list_deliveries))
        .route(
            "/webhooks/deliveries/{delivery_id}",
            get(deliveries::get_delivery),
        )
        .with_state(state)
}
