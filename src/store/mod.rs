//! Durable store for subscription and delivery-log records.
//!
//! The store is injected into the services as a trait object rather than
//! reached for as a process global, so the delivery engine can be exercised
//! against the in-memory implementation in tests.

mod memory;
mod postgres;

pub use memory::MemoryWebhookStore;
pub use postgres::PgWebhookStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::WebhookError;
use crate::models::{
    CreateWebhookDelivery, CreateWebhookSubscription, UpdateWebhookSubscription, WebhookDelivery,
    WebhookSubscription,
};

/// Filter for delivery-log listings.
#[derive(Debug, Clone, Default)]
pub struct DeliveryFilter {
    pub subscription_id: Option<Uuid>,
    pub event_type: Option<String>,
    pub status: Option<String>,
}

/// Persistence operations required by the webhook subsystem.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    // --- Subscriptions ---

    async fn create_subscription(
        &self,
        input: CreateWebhookSubscription,
    ) -> Result<WebhookSubscription, WebhookError>;

    /// Lookup by id alone; used by the delivery engine, which is handed a
    /// subscription id by the dispatcher or the retry worker.
    async fn find_subscription(
        &self,
        id: Uuid,
    ) -> Result<Option<WebhookSubscription>, WebhookError>;

    /// Tenant-scoped lookup; used by the configuration surface.
    async fn find_subscription_for_tenant(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookSubscription>, WebhookError>;

    async fn list_subscriptions(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
        is_active: Option<bool>,
    ) -> Result<Vec<WebhookSubscription>, WebhookError>;

    async fn count_subscriptions(
        &self,
        tenant_id: Uuid,
        is_active: Option<bool>,
    ) -> Result<i64, WebhookError>;

    /// Active subscriptions of a tenant whose event list contains the event
    /// type. Fan-out query.
    async fn find_active_subscriptions(
        &self,
        tenant_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<WebhookSubscription>, WebhookError>;

    async fn update_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        input: UpdateWebhookSubscription,
    ) -> Result<Option<WebhookSubscription>, WebhookError>;

    /// Returns false when the subscription does not exist for the tenant.
    async fn delete_subscription(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, WebhookError>;

    /// Replace the encrypted signing secret (rotation).
    async fn set_subscription_secret(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        secret_encrypted: &str,
    ) -> Result<bool, WebhookError>;

    /// Server-side atomic increment; returns the new counter value.
    async fn increment_consecutive_failures(&self, id: Uuid) -> Result<i32, WebhookError>;

    async fn reset_consecutive_failures(&self, id: Uuid) -> Result<(), WebhookError>;

    async fn disable_subscription(&self, id: Uuid) -> Result<(), WebhookError>;

    async fn mark_subscription_attempt(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), WebhookError>;

    /// Stamp last-success and reset the failure counter in one update.
    async fn mark_subscription_success(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), WebhookError>;

    // --- Delivery log ---

    /// Open a pending attempt row. Created before the HTTP call so a crash
    /// mid-call leaves a forensic record.
    async fn create_delivery(
        &self,
        input: CreateWebhookDelivery,
    ) -> Result<WebhookDelivery, WebhookError>;

    async fn mark_delivery_delivered(
        &self,
        id: Uuid,
        response_code: i16,
        response_body: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), WebhookError>;

    #[allow(clippy::too_many_arguments)]
    async fn mark_delivery_failed(
        &self,
        id: Uuid,
        response_code: Option<i16>,
        response_body: Option<&str>,
        error_message: &str,
        next_attempt_at: Option<DateTime<Utc>>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), WebhookError>;

    /// Atomically claim failed rows whose retry is due, clearing their
    /// `next_attempt_at` so each scheduled retry fires at most once.
    async fn claim_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WebhookDelivery>, WebhookError>;

    async fn list_deliveries(
        &self,
        tenant_id: Uuid,
        filter: &DeliveryFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookDelivery>, WebhookError>;

    async fn count_deliveries(
        &self,
        tenant_id: Uuid,
        filter: &DeliveryFilter,
    ) -> Result<i64, WebhookError>;

    async fn find_delivery(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookDelivery>, WebhookError>;
}
