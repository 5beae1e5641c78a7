//! Subscription lifecycle: create, update, rotate, list, delete.
//!
//! All validation happens here, so handler code stays thin and the rules
//! hold for any caller, not just the HTTP surface.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::crypto;
use crate::error::WebhookError;
use crate::models::{
    CreateWebhookSubscription, UpdateWebhookSubscription, WebhookSubscription,
};
use crate::store::{DeliveryFilter, WebhookStore};
use crate::validation;

/// Default cap on subscriptions per tenant.
pub const MAX_SUBSCRIPTIONS_PER_TENANT: i64 = 25;

pub struct SubscriptionService {
    store: Arc<dyn WebhookStore>,
    encryption_key: Vec<u8>,
    max_subscriptions: i64,
    /// Permit plain-HTTP endpoints (dev/test only).
    allow_http: bool,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn WebhookStore>, encryption_key: Vec<u8>) -> Self {
        Self {
            store,
            encryption_key,
            max_subscriptions: MAX_SUBSCRIPTIONS_PER_TENANT,
            allow_http: false,
        }
    }

    pub fn with_max_subscriptions(mut self, max: i64) -> Self {
        self.max_subscriptions = max;
        self
    }

    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Create a subscription and return it with the plaintext signing secret.
    ///
    /// The plaintext secret exists only in this return value; the store keeps
    /// the encrypted form and no read path ever decrypts it for display.
    pub async fn create(
        &self,
        tenant_id: Uuid,
        url: String,
        event_types: Vec<String>,
    ) -> Result<(WebhookSubscription, String), WebhookError> {
        validation::validate_webhook_url(&url, self.allow_http)?;
        if event_types.is_empty() {
            return Err(WebhookError::Validation(
                "At least one event type is required".to_string(),
            ));
        }
        validation::validate_event_types(&event_types)?;

        let count = self.store.count_subscriptions(tenant_id, None).await?;
        if count >= self.max_subscriptions {
            return Err(WebhookError::SubscriptionLimitExceeded {
                limit: self.max_subscriptions,
            });
        }

        let secret = crypto::generate_secret();
        let secret_encrypted = crypto::encrypt_secret(&secret, &self.encryption_key)?;

        let subscription = self
            .store
            .create_subscription(CreateWebhookSubscription {
                tenant_id,
                url,
                secret_encrypted,
                event_types,
            })
            .await?;

        info!(
            target: "webhook_subscriptions",
            %tenant_id,
            subscription_id = %subscription.id,
            "Webhook subscription created"
        );

        Ok((subscription, secret))
    }

    pub async fn get(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<WebhookSubscription, WebhookError> {
        self.store
            .find_subscription_for_tenant(tenant_id, id)
            .await?
            .ok_or(WebhookError::SubscriptionNotFound)
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
        is_active: Option<bool>,
    ) -> Result<(Vec<WebhookSubscription>, i64), WebhookError> {
        let limit = limit.clamp(1, 100);
        let offset = offset.max(0);
        let items = self
            .store
            .list_subscriptions(tenant_id, limit, offset, is_active)
            .await?;
        let total = self.store.count_subscriptions(tenant_id, is_active).await?;
        Ok((items, total))
    }

    /// Apply a partial update. Re-enabling a subscription resets its
    /// consecutive-failure counter so it does not re-disable on the first
    /// hiccup after recovery.
    pub async fn update(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        input: UpdateWebhookSubscription,
    ) -> Result<WebhookSubscription, WebhookError> {
        if let Some(url) = &input.url {
            validation::validate_webhook_url(url, self.allow_http)?;
        }
        if let Some(event_types) = &input.event_types {
            if event_types.is_empty() {
                return Err(WebhookError::Validation(
                    "At least one event type is required".to_string(),
                ));
            }
            validation::validate_event_types(event_types)?;
        }

        let existing = self
            .store
            .find_subscription_for_tenant(tenant_id, id)
            .await?
            .ok_or(WebhookError::SubscriptionNotFound)?;

        let reactivating = input.is_active == Some(true) && !existing.is_active;

        let updated = self
            .store
            .update_subscription(tenant_id, id, input)
            .await?
            .ok_or(WebhookError::SubscriptionNotFound)?;

        if reactivating {
            self.store.reset_consecutive_failures(id).await?;
            info!(
                target: "webhook_subscriptions",
                %tenant_id,
                subscription_id = %id,
                "Subscription re-enabled; failure counter reset"
            );
            // Refetch so the response reflects the reset.
            return self
                .store
                .find_subscription_for_tenant(tenant_id, id)
                .await?
                .ok_or(WebhookError::SubscriptionNotFound);
        }

        Ok(updated)
    }

    /// Generate a fresh signing secret, replacing the old one immediately.
    ///
    /// Returns the new plaintext secret, visible once. Deliveries in flight
    /// that were signed with the old secret are not re-signed.
    pub async fn rotate_secret(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<String, WebhookError> {
        let secret = crypto::generate_secret();
        let secret_encrypted = crypto::encrypt_secret(&secret, &self.encryption_key)?;

        let updated = self
            .store
            .set_subscription_secret(tenant_id, id, &secret_encrypted)
            .await?;
        if !updated {
            return Err(WebhookError::SubscriptionNotFound);
        }

        info!(
            target: "webhook_subscriptions",
            %tenant_id,
            subscription_id = %id,
            "Signing secret rotated"
        );

        Ok(secret)
    }

    /// Remove a subscription. A subscription that has delivery history is
    /// deactivated instead of removed, so the log rows keep a valid parent;
    /// only a subscription that never delivered is physically deleted.
    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<(), WebhookError> {
        let existing = self
            .store
            .find_subscription_for_tenant(tenant_id, id)
            .await?
            .ok_or(WebhookError::SubscriptionNotFound)?;

        let history = self
            .store
            .count_deliveries(
                tenant_id,
                &DeliveryFilter {
                    subscription_id: Some(id),
                    ..Default::default()
                },
            )
            .await?;
        if history > 0 {
            self.store.disable_subscription(existing.id).await?;
            info!(
                target: "webhook_subscriptions",
                %tenant_id,
                subscription_id = %id,
                delivery_rows = history,
                "Subscription deactivated; delivery history retained"
            );
            return Ok(());
        }

        let deleted = self.store.delete_subscription(tenant_id, id).await?;
        if !deleted {
            return Err(WebhookError::SubscriptionNotFound);
        }
        info!(
            target: "webhook_subscriptions",
            %tenant_id,
            subscription_id = %id,
            "Webhook subscription deleted"
        );
        Ok(())
    }
}
