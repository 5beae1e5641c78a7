//! In-memory store implementation.
//!
//! Used by the test suite and for embedded/dev scenarios. Counter updates
//! and retry claims happen under one lock, matching the atomicity the
//! Postgres implementation gets from single-statement updates.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{DeliveryFilter, WebhookStore};
use crate::error::WebhookError;
use crate::models::{
    CreateWebhookDelivery, CreateWebhookSubscription, DeliveryStatus, UpdateWebhookSubscription,
    WebhookDelivery, WebhookSubscription,
};

#[derive(Default)]
struct Inner {
    subscriptions: HashMap<Uuid, WebhookSubscription>,
    deliveries: HashMap<Uuid, WebhookDelivery>,
    /// Insertion order, newest-first listings walk this in reverse.
    delivery_order: Vec<Uuid>,
}

/// Mutex-guarded in-memory [`WebhookStore`].
#[derive(Default)]
pub struct MemoryWebhookStore {
    inner: Mutex<Inner>,
}

impl MemoryWebhookStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens if a holder panicked; propagate the data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn matches_filter(d: &WebhookDelivery, tenant_id: Uuid, filter: &DeliveryFilter) -> bool {
    d.tenant_id == tenant_id
        && filter
            .subscription_id
            .is_none_or(|id| d.subscription_id == id)
        && filter
            .event_type
            .as_deref()
            .is_none_or(|et| d.event_type == et)
        && filter.status.as_deref().is_none_or(|s| d.status == s)
}

#[async_trait]
impl WebhookStore for MemoryWebhookStore {
    async fn create_subscription(
        &self,
        input: CreateWebhookSubscription,
    ) -> Result<WebhookSubscription, WebhookError> {
        let now = Utc::now();
        let sub = WebhookSubscription {
            id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            url: input.url,
            secret_encrypted: input.secret_encrypted,
            is_active: true,
            event_types: input.event_types,
            consecutive_failures: 0,
            last_attempt_at: None,
            last_success_at: None,
            created_at: now,
            updated_at: now,
        };
        self.lock().subscriptions.insert(sub.id, sub.clone());
        Ok(sub)
    }

    async fn find_subscription(
        &self,
        id: Uuid,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        Ok(self.lock().subscriptions.get(&id).cloned())
    }

    async fn find_subscription_for_tenant(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        Ok(self
            .lock()
            .subscriptions
            .get(&id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_subscriptions(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
        is_active: Option<bool>,
    ) -> Result<Vec<WebhookSubscription>, WebhookError> {
        let inner = self.lock();
        let mut subs: Vec<WebhookSubscription> = inner
            .subscriptions
            .values()
            .filter(|s| s.tenant_id == tenant_id && is_active.is_none_or(|a| s.is_active == a))
            .cloned()
            .collect();
        subs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(subs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_subscriptions(
        &self,
        tenant_id: Uuid,
        is_active: Option<bool>,
    ) -> Result<i64, WebhookError> {
        Ok(self
            .lock()
            .subscriptions
            .values()
            .filter(|s| s.tenant_id == tenant_id && is_active.is_none_or(|a| s.is_active == a))
            .count() as i64)
    }

    async fn find_active_subscriptions(
        &self,
        tenant_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<WebhookSubscription>, WebhookError> {
        Ok(self
            .lock()
            .subscriptions
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.is_active && s.subscribes_to(event_type))
            .cloned()
            .collect())
    }

    async fn update_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        input: UpdateWebhookSubscription,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        let mut inner = self.lock();
        let Some(sub) = inner
            .subscriptions
            .get_mut(&id)
            .filter(|s| s.tenant_id == tenant_id)
        else {
            return Ok(None);
        };
        if let Some(url) = input.url {
            sub.url = url;
        }
        if let Some(event_types) = input.event_types {
            sub.event_types = event_types;
        }
        if let Some(is_active) = input.is_active {
            sub.is_active = is_active;
        }
        sub.updated_at = Utc::now();
        Ok(Some(sub.clone()))
    }

    async fn delete_subscription(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, WebhookError> {
        let mut inner = self.lock();
        let owned = inner
            .subscriptions
            .get(&id)
            .is_some_and(|s| s.tenant_id == tenant_id);
        if owned {
            inner.subscriptions.remove(&id);
        }
        Ok(owned)
    }

    async fn set_subscription_secret(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        secret_encrypted: &str,
    ) -> Result<bool, WebhookError> {
        let mut inner = self.lock();
        let Some(sub) = inner
            .subscriptions
            .get_mut(&id)
            .filter(|s| s.tenant_id == tenant_id)
        else {
            return Ok(false);
        };
        sub.secret_encrypted = secret_encrypted.to_string();
        sub.updated_at = Utc::now();
        Ok(true)
    }

    async fn increment_consecutive_failures(&self, id: Uuid) -> Result<i32, WebhookError> {
        let mut inner = self.lock();
        let sub = inner
            .subscriptions
            .get_mut(&id)
            .ok_or(WebhookError::SubscriptionNotFound)?;
        sub.consecutive_failures += 1;
        sub.updated_at = Utc::now();
        Ok(sub.consecutive_failures)
    }

    async fn reset_consecutive_failures(&self, id: Uuid) -> Result<(), WebhookError> {
        let mut inner = self.lock();
        if let Some(sub) = inner.subscriptions.get_mut(&id) {
            sub.consecutive_failures = 0;
            sub.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn disable_subscription(&self, id: Uuid) -> Result<(), WebhookError> {
        let mut inner = self.lock();
        if let Some(sub) = inner.subscriptions.get_mut(&id) {
            sub.is_active = false;
            sub.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_subscription_attempt(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        let mut inner = self.lock();
        if let Some(sub) = inner.subscriptions.get_mut(&id) {
            sub.last_attempt_at = Some(at);
            sub.updated_at = at;
        }
        Ok(())
    }

    async fn mark_subscription_success(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        let mut inner = self.lock();
        if let Some(sub) = inner.subscriptions.get_mut(&id) {
            sub.last_success_at = Some(at);
            sub.consecutive_failures = 0;
            sub.updated_at = at;
        }
        Ok(())
    }

    async fn create_delivery(
        &self,
        input: CreateWebhookDelivery,
    ) -> Result<WebhookDelivery, WebhookError> {
        let delivery = WebhookDelivery {
            id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            subscription_id: input.subscription_id,
            event_type: input.event_type,
            payload: input.payload,
            attempt_number: input.attempt_number,
            status: DeliveryStatus::Pending.as_str().to_string(),
            response_code: None,
            response_body: None,
            error_message: None,
            next_attempt_at: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        let mut inner = self.lock();
        inner.deliveries.insert(delivery.id, delivery.clone());
        inner.delivery_order.push(delivery.id);
        Ok(delivery)
    }

    async fn mark_delivery_delivered(
        &self,
        id: Uuid,
        response_code: i16,
        response_body: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        let mut inner = self.lock();
        if let Some(d) = inner.deliveries.get_mut(&id) {
            d.status = DeliveryStatus::Delivered.as_str().to_string();
            d.response_code = Some(response_code);
            d.response_body = response_body.map(str::to_string);
            d.completed_at = Some(completed_at);
        }
        Ok(())
    }

    async fn mark_delivery_failed(
        &self,
        id: Uuid,
        response_code: Option<i16>,
        response_body: Option<&str>,
        error_message: &str,
        next_attempt_at: Option<DateTime<Utc>>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        let mut inner = self.lock();
        if let Some(d) = inner.deliveries.get_mut(&id) {
            d.status = DeliveryStatus::Failed.as_str().to_string();
            d.response_code = response_code;
            d.response_body = response_body.map(str::to_string);
            d.error_message = Some(error_message.to_string());
            d.next_attempt_at = next_attempt_at;
            d.completed_at = Some(completed_at);
        }
        Ok(())
    }

    async fn claim_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        let mut inner = self.lock();
        let mut due: Vec<(DateTime<Utc>, Uuid)> = inner
            .deliveries
            .values()
            .filter(|d| d.status == DeliveryStatus::Failed.as_str())
            .filter_map(|d| {
                d.next_attempt_at
                    .filter(|at| *at <= now)
                    .map(|at| (at, d.id))
            })
            .collect();
        // Oldest due first, so a small batch cannot starve an overdue row.
        due.sort_by_key(|(at, _)| *at);
        due.truncate(limit.max(0) as usize);
        let due: Vec<Uuid> = due.into_iter().map(|(_, id)| id).collect();

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(d) = inner.deliveries.get_mut(&id) {
                d.next_attempt_at = None;
                claimed.push(d.clone());
            }
        }
        Ok(claimed)
    }

    async fn list_deliveries(
        &self,
        tenant_id: Uuid,
        filter: &DeliveryFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        let inner = self.lock();
        Ok(inner
            .delivery_order
            .iter()
            .rev()
            .filter_map(|id| inner.deliveries.get(id))
            .filter(|d| matches_filter(d, tenant_id, filter))
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count_deliveries(
        &self,
        tenant_id: Uuid,
        filter: &DeliveryFilter,
    ) -> Result<i64, WebhookError> {
        Ok(self
            .lock()
            .deliveries
            .values()
            .filter(|d| matches_filter(d, tenant_id, filter))
            .count() as i64)
    }

    async fn find_delivery(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookDelivery>, WebhookError> {
        Ok(self
            .lock()
            .deliveries
            .get(&id)
            .filter(|d| d.tenant_id == tenant_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub_input(tenant_id: Uuid) -> CreateWebhookSubscription {
        CreateWebhookSubscription {
            tenant_id,
            url: "https://example.com/hook".into(),
            secret_encrypted: "enc".into(),
            event_types: vec!["pet.created".into()],
        }
    }

    #[tokio::test]
    async fn test_subscription_crud_roundtrip() {
        let store = MemoryWebhookStore::new();
        let tenant = Uuid::new_v4();

        let sub = store.create_subscription(sub_input(tenant)).await.unwrap();
        assert!(sub.is_active);
        assert_eq!(sub.consecutive_failures, 0);

        let found = store
            .find_subscription_for_tenant(tenant, sub.id)
            .await
            .unwrap();
        assert!(found.is_some());

        // Wrong tenant sees nothing
        let other = store
            .find_subscription_for_tenant(Uuid::new_v4(), sub.id)
            .await
            .unwrap();
        assert!(other.is_none());

        assert!(store.delete_subscription(tenant, sub.id).await.unwrap());
        assert!(!store.delete_subscription(tenant, sub.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_and_reset_failures() {
        let store = MemoryWebhookStore::new();
        let sub = store
            .create_subscription(sub_input(Uuid::new_v4()))
            .await
            .unwrap();

        assert_eq!(
            store.increment_consecutive_failures(sub.id).await.unwrap(),
            1
        );
        assert_eq!(
            store.increment_consecutive_failures(sub.id).await.unwrap(),
            2
        );

        store.reset_consecutive_failures(sub.id).await.unwrap();
        let sub = store.find_subscription(sub.id).await.unwrap().unwrap();
        assert_eq!(sub.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_claim_due_retries_clears_schedule() {
        let store = MemoryWebhookStore::new();
        let tenant = Uuid::new_v4();
        let sub = store.create_subscription(sub_input(tenant)).await.unwrap();

        let d = store
            .create_delivery(CreateWebhookDelivery {
                tenant_id: tenant,
                subscription_id: sub.id,
                event_type: "pet.created".into(),
                payload: "{}".into(),
                attempt_number: 1,
            })
            .await
            .unwrap();

        let past = Utc::now() - chrono::Duration::seconds(5);
        store
            .mark_delivery_failed(d.id, Some(500), None, "HTTP 500", Some(past), Utc::now())
            .await
            .unwrap();

        let claimed = store.claim_due_retries(Utc::now(), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, d.id);

        // Second sweep finds nothing: the schedule marker was cleared.
        let claimed = store.claim_due_retries(Utc::now(), 10).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_claim_due_retries_oldest_first_under_limit() {
        let store = MemoryWebhookStore::new();
        let tenant = Uuid::new_v4();
        let sub = store.create_subscription(sub_input(tenant)).await.unwrap();

        let now = Utc::now();
        let mut ids_by_age = Vec::new();
        // Insert newest-due first so insertion order disagrees with due order.
        for age_secs in [10, 60, 300] {
            let d = store
                .create_delivery(CreateWebhookDelivery {
                    tenant_id: tenant,
                    subscription_id: sub.id,
                    event_type: "pet.created".into(),
                    payload: "{}".into(),
                    attempt_number: 1,
                })
                .await
                .unwrap();
            store
                .mark_delivery_failed(
                    d.id,
                    Some(500),
                    None,
                    "HTTP 500",
                    Some(now - chrono::Duration::seconds(age_secs)),
                    now,
                )
                .await
                .unwrap();
            ids_by_age.push(d.id);
        }

        // One-row batches drain in due order: most overdue first.
        for expected in ids_by_age.iter().rev() {
            let claimed = store.claim_due_retries(Utc::now(), 1).await.unwrap();
            assert_eq!(claimed.len(), 1);
            assert_eq!(claimed[0].id, *expected);
        }
    }

    #[tokio::test]
    async fn test_delivery_filters() {
        let store = MemoryWebhookStore::new();
        let tenant = Uuid::new_v4();
        let sub_a = store.create_subscription(sub_input(tenant)).await.unwrap();
        let sub_b = store.create_subscription(sub_input(tenant)).await.unwrap();

        for (sub_id, event) in [(sub_a.id, "pet.created"), (sub_b.id, "sale.completed")] {
            store
                .create_delivery(CreateWebhookDelivery {
                    tenant_id: tenant,
                    subscription_id: sub_id,
                    event_type: event.into(),
                    payload: "{}".into(),
                    attempt_number: 1,
                })
                .await
                .unwrap();
        }

        let all = store
            .list_deliveries(tenant, &DeliveryFilter::default(), 50, 0)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let only_a = store
            .list_deliveries(
                tenant,
                &DeliveryFilter {
                    subscription_id: Some(sub_a.id),
                    ..Default::default()
                },
                50,
                0,
            )
            .await
            .unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].subscription_id, sub_a.id);

        let sales = store
            .count_deliveries(
                tenant,
                &DeliveryFilter {
                    event_type: Some("sale.completed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(sales, 1);
    }
}
