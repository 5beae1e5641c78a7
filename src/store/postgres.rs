//! Postgres store implementation.
//!
//! Plain parameterized queries with `FromRow` mapping; every tenant-facing
//! query is scoped by `tenant_id`. Counter updates and retry claims are
//! single statements so concurrent delivery attempts cannot lose updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{DeliveryFilter, WebhookStore};
use crate::error::WebhookError;
use crate::models::{
    CreateWebhookDelivery, CreateWebhookSubscription, UpdateWebhookSubscription, WebhookDelivery,
    WebhookSubscription,
};

/// [`WebhookStore`] backed by a Postgres pool.
#[derive(Clone)]
pub struct PgWebhookStore {
    pool: PgPool,
}

impl PgWebhookStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), WebhookError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| WebhookError::Internal(format!("Migration failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl WebhookStore for PgWebhookStore {
    async fn create_subscription(
        &self,
        input: CreateWebhookSubscription,
    ) -> Result<WebhookSubscription, WebhookError> {
        let sub = sqlx::query_as(
            r"
            INSERT INTO webhook_subscriptions (tenant_id, url, secret_encrypted, event_types)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            ",
        )
        .bind(input.tenant_id)
        .bind(&input.url)
        .bind(&input.secret_encrypted)
        .bind(&input.event_types)
        .fetch_one(&self.pool)
        .await?;

        Ok(sub)
    }

    async fn find_subscription(
        &self,
        id: Uuid,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        let sub = sqlx::query_as("SELECT * FROM webhook_subscriptions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sub)
    }

    async fn find_subscription_for_tenant(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        let sub = sqlx::query_as(
            "SELECT * FROM webhook_subscriptions WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sub)
    }

    async fn list_subscriptions(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
        is_active: Option<bool>,
    ) -> Result<Vec<WebhookSubscription>, WebhookError> {
        let subs = sqlx::query_as(
            r"
            SELECT * FROM webhook_subscriptions
            WHERE tenant_id = $1
              AND ($2::boolean IS NULL OR is_active = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            ",
        )
        .bind(tenant_id)
        .bind(is_active)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(subs)
    }

    async fn count_subscriptions(
        &self,
        tenant_id: Uuid,
        is_active: Option<bool>,
    ) -> Result<i64, WebhookError> {
        let row: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*) FROM webhook_subscriptions
            WHERE tenant_id = $1
              AND ($2::boolean IS NULL OR is_active = $2)
            ",
        )
        .bind(tenant_id)
        .bind(is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn find_active_subscriptions(
        &self,
        tenant_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<WebhookSubscription>, WebhookError> {
        let subs = sqlx::query_as(
            r"
            SELECT * FROM webhook_subscriptions
            WHERE tenant_id = $1
              AND is_active = TRUE
              AND $2 = ANY(event_types)
            ",
        )
        .bind(tenant_id)
        .bind(event_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(subs)
    }

    async fn update_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        input: UpdateWebhookSubscription,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        let sub = sqlx::query_as(
            r"
            UPDATE webhook_subscriptions SET
                url = COALESCE($3, url),
                event_types = COALESCE($4, event_types),
                is_active = COALESCE($5, is_active),
                updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            RETURNING *
            ",
        )
        .bind(tenant_id)
        .bind(id)
        .bind(input.url)
        .bind(input.event_types)
        .bind(input.is_active)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sub)
    }

    async fn delete_subscription(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, WebhookError> {
        let result =
            sqlx::query("DELETE FROM webhook_subscriptions WHERE tenant_id = $1 AND id = $2")
                .bind(tenant_id)
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_subscription_secret(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        secret_encrypted: &str,
    ) -> Result<bool, WebhookError> {
        let result = sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET secret_encrypted = $3, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            ",
        )
        .bind(tenant_id)
        .bind(id)
        .bind(secret_encrypted)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_consecutive_failures(&self, id: Uuid) -> Result<i32, WebhookError> {
        let row: (i32,) = sqlx::query_as(
            r"
            UPDATE webhook_subscriptions
            SET consecutive_failures = consecutive_failures + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING consecutive_failures
            ",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn reset_consecutive_failures(&self, id: Uuid) -> Result<(), WebhookError> {
        sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET consecutive_failures = 0, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn disable_subscription(&self, id: Uuid) -> Result<(), WebhookError> {
        sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET is_active = FALSE, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_subscription_attempt(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET last_attempt_at = $2, updated_at = $2
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_subscription_success(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET last_success_at = $2, consecutive_failures = 0, updated_at = $2
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_delivery(
        &self,
        input: CreateWebhookDelivery,
    ) -> Result<WebhookDelivery, WebhookError> {
        let delivery = sqlx::query_as(
            r"
            INSERT INTO webhook_deliveries
                (tenant_id, subscription_id, event_type, payload, attempt_number, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING *
            ",
        )
        .bind(input.tenant_id)
        .bind(input.subscription_id)
        .bind(&input.event_type)
        .bind(&input.payload)
        .bind(input.attempt_number)
        .fetch_one(&self.pool)
        .await?;
        Ok(delivery)
    }

    async fn mark_delivery_delivered(
        &self,
        id: Uuid,
        response_code: i16,
        response_body: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'delivered', response_code = $2, response_body = $3, completed_at = $4
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(response_code)
        .bind(response_body)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;
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
        sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'failed', response_code = $2, response_body = $3,
                error_message = $4, next_attempt_at = $5, completed_at = $6
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(response_code)
        .bind(response_body)
        .bind(error_message)
        .bind(next_attempt_at)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        // SKIP LOCKED lets concurrent sweepers claim disjoint batches.
        let claimed = sqlx::query_as(
            r"
            UPDATE webhook_deliveries
            SET next_attempt_at = NULL
            WHERE id IN (
                SELECT id FROM webhook_deliveries
                WHERE status = 'failed'
                  AND next_attempt_at IS NOT NULL
                  AND next_attempt_at <= $1
                ORDER BY next_attempt_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            ",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(claimed)
    }

    async fn list_deliveries(
        &self,
        tenant_id: Uuid,
        filter: &DeliveryFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        let deliveries = sqlx::query_as(
            r"
            SELECT * FROM webhook_deliveries
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR subscription_id = $2)
              AND ($3::text IS NULL OR event_type = $3)
              AND ($4::text IS NULL OR status = $4)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            ",
        )
        .bind(tenant_id)
        .bind(filter.subscription_id)
        .bind(filter.event_type.as_deref())
        .bind(filter.status.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(deliveries)
    }

    async fn count_deliveries(
        &self,
        tenant_id: Uuid,
        filter: &DeliveryFilter,
    ) -> Result<i64, WebhookError> {
        let row: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*) FROM webhook_deliveries
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR subscription_id = $2)
              AND ($3::text IS NULL OR event_type = $3)
              AND ($4::text IS NULL OR status = $4)
            ",
        )
        .bind(tenant_id)
        .bind(filter.subscription_id)
        .bind(filter.event_type.as_deref())
        .bind(filter.status.as_deref())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn find_delivery(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookDelivery>, WebhookError> {
        let delivery =
            sqlx::query_as("SELECT * FROM webhook_deliveries WHERE tenant_id = $1 AND id = $2")
                .bind(tenant_id)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(delivery)
    }
}
