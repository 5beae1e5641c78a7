//! Data model: subscription and delivery-log rows, the wire envelope,
//! structured delivery results, and the API request/response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Tenant identity, installed as a request extension by the host
/// application's auth middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantId(pub Uuid);

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A tenant-owned webhook endpoint configuration.
///
/// The signing secret is stored encrypted and is never returned after
/// creation (rotation generates a fresh one). `is_active` is cleared
/// automatically once consecutive failed deliveries reach the disable
/// threshold; re-enabling is an explicit tenant action that also resets the
/// failure counter.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Target URL, validated as a public HTTP(S) endpoint at creation.
    pub url: String,
    /// AES-256-GCM encrypted signing secret (base64).
    pub secret_encrypted: String,
    pub is_active: bool,
    /// Subscribed event types, each validated against the registry.
    pub event_types: Vec<String>,
    /// Consecutive failed logical deliveries; reset by any success.
    pub consecutive_failures: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookSubscription {
    /// Whether this subscription listens for the given event type.
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|et| et == event_type)
    }
}

/// Data needed to create a new subscription row.
#[derive(Debug, Clone)]
pub struct CreateWebhookSubscription {
    pub tenant_id: Uuid,
    pub url: String,
    pub secret_encrypted: String,
    pub event_types: Vec<String>,
}

/// Partial update of a subscription row. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdateWebhookSubscription {
    pub url: Option<String>,
    pub event_types: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

// ---------------------------------------------------------------------------
// Delivery log
// ---------------------------------------------------------------------------

/// Lifecycle of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "delivered" => Some(DeliveryStatus::Delivered),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per delivery attempt, created `pending` before the HTTP call is
/// made and settled in place exactly once. Retries of the same logical
/// delivery are new rows at the next attempt number.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: String,
    /// The exact serialized envelope text that was signed and sent. Stored
    /// as text so retries reuse the same bytes and receiver-side signature
    /// verification holds on every attempt.
    pub payload: String,
    /// 1-based attempt number within the logical delivery.
    pub attempt_number: i32,
    pub status: String,
    pub response_code: Option<i16>,
    /// Response body, truncated to bound log storage.
    pub response_body: Option<String>,
    /// Transport error detail, when no HTTP response was received.
    pub error_message: Option<String>,
    /// When the follow-up attempt is due; cleared atomically when claimed.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Data needed to open a new (pending) delivery attempt row.
#[derive(Debug, Clone)]
pub struct CreateWebhookDelivery {
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: String,
    pub payload: String,
    pub attempt_number: i32,
}

// ---------------------------------------------------------------------------
// Wire envelope
// ---------------------------------------------------------------------------

/// The JSON structure sent as the request body:
/// `{ "event": ..., "timestamp": ..., "data": ... }`.
///
/// Constructed once per trigger invocation; the same serialized form is
/// reused across all fan-out deliveries and all retry attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl WebhookEnvelope {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery result
// ---------------------------------------------------------------------------

/// Terminal classification of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// 2xx response received.
    Delivered,
    /// Non-2xx response, transport error, or timeout.
    Failed,
    /// Subscription is inactive; no HTTP call was made.
    Disabled,
    /// Subscription does not exist; no HTTP call was made.
    NotFound,
}

/// Structured result of a delivery attempt.
///
/// Returned (never thrown) by the delivery engine so callers such as the
/// test-send UI path can render feedback without a catch block.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeliveryResult {
    pub outcome: DeliveryOutcome,
    /// Log row id for this attempt, absent when no row was created.
    pub delivery_id: Option<Uuid>,
    pub attempt: i32,
    pub response_code: Option<u16>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    /// When the next attempt is scheduled, if a retry was queued.
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl DeliveryResult {
    pub fn is_delivered(&self) -> bool {
        self.outcome == DeliveryOutcome::Delivered
    }

    pub(crate) fn skipped(outcome: DeliveryOutcome, attempt: i32) -> Self {
        Self {
            outcome,
            delivery_id: None,
            attempt,
            response_code: None,
            response_body: None,
            error_message: None,
            next_attempt_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// API request/response types
// ---------------------------------------------------------------------------

/// Create-subscription request body.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateSubscriptionRequest {
    #[validate(url(message = "must be a valid URL"))]
    pub url: String,
    #[validate(length(min = 1, message = "at least one event type is required"))]
    pub event_types: Vec<String>,
}

/// Update-subscription request body; omitted fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateSubscriptionRequest {
    #[validate(url(message = "must be a valid URL"))]
    pub url: Option<String>,
    pub event_types: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

/// Subscription as returned by the API. The secret is never included.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub url: String,
    pub event_types: Vec<String>,
    pub is_active: bool,
    pub consecutive_failures: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WebhookSubscription> for SubscriptionResponse {
    fn from(sub: WebhookSubscription) -> Self {
        Self {
            id: sub.id,
            tenant_id: sub.tenant_id,
            url: sub.url,
            event_types: sub.event_types,
            is_active: sub.is_active,
            consecutive_failures: sub.consecutive_failures,
            last_attempt_at: sub.last_attempt_at,
            last_success_at: sub.last_success_at,
            created_at: sub.created_at,
            updated_at: sub.updated_at,
        }
    }
}

/// Create-subscription response: the subscription plus the plaintext secret,
/// visible exactly once.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreatedSubscriptionResponse {
    #[serde(flatten)]
    pub subscription: SubscriptionResponse,
    /// One-time-visible signing secret; not retrievable again.
    pub secret: String,
}

/// Rotate-secret response carrying the fresh one-time-visible secret.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RotatedSecretResponse {
    pub id: Uuid,
    pub secret: String,
}

fn default_limit() -> i64 {
    20
}

/// Pagination/filter query for listing subscriptions.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ListSubscriptionsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriptionListResponse {
    pub items: Vec<SubscriptionResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Pagination/filter query for listing delivery log entries.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ListDeliveriesQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    pub subscription_id: Option<Uuid>,
    pub event_type: Option<String>,
    pub status: Option<String>,
}

/// Delivery log entry summary.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeliveryResponse {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: String,
    pub attempt_number: i32,
    pub status: String,
    pub response_code: Option<i16>,
    pub error_message: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<WebhookDelivery> for DeliveryResponse {
    fn from(d: WebhookDelivery) -> Self {
        Self {
            id: d.id,
            subscription_id: d.subscription_id,
            event_type: d.event_type,
            attempt_number: d.attempt_number,
            status: d.status,
            response_code: d.response_code,
            error_message: d.error_message,
            next_attempt_at: d.next_attempt_at,
            created_at: d.created_at,
            completed_at: d.completed_at,
        }
    }
}

/// Delivery log entry detail, including the payload that was sent and the
/// (truncated) response body.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeliveryDetailResponse {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: String,
    pub attempt_number: i32,
    pub status: String,
    pub payload: String,
    pub response_code: Option<i16>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<WebhookDelivery> for DeliveryDetailResponse {
    fn from(d: WebhookDelivery) -> Self {
        Self {
            id: d.id,
            subscription_id: d.subscription_id,
            event_type: d.event_type,
            attempt_number: d.attempt_number,
            status: d.status,
            payload: d.payload,
            response_code: d.response_code,
            response_body: d.response_body,
            error_message: d.error_message,
            next_attempt_at: d.next_attempt_at,
            created_at: d.created_at,
            completed_at: d.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeliveryListResponse {
    pub items: Vec<DeliveryResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// One entry of the event-type catalog.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EventTypeInfo {
    pub event_type: String,
    pub category: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EventTypeListResponse {
    pub event_types: Vec<EventTypeInfo>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
