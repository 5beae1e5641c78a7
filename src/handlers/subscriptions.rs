//! Subscription management endpoints.

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiResult, WebhookError};
use crate::events::WebhookEventType;
use crate::models::{
    CreateSubscriptionRequest, CreatedSubscriptionResponse, DeliveryResult, EventTypeInfo,
    EventTypeListResponse, ListSubscriptionsQuery, RotatedSecretResponse, SubscriptionListResponse,
    SubscriptionResponse, TenantId, UpdateSubscriptionRequest, UpdateWebhookSubscription,
};
use crate::router::WebhooksState;

/// Create a webhook subscription.
///
/// The response carries the plaintext signing secret exactly once.
#[utoipa::path(
    post,
    path = "/webhooks/subscriptions",
    request_body = CreateSubscriptionRequest,
    responses(
        (status = 201, description = "Subscription created", body = CreatedSubscriptionResponse),
        (status = 400, description = "Invalid URL or event types"),
        (status = 409, description = "Subscription limit reached"),
    ),
    tag = "webhooks"
)]
pub async fn create_subscription(
    State(state): State<WebhooksState>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> ApiResult<(StatusCode, Json<CreatedSubscriptionResponse>)> {
    request
        .validate()
        .map_err(|e| WebhookError::Validation(e.to_string()))?;

    let (subscription, secret) = state
        .subscriptions
        .create(tenant_id, request.url, request.event_types)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedSubscriptionResponse {
            subscription: subscription.into(),
            secret,
        }),
    ))
}

/// List the tenant's subscriptions.
#[utoipa::path(
    get,
    path = "/webhooks/subscriptions",
    params(ListSubscriptionsQuery),
    responses(
        (status = 200, description = "Subscriptions", body = SubscriptionListResponse),
    ),
    tag = "webhooks"
)]
pub async fn list_subscriptions(
    State(state): State<WebhooksState>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Query(query): Query<ListSubscriptionsQuery>,
) -> ApiResult<Json<SubscriptionListResponse>> {
    let (items, total) = state
        .subscriptions
        .list(tenant_id, query.limit, query.offset, query.is_active)
        .await?;

    Ok(Json(SubscriptionListResponse {
        items: items.into_iter().map(SubscriptionResponse::from).collect(),
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}

/// Fetch one subscription.
#[utoipa::path(
    get,
    path = "/webhooks/subscriptions/{id}",
    params(("id" = Uuid, Path, description = "Subscription id")),
    responses(
        (status = 200, description = "Subscription", body = SubscriptionResponse),
        (status = 404, description = "Not found"),
    ),
    tag = "webhooks"
)]
pub async fn get_subscription(
    State(state): State<WebhooksState>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let subscription = state.subscriptions.get(tenant_id, id).await?;
    Ok(Json(subscription.into()))
}

/// Update a subscription. Setting `is_active: true` on a disabled
/// subscription re-enables it and resets its failure counter.
#[utoipa::path(
    patch,
    path = "/webhooks/subscriptions/{id}",
    params(("id" = Uuid, Path, description = "Subscription id")),
    request_body = UpdateSubscriptionRequest,
    responses(
        (status = 200, description = "Updated subscription", body = SubscriptionResponse),
        (status = 400, description = "Invalid URL or event types"),
        (status = 404, description = "Not found"),
    ),
    tag = "webhooks"
)]
pub async fn update_subscription(
    State(state): State<WebhooksState>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateSubscriptionRequest>,
) -> ApiResult<Json<SubscriptionResponse>> {
    request
        .validate()
        .map_err(|e| WebhookError::Validation(e.to_string()))?;

    let subscription = state
        .subscriptions
        .update(
            tenant_id,
            id,
            UpdateWebhookSubscription {
                url: request.url,
                event_types: request.event_types,
                is_active: request.is_active,
            },
        )
        .await?;

    Ok(Json(subscription.into()))
}

/// Remove a subscription. One with delivery history is deactivated instead
/// of removed, keeping the log intact.
#[utoipa::path(
    delete,
    path = "/webhooks/subscriptions/{id}",
    params(("id" = Uuid, Path, description = "Subscription id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found"),
    ),
    tag = "webhooks"
)]
pub async fn delete_subscription(
    State(state): State<WebhooksState>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.subscriptions.delete(tenant_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Rotate the signing secret. The new secret is visible once.
#[utoipa::path(
    post,
    path = "/webhooks/subscriptions/{id}/rotate-secret",
    params(("id" = Uuid, Path, description = "Subscription id")),
    responses(
        (status = 200, description = "New secret", body = RotatedSecretResponse),
        (status = 404, description = "Not found"),
    ),
    tag = "webhooks"
)]
pub async fn rotate_secret(
    State(state): State<WebhooksState>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RotatedSecretResponse>> {
    let secret = state.subscriptions.rotate_secret(tenant_id, id).await?;
    Ok(Json(RotatedSecretResponse { id, secret }))
}

/// Send a signed `ping` delivery to the endpoint, synchronously, without
/// touching the retry schedule or the failure counter.
#[utoipa::path(
    post,
    path = "/webhooks/subscriptions/{id}/test",
    params(("id" = Uuid, Path, description = "Subscription id")),
    responses(
        (status = 200, description = "Attempt result", body = DeliveryResult),
        (status = 404, description = "Not found"),
    ),
    tag = "webhooks"
)]
pub async fn test_subscription(
    State(state): State<WebhooksState>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeliveryResult>> {
    let result = state.delivery.send_test(tenant_id, id).await?;
    if result.outcome == crate::models::DeliveryOutcome::NotFound {
        return Err(WebhookError::SubscriptionNotFound);
    }
    Ok(Json(result))
}

/// List the event-type catalog subscriptions can be registered for.
#[utoipa::path(
    get,
    path = "/webhooks/event-types",
    responses(
        (status = 200, description = "Event type catalog", body = EventTypeListResponse),
    ),
    tag = "webhooks"
)]
pub async fn list_event_types() -> Json<EventTypeListResponse> {
    let event_types = WebhookEventType::all()
        .iter()
        .map(|et| EventTypeInfo {
            event_type: et.as_str().to_string(),
            category: et.category().to_string(),
            description: et.description().to_string(),
        })
        .collect();
    Json(EventTypeListResponse { event_types })
}
