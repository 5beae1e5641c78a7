//! Delivery log endpoints (read-only).

use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use uuid::Uuid;

use crate::error::{ApiResult, WebhookError};
use crate::models::{
    DeliveryDetailResponse, DeliveryListResponse, DeliveryResponse, ListDeliveriesQuery, TenantId,
};
use crate::router::WebhooksState;
use crate::store::DeliveryFilter;

/// List delivery log entries, newest first.
#[utoipa::path(
    get,
    path = "/webhooks/deliveries",
    params(ListDeliveriesQuery),
    responses(
        (status = 200, description = "Delivery log entries", body = DeliveryListResponse),
    ),
    tag = "webhooks"
)]
pub async fn list_deliveries(
    State(state): State<WebhooksState>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Query(query): Query<ListDeliveriesQuery>,
) -> ApiResult<Json<DeliveryListResponse>> {
    let limit = query.limit.clamp(1, 100);
    let offset = query.offset.max(0);
    let filter = DeliveryFilter {
        subscription_id: query.subscription_id,
        event_type: query.event_type,
        status: query.status,
    };

    let items = state
        .store
        .list_deliveries(tenant_id, &filter, limit, offset)
        .await?;
    let total = state.store.count_deliveries(tenant_id, &filter).await?;

    Ok(Json(DeliveryListResponse {
        items: items.into_iter().map(DeliveryResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Fetch one delivery log entry, including the payload that was sent.
#[utoipa::path(
    get,
    path = "/webhooks/deliveries/{delivery_id}",
    params(("delivery_id" = Uuid, Path, description = "Delivery id")),
    responses(
        (status = 200, description = "Delivery detail", body = DeliveryDetailResponse),
        (status = 404, description = "Not found"),
    ),
    tag = "webhooks"
)]
pub async fn get_delivery(
    State(state): State<WebhooksState>,
    Extension(TenantId(tenant_id)): Extension<TenantId>,
    Path(delivery_id): Path<Uuid>,
) -> ApiResult<Json<DeliveryDetailResponse>> {
    let delivery = state
        .store
        .find_delivery(tenant_id, delivery_id)
        .await?
        .ok_or(WebhookError::DeliveryNotFound)?;
    Ok(Json(delivery.into()))
}
