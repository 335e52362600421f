//! HTTP handlers for the order API.

use crate::error::AppError;
use crate::state::AppContext;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use orderflow_core::domain::{OrderId, ProductId, UserId};
use orderflow_saga::{OrderLine, OrderRequest};
use serde::{Deserialize, Serialize};

/// Request body for `POST /orders`.
#[derive(Debug, Deserialize)]
pub struct SubmitOrderBody {
    /// Submitting user.
    pub user_id: i64,
    /// Ordered lines.
    pub items: Vec<ItemDto>,
    /// Payment method forwarded to the payment workflow.
    pub payment_method: String,
    /// Request key; may instead arrive in the `Idempotency-Key` header.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// One line of the request body.
#[derive(Debug, Deserialize)]
pub struct ItemDto {
    /// Product to order.
    pub product_id: i64,
    /// Quantity ordered.
    pub quantity: i64,
}

/// Response body for `POST /orders`.
#[derive(Debug, Serialize)]
pub struct SubmitOrderResponse {
    /// Persisted order id.
    pub order_id: i64,
    /// Status at response time.
    pub status: String,
}

/// Order fields of the `GET /orders/{id}` response.
#[derive(Debug, Serialize)]
pub struct OrderDto {
    /// Order id.
    pub id: i64,
    /// Submitting user.
    pub user_id: i64,
    /// Total in cents.
    pub total_cents: i64,
    /// Current status.
    pub status: String,
    /// Creation time (ISO 8601).
    pub created_at: String,
    /// Last status change (ISO 8601).
    pub updated_at: String,
}

/// Item fields of the `GET /orders/{id}` response.
#[derive(Debug, Serialize)]
pub struct OrderItemDto {
    /// Product ordered.
    pub product_id: i64,
    /// Quantity ordered.
    pub quantity: i64,
    /// Snapshotted unit price in cents.
    pub unit_price_cents: i64,
}

/// Response body for `GET /orders/{id}`.
#[derive(Debug, Serialize)]
pub struct GetOrderResponse {
    /// The order.
    pub order: OrderDto,
    /// Its lines.
    pub items: Vec<OrderItemDto>,
}

/// Health response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"healthy"` while the process serves requests.
    pub status: &'static str,
    /// Server time (ISO 8601).
    pub time: String,
}

/// `POST /orders`: run the submit saga and answer synchronously.
///
/// An `Idempotency-Key` header is merged into the body when the body carries
/// no key.
pub async fn submit_order(
    State(saga): State<AppContext>,
    headers: HeaderMap,
    Json(body): Json<SubmitOrderBody>,
) -> Result<(StatusCode, Json<SubmitOrderResponse>), AppError> {
    let header_key = headers
        .get("idempotency-key")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let request = OrderRequest {
        user_id: UserId::new(body.user_id),
        items: body
            .items
            .iter()
            .map(|item| OrderLine {
                product_id: ProductId::new(item.product_id),
                quantity: item.quantity,
            })
            .collect(),
        payment_method: body.payment_method,
        idempotency_key: body.idempotency_key.or(header_key),
    };

    let receipt = saga.submit_order(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitOrderResponse {
            order_id: receipt.order_id.get(),
            status: receipt.status.to_string(),
        }),
    ))
}

/// `GET /orders/{id}`: read durable state, no locking.
pub async fn get_order(
    State(saga): State<AppContext>,
    Path(id): Path<i64>,
) -> Result<Json<GetOrderResponse>, AppError> {
    let (order, items) = saga.get_order(OrderId::new(id)).await?;
    Ok(Json(GetOrderResponse {
        order: OrderDto {
            id: order.id.get(),
            user_id: order.user_id.get(),
            total_cents: order.total.cents(),
            status: order.status.to_string(),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        },
        items: items
            .into_iter()
            .map(|item| OrderItemDto {
                product_id: item.product_id.get(),
                quantity: item.quantity,
                unit_price_cents: item.unit_price.cents(),
            })
            .collect(),
    }))
}

/// `GET /health`: process liveness, no dependency checks.
#[allow(clippy::unused_async)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy", time: Utc::now().to_rfc3339() })
}

/// `GET /ready`: readiness for traffic.
#[allow(clippy::unused_async)]
pub async fn ready() -> StatusCode {
    StatusCode::OK
}
