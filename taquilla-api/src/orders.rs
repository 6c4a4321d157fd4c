use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use taquilla_core::identity::Caller;
use taquilla_core::pii::Masked;
use taquilla_order::{BuyerInfo, Order, RequestedItem};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub buyer: BuyerPayload,
    pub items: Vec<ItemPayload>,
}

#[derive(Debug, Deserialize)]
pub struct BuyerPayload {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub id_document: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ItemPayload {
    pub ticket_type_id: Uuid,
    pub quantity: i64,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub event_id: Uuid,
    pub buyer_full_name: String,
    pub buyer_email: Masked<String>,
    pub status: String,
    pub items: Vec<OrderItemResponse>,
    pub total_cents: i64,
    pub preference_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub ticket_type_id: Uuid,
    pub ticket_type_name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    #[serde(flatten)]
    pub order: OrderResponse,
    pub redirect_url: String,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            event_id: order.event_id,
            buyer_full_name: order.buyer.full_name,
            buyer_email: order.buyer.email,
            status: order.payment_status.as_str().to_string(),
            items: order
                .items
                .into_iter()
                .map(|item| OrderItemResponse {
                    ticket_type_id: item.ticket_type_id,
                    ticket_type_name: item.ticket_type_name,
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price_cents,
                })
                .collect(),
            total_cents: order.total_cents,
            preference_id: order.preference_id,
            created_at: order.created_at,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/events/{event_id}/orders
/// Create an order, reserve stock, and open a checkout session with the
/// payment provider.
pub async fn create_order(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(event_id): Path<Uuid>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), AppError> {
    let buyer = BuyerInfo {
        full_name: payload.buyer.full_name,
        email: Masked::from(payload.buyer.email),
        phone: payload.buyer.phone,
        id_document: payload.buyer.id_document,
    };
    let requested = payload
        .items
        .into_iter()
        .map(|item| RequestedItem {
            ticket_type_id: item.ticket_type_id,
            quantity: item.quantity,
        })
        .collect();

    let order = state
        .checkout
        .create(event_id, buyer, requested)
        .await
        .map_err(AppError::from_checkout)?;

    let session = state
        .checkout
        .initialize_checkout(&order)
        .await
        .map_err(AppError::from_checkout)?;

    tracing::info!(
        "Order {} created by {} for event {} ({} cents)",
        order.id,
        caller.subject,
        event_id,
        order.total_cents
    );

    let mut response: OrderResponse = order.into();
    response.preference_id = Some(session.preference_id);

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            order: response,
            redirect_url: session.redirect_url,
        }),
    ))
}

/// GET /v1/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state
        .checkout
        .order(order_id)
        .await
        .map_err(AppError::from_checkout)?;

    Ok(Json(order.into()))
}

/// POST /v1/orders/{id}/cancel
/// Organizer- or admin-driven cancellation of a pending order.
pub async fn cancel_order(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state
        .checkout
        .cancel(&caller, order_id)
        .await
        .map_err(AppError::from_checkout)?;

    Ok(Json(order.into()))
}

/// GET /v1/events/{event_id}/orders
/// Back-office listing, scoped to the event's organizer.
pub async fn list_event_orders(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Vec<OrderResponse>>, AppError> {
    let orders = state
        .checkout
        .orders_for_event(&caller, event_id)
        .await
        .map_err(AppError::from_checkout)?;

    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}
