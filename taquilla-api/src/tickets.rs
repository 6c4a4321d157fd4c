use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::Serialize;
use taquilla_core::identity::Caller;
use taquilla_order::PurchasedTicket;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub id: Uuid,
    pub ticket_type_id: Uuid,
    pub redemption_code: String,
    pub qr_data: String,
    pub validated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<PurchasedTicket> for TicketResponse {
    fn from(ticket: PurchasedTicket) -> Self {
        let qr_data = ticket.qr_payload();
        Self {
            id: ticket.id,
            ticket_type_id: ticket.ticket_type_id,
            redemption_code: ticket.redemption_code,
            qr_data,
            validated_at: ticket.validated_at,
        }
    }
}

/// GET /v1/orders/{id}/tickets
/// Tickets for a paid order. Knowing the order id is the capability here;
/// buyers reach this from the confirmation link we email them.
pub async fn get_order_tickets(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Vec<TicketResponse>>, AppError> {
    let tickets = state
        .issuer
        .tickets_for_order(order_id)
        .await
        .map_err(AppError::from_issue)?;

    Ok(Json(tickets.into_iter().map(TicketResponse::from).collect()))
}

/// POST /v1/tickets/{code}/validate
/// Scan-time check-in at the venue gate.
pub async fn validate_ticket(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(code): Path<String>,
) -> Result<Json<TicketResponse>, AppError> {
    let ticket = state
        .issuer
        .validate(&caller, &code)
        .await
        .map_err(AppError::from_issue)?;

    tracing::info!("Ticket {} validated by {}", ticket.redemption_code, caller.subject);

    Ok(Json(ticket.into()))
}
