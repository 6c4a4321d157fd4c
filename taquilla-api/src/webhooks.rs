use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use taquilla_order::{Ack, ReconcileError};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    #[serde(rename = "type")]
    pub type_: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub id: String,
}

/// POST /v1/webhooks/payments
/// Receive payment status notifications from the provider.
///
/// The provider retries anything that is not a 2xx, so only genuinely
/// retryable failures return an error status. Notifications that cannot
/// ever succeed (unknown order reference) are logged and acknowledged.
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    Json(payload): Json<PaymentWebhook>,
) -> Result<StatusCode, StatusCode> {
    tracing::info!("Received webhook: {} for payment {}", payload.type_, payload.data.id);

    if payload.type_ != "payment" {
        return Ok(StatusCode::OK);
    }

    let payment = state
        .payments
        .get_payment(&payload.data.id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to resolve payment {}: {}", payload.data.id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    match state
        .reconciler
        .handle_notification(&payment.id, payment.status, &payment.order_reference)
        .await
    {
        Ok(Ack::Applied(status)) => {
            tracing::info!(
                "Payment {} applied: order {} is now {}",
                payment.id,
                payment.order_reference,
                status.as_str()
            );
            Ok(StatusCode::OK)
        }
        Ok(Ack::Ignored) => Ok(StatusCode::OK),
        Err(ReconcileError::UnknownOrder(reference)) => {
            // A reference we never handed out; retrying cannot fix it.
            tracing::warn!("Webhook for unknown order reference {}, acknowledging", reference);
            Ok(StatusCode::OK)
        }
        Err(e) => {
            tracing::error!("Failed to reconcile payment {}: {}", payment.id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
