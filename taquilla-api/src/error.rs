use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use taquilla_catalog::InventoryError;
use taquilla_order::{CheckoutError, IssueError, ReconcileError};

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            },
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            },
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Anyhow(err.into())
    }
}

impl AppError {
    pub fn from_checkout(err: CheckoutError) -> Self {
        match err {
            CheckoutError::EmptyOrder
            | CheckoutError::InvalidQuantity(_)
            | CheckoutError::InvalidTicketType(_) => Self::ValidationError(err.to_string()),
            CheckoutError::Inventory(inner) => Self::from_inventory(inner),
            CheckoutError::NotFound(id) => Self::NotFoundError(format!("Order {} not found", id)),
            CheckoutError::InvalidStateTransition { .. } => Self::ConflictError(err.to_string()),
            CheckoutError::Access(inner) => Self::AuthorizationError(inner.to_string()),
            CheckoutError::Store(inner) => Self::InternalServerError(inner.to_string()),
            CheckoutError::Payment(inner) => Self::InternalServerError(inner.to_string()),
        }
    }

    pub fn from_inventory(err: InventoryError) -> Self {
        match err {
            InventoryError::UnknownTicketType(_) => Self::ValidationError(err.to_string()),
            InventoryError::InvalidQuantity(_) => Self::ValidationError(err.to_string()),
            InventoryError::InsufficientStock { .. } => Self::ConflictError(err.to_string()),
            InventoryError::OutsideAvailabilityWindow(_) => Self::ValidationError(err.to_string()),
            InventoryError::ExceedsPerPurchaseLimit { .. } => Self::ValidationError(err.to_string()),
            InventoryError::Store(inner) => Self::InternalServerError(inner),
        }
    }

    pub fn from_issue(err: IssueError) -> Self {
        match err {
            IssueError::AlreadyIssued(id) => {
                Self::ConflictError(format!("Tickets already issued for order {}", id))
            }
            IssueError::NotFound => Self::NotFoundError("Ticket not found".to_string()),
            IssueError::AlreadyValidated => {
                Self::ConflictError("Ticket already validated".to_string())
            }
            IssueError::Access(inner) => Self::AuthorizationError(inner.to_string()),
            IssueError::Store(inner) => Self::InternalServerError(inner.to_string()),
        }
    }

    pub fn from_reconcile(err: ReconcileError) -> Self {
        match err {
            ReconcileError::UnknownOrder(reference) => {
                Self::NotFoundError(format!("No order for payment reference {}", reference))
            }
            ReconcileError::Inventory(inner) => Self::from_inventory(inner),
            ReconcileError::Issue(inner) => Self::from_issue(inner),
            ReconcileError::Store(inner) => Self::InternalServerError(inner.to_string()),
        }
    }
}
