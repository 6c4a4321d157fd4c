use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taquilla_core::BoxError;
use uuid::Uuid;

use crate::models::{Order, PaymentStatus, PurchasedTicket};

/// Persistence for orders.
///
/// `transition_status` is a compare-and-swap: the write applies only if the
/// order is currently in `from`, and the return value says whether it did.
/// Every state transition in the system goes through it, which is what
/// makes duplicate payment callbacks and the expiry sweep safe.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert_order(&self, order: &Order) -> Result<(), BoxError>;

    async fn order(&self, id: Uuid) -> Result<Option<Order>, BoxError>;

    async fn orders_for_event(&self, event_id: Uuid) -> Result<Vec<Order>, BoxError>;

    async fn transition_status(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<bool, BoxError>;

    async fn set_payment_refs(
        &self,
        id: Uuid,
        provider_payment_id: Option<&str>,
        preference_id: Option<&str>,
    ) -> Result<(), BoxError>;
}

/// Persistence for issued tickets.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn insert_tickets(&self, tickets: &[PurchasedTicket]) -> Result<(), BoxError>;

    async fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<PurchasedTicket>, BoxError>;

    async fn ticket_by_code(&self, code: &str) -> Result<Option<PurchasedTicket>, BoxError>;

    /// Set `validated_at` if and only if it is still unset. Returns whether
    /// this call won the write; the loser sees `false`.
    async fn mark_validated(&self, code: &str, at: DateTime<Utc>) -> Result<bool, BoxError>;
}
