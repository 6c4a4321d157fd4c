use chrono::Utc;
use std::sync::Arc;
use taquilla_core::identity::{AccessError, Caller, OwnershipGuard};
use taquilla_core::BoxError;
use taquilla_catalog::ticket_type::TicketTypeRepository;
use uuid::Uuid;

use crate::models::{Order, PurchasedTicket};
use crate::repository::{OrderRepository, TicketRepository};

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("tickets already issued for order {0}")]
    AlreadyIssued(Uuid),

    #[error("redemption code not found")]
    NotFound,

    #[error("ticket already validated")]
    AlreadyValidated,

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("storage error: {0}")]
    Store(#[from] BoxError),
}

/// Materializes purchased tickets once an order is paid, and performs the
/// scan-time check-in.
pub struct TicketIssuer {
    tickets: Arc<dyn TicketRepository>,
    orders: Arc<dyn OrderRepository>,
    catalog: Arc<dyn TicketTypeRepository>,
}

impl TicketIssuer {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn TicketTypeRepository>,
    ) -> Self {
        Self {
            tickets,
            orders,
            catalog,
        }
    }

    /// Issue one ticket per purchased unit.
    ///
    /// The reconciler's idempotent transition guarantees at most one caller
    /// reaches this per order; re-invocation on an order that already has
    /// tickets fails with AlreadyIssued instead of duplicating them.
    pub async fn issue(&self, order: &Order) -> Result<Vec<PurchasedTicket>, IssueError> {
        let existing = self.tickets.tickets_for_order(order.id).await?;
        if !existing.is_empty() {
            return Err(IssueError::AlreadyIssued(order.id));
        }

        let mut issued = Vec::with_capacity(order.unit_count() as usize);
        for item in &order.items {
            for _ in 0..item.quantity {
                issued.push(PurchasedTicket::new(
                    order.id,
                    item.ticket_type_id,
                    Self::redemption_code(),
                ));
            }
        }

        self.tickets.insert_tickets(&issued).await?;
        tracing::info!(order_id = %order.id, "issued {} ticket(s)", issued.len());
        Ok(issued)
    }

    pub async fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<PurchasedTicket>, IssueError> {
        Ok(self.tickets.tickets_for_order(order_id).await?)
    }

    /// Check a ticket in at the venue. Exactly one of two simultaneous
    /// scans of the same code succeeds; the other sees AlreadyValidated.
    pub async fn validate(
        &self,
        caller: &Caller,
        redemption_code: &str,
    ) -> Result<PurchasedTicket, IssueError> {
        let ticket = self
            .tickets
            .ticket_by_code(redemption_code)
            .await?
            .ok_or(IssueError::NotFound)?;

        // Scanning is destructive; re-check that the scanner belongs to
        // the event even though the boundary already authenticated them.
        let order = self
            .orders
            .order(ticket.order_id)
            .await?
            .ok_or(IssueError::NotFound)?;
        let event = self
            .catalog
            .event(order.event_id)
            .await
            .map_err(IssueError::Store)?
            .ok_or(IssueError::NotFound)?;
        OwnershipGuard::ensure_event_owner(caller, &event.organizer_id)?;

        let validated_at = Utc::now();
        let won = self
            .tickets
            .mark_validated(redemption_code, validated_at)
            .await?;
        if !won {
            return Err(IssueError::AlreadyValidated);
        }

        tracing::info!(order_id = %ticket.order_id, "ticket validated");
        Ok(PurchasedTicket {
            validated_at: Some(validated_at),
            ..ticket
        })
    }

    /// Opaque scannable code. UUIDv4 gives 122 random bits, so collisions
    /// and guessing are both negligible.
    fn redemption_code() -> String {
        format!("TQ-{}", Uuid::new_v4().simple().to_string().to_uppercase())
    }
}
