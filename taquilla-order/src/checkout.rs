use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use taquilla_core::identity::{AccessError, Caller, OwnershipGuard};
use taquilla_core::payment::{CheckoutSession, PaymentAdapter};
use taquilla_core::BoxError;
use taquilla_catalog::inventory::{InventoryError, InventoryLedger};
use taquilla_catalog::ticket_type::TicketTypeRepository;
use uuid::Uuid;

use crate::models::{BuyerInfo, Order, OrderItem, PaymentStatus};
use crate::repository::OrderRepository;

/// One requested order line, as submitted by the buyer.
#[derive(Debug, Clone)]
pub struct RequestedItem {
    pub ticket_type_id: Uuid,
    pub quantity: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("order must contain at least one item")]
    EmptyOrder,

    #[error("invalid quantity: {0}")]
    InvalidQuantity(i64),

    #[error("ticket type {0} does not exist or does not belong to this event")]
    InvalidTicketType(Uuid),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("not found: {0}")]
    NotFound(Uuid),

    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("storage error: {0}")]
    Store(BoxError),

    #[error("payment provider error: {0}")]
    Payment(BoxError),
}

/// The order aggregate: turns a buyer's requested lines into a PENDING
/// order with all stock reserved, or into nothing at all.
pub struct CheckoutService {
    catalog: Arc<dyn TicketTypeRepository>,
    ledger: Arc<dyn InventoryLedger>,
    orders: Arc<dyn OrderRepository>,
    payments: Arc<dyn PaymentAdapter>,
}

impl CheckoutService {
    pub fn new(
        catalog: Arc<dyn TicketTypeRepository>,
        ledger: Arc<dyn InventoryLedger>,
        orders: Arc<dyn OrderRepository>,
        payments: Arc<dyn PaymentAdapter>,
    ) -> Self {
        Self {
            catalog,
            ledger,
            orders,
            payments,
        }
    }

    /// Create an order, reserving stock for every line.
    ///
    /// All-or-nothing: if any line fails to reserve, every reservation
    /// already taken for this order is released before the error returns.
    /// Lines are reserved in ascending ticket_type_id order so two orders
    /// over overlapping ticket types can never deadlock in the ledger.
    pub async fn create(
        &self,
        event_id: Uuid,
        buyer: BuyerInfo,
        requested: Vec<RequestedItem>,
    ) -> Result<Order, CheckoutError> {
        if requested.is_empty() {
            return Err(CheckoutError::EmptyOrder);
        }

        // Merge duplicate lines so a split request cannot sidestep
        // max_per_purchase; BTreeMap keeps the ascending reserve order.
        let mut quantities: BTreeMap<Uuid, i64> = BTreeMap::new();
        for item in &requested {
            if item.quantity < 1 {
                return Err(CheckoutError::InvalidQuantity(item.quantity));
            }
            *quantities.entry(item.ticket_type_id).or_insert(0) += item.quantity;
        }

        let mut lines = Vec::with_capacity(quantities.len());
        for (&ticket_type_id, &quantity) in &quantities {
            let tt = self
                .catalog
                .ticket_type(ticket_type_id)
                .await
                .map_err(CheckoutError::Store)?
                .filter(|tt| tt.event_id == event_id)
                .ok_or(CheckoutError::InvalidTicketType(ticket_type_id))?;
            lines.push((tt, quantity));
        }

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let mut reserved = Vec::with_capacity(lines.len());
        for (tt, quantity) in &lines {
            match self.ledger.reserve(tt.id, order_id, *quantity, now).await {
                Ok(reservation) => reserved.push(reservation),
                Err(e) => {
                    self.rollback(&reserved).await;
                    return Err(e.into());
                }
            }
        }

        let items = lines
            .iter()
            .map(|(tt, quantity)| OrderItem {
                ticket_type_id: tt.id,
                ticket_type_name: tt.name.clone(),
                quantity: *quantity,
                unit_price_cents: tt.price_cents,
            })
            .collect();

        let mut order = Order::new(event_id, buyer, items);
        order.id = order_id;

        if let Err(e) = self.orders.insert_order(&order).await {
            self.rollback(&reserved).await;
            return Err(CheckoutError::Store(e));
        }

        tracing::info!(
            order_id = %order.id,
            event_id = %event_id,
            total_cents = order.total_cents,
            "order created with {} reserved line(s)",
            order.items.len()
        );
        Ok(order)
    }

    /// Create a provider checkout session and record its reference.
    pub async fn initialize_checkout(&self, order: &Order) -> Result<CheckoutSession, CheckoutError> {
        let description = format!("Order {} ({} tickets)", order.id, order.unit_count());
        let session = self
            .payments
            .create_checkout(order.id, order.total_cents, &description)
            .await
            .map_err(CheckoutError::Payment)?;

        self.orders
            .set_payment_refs(order.id, None, Some(&session.preference_id))
            .await
            .map_err(CheckoutError::Store)?;

        Ok(session)
    }

    /// Cancel a PENDING order and release its reservations.
    ///
    /// Destructive, so ownership is re-checked here even though the API
    /// boundary already scoped the caller.
    pub async fn cancel(&self, caller: &Caller, order_id: Uuid) -> Result<Order, CheckoutError> {
        let order = self
            .orders
            .order(order_id)
            .await
            .map_err(CheckoutError::Store)?
            .ok_or(CheckoutError::NotFound(order_id))?;

        let event = self
            .catalog
            .event(order.event_id)
            .await
            .map_err(CheckoutError::Store)?
            .ok_or(CheckoutError::NotFound(order.event_id))?;
        OwnershipGuard::ensure_event_owner(caller, &event.organizer_id)?;

        let applied = self
            .orders
            .transition_status(order_id, PaymentStatus::Pending, PaymentStatus::Cancelled)
            .await
            .map_err(CheckoutError::Store)?;
        if !applied {
            return Err(CheckoutError::InvalidStateTransition {
                from: order.payment_status,
                to: PaymentStatus::Cancelled,
            });
        }

        self.ledger.release_order(order_id).await?;
        tracing::info!(order_id = %order_id, "order cancelled, reservations released");

        Ok(self
            .orders
            .order(order_id)
            .await
            .map_err(CheckoutError::Store)?
            .ok_or(CheckoutError::NotFound(order_id))?)
    }

    pub async fn order(&self, order_id: Uuid) -> Result<Order, CheckoutError> {
        self.orders
            .order(order_id)
            .await
            .map_err(CheckoutError::Store)?
            .ok_or(CheckoutError::NotFound(order_id))
    }

    /// Orders for one event, scoped to its organizer.
    pub async fn orders_for_event(
        &self,
        caller: &Caller,
        event_id: Uuid,
    ) -> Result<Vec<Order>, CheckoutError> {
        let event = self
            .catalog
            .event(event_id)
            .await
            .map_err(CheckoutError::Store)?
            .ok_or(CheckoutError::NotFound(event_id))?;
        OwnershipGuard::ensure_event_owner(caller, &event.organizer_id)?;

        self.orders
            .orders_for_event(event_id)
            .await
            .map_err(CheckoutError::Store)
    }

    async fn rollback(&self, reserved: &[taquilla_catalog::inventory::Reservation]) {
        for reservation in reserved {
            if let Err(e) = self.ledger.release(reservation.id).await {
                tracing::error!(token = %reservation.id, "failed to roll back reservation: {}", e);
            }
        }
    }
}
