use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use taquilla_core::BoxError;
use uuid::Uuid;

use crate::models::{Order, PaymentStatus, PurchasedTicket};
use crate::repository::{OrderRepository, TicketRepository};

/// In-memory order store backing the domain test suites and single-node
/// runs. The Postgres implementation lives in the store crate.
pub struct MemoryOrderRepository {
    orders: Mutex<HashMap<Uuid, Order>>,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self {
            orders: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryOrderRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn insert_order(&self, order: &Order) -> Result<(), BoxError> {
        self.orders
            .lock()
            .expect("order map poisoned")
            .insert(order.id, order.clone());
        Ok(())
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>, BoxError> {
        Ok(self.orders.lock().expect("order map poisoned").get(&id).cloned())
    }

    async fn orders_for_event(&self, event_id: Uuid) -> Result<Vec<Order>, BoxError> {
        let mut orders: Vec<Order> = self
            .orders
            .lock()
            .expect("order map poisoned")
            .values()
            .filter(|o| o.event_id == event_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<bool, BoxError> {
        let mut orders = self.orders.lock().expect("order map poisoned");
        match orders.get_mut(&id) {
            Some(order) if order.payment_status == from => {
                order.payment_status = to;
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_payment_refs(
        &self,
        id: Uuid,
        provider_payment_id: Option<&str>,
        preference_id: Option<&str>,
    ) -> Result<(), BoxError> {
        let mut orders = self.orders.lock().expect("order map poisoned");
        if let Some(order) = orders.get_mut(&id) {
            if let Some(payment_id) = provider_payment_id {
                order.provider_payment_id = Some(payment_id.to_string());
            }
            if let Some(preference) = preference_id {
                order.preference_id = Some(preference.to_string());
            }
            order.updated_at = Utc::now();
        }
        Ok(())
    }
}

/// In-memory purchased-ticket store. `mark_validated` does its check and
/// write under one lock, matching the guarded UPDATE in the Postgres
/// implementation.
pub struct MemoryTicketRepository {
    by_code: Mutex<HashMap<String, PurchasedTicket>>,
}

impl MemoryTicketRepository {
    pub fn new() -> Self {
        Self {
            by_code: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryTicketRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TicketRepository for MemoryTicketRepository {
    async fn insert_tickets(&self, tickets: &[PurchasedTicket]) -> Result<(), BoxError> {
        let mut by_code = self.by_code.lock().expect("ticket map poisoned");
        for ticket in tickets {
            by_code.insert(ticket.redemption_code.clone(), ticket.clone());
        }
        Ok(())
    }

    async fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<PurchasedTicket>, BoxError> {
        let mut tickets: Vec<PurchasedTicket> = self
            .by_code
            .lock()
            .expect("ticket map poisoned")
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.created_at);
        Ok(tickets)
    }

    async fn ticket_by_code(&self, code: &str) -> Result<Option<PurchasedTicket>, BoxError> {
        Ok(self
            .by_code
            .lock()
            .expect("ticket map poisoned")
            .get(code)
            .cloned())
    }

    async fn mark_validated(&self, code: &str, at: DateTime<Utc>) -> Result<bool, BoxError> {
        let mut by_code = self.by_code.lock().expect("ticket map poisoned");
        match by_code.get_mut(code) {
            Some(ticket) if ticket.validated_at.is_none() => {
                ticket.validated_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
