use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use taquilla_core::BoxError;
use uuid::Uuid;

use crate::ticket_type::{EventSummary, TicketType, TicketTypeRepository};

/// Lifecycle of a stock hold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationState {
    Held,
    Committed,
    Released,
}

/// A temporary hold on ticket-type stock, created at order time.
///
/// Stock is decremented when the hold is created; `commit` only makes the
/// hold permanent and `release` gives the quantity back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub ticket_type_id: Uuid,
    pub order_id: Uuid,
    pub quantity: i64,
    pub state: ReservationState,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("ticket type not found: {0}")]
    UnknownTicketType(Uuid),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(i64),

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("ticket type {0} is outside its availability window")]
    OutsideAvailabilityWindow(Uuid),

    #[error("quantity {requested} exceeds per-purchase limit {limit}")]
    ExceedsPerPurchaseLimit { requested: i64, limit: i64 },

    #[error("inventory store error: {0}")]
    Store(String),
}

/// Atomic reservation ledger over ticket-type stock.
///
/// Implementations must serialize `reserve` per ticket type (entry mutex or
/// row-level lock), never globally, and must keep `release`/`commit`
/// idempotent so duplicate timeout callbacks are harmless.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    async fn reserve(
        &self,
        ticket_type_id: Uuid,
        order_id: Uuid,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> Result<Reservation, InventoryError>;

    /// Restore a held quantity. No-op for released or committed tokens.
    async fn release(&self, token: Uuid) -> Result<(), InventoryError>;

    /// Make a held reservation permanent. No stock change; idempotent.
    async fn commit(&self, token: Uuid) -> Result<(), InventoryError>;

    /// Release every held reservation belonging to an order.
    async fn release_order(&self, order_id: Uuid) -> Result<(), InventoryError>;

    /// Commit every held reservation belonging to an order.
    async fn commit_order(&self, order_id: Uuid) -> Result<(), InventoryError>;

    /// Orders that still have held reservations past their expiry.
    /// Read-only: the sweeper decides per order whether release is safe.
    async fn expired_holds(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, InventoryError>;

    async fn stock_remaining(&self, ticket_type_id: Uuid) -> Result<i64, InventoryError>;
}

struct StockEntry {
    ticket_type: TicketType,
    reservations: HashMap<Uuid, Reservation>,
}

/// In-memory inventory ledger.
///
/// Each ticket type lives behind its own mutex, so concurrent reservations
/// on different types never contend. The Postgres-backed ledger in the
/// store crate gets the same isolation from row-level locks.
pub struct MemoryInventoryLedger {
    hold_window: Duration,
    entries: RwLock<HashMap<Uuid, Arc<Mutex<StockEntry>>>>,
    token_index: RwLock<HashMap<Uuid, Uuid>>,
    order_index: RwLock<HashMap<Uuid, Vec<Uuid>>>,
    events: RwLock<HashMap<Uuid, EventSummary>>,
}

impl MemoryInventoryLedger {
    pub fn new(hold_window: Duration) -> Self {
        Self {
            hold_window,
            entries: RwLock::new(HashMap::new()),
            token_index: RwLock::new(HashMap::new()),
            order_index: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_event(&self, event: EventSummary) {
        self.events
            .write()
            .expect("event map poisoned")
            .insert(event.id, event);
    }

    /// Seed a ticket type into the ledger. Replaces any previous entry.
    pub fn register(&self, ticket_type: TicketType) {
        let entry = StockEntry {
            ticket_type: ticket_type.clone(),
            reservations: HashMap::new(),
        };
        self.entries
            .write()
            .expect("entry map poisoned")
            .insert(ticket_type.id, Arc::new(Mutex::new(entry)));
    }

    /// Admin price edit. Existing orders keep their snapshot prices.
    pub fn update_price(&self, ticket_type_id: Uuid, price_cents: i64) -> Result<(), InventoryError> {
        let entry = self.entry(ticket_type_id)?;
        let mut entry = entry.lock().expect("stock entry poisoned");
        entry.ticket_type.price_cents = price_cents;
        Ok(())
    }

    fn entry(&self, ticket_type_id: Uuid) -> Result<Arc<Mutex<StockEntry>>, InventoryError> {
        self.entries
            .read()
            .expect("entry map poisoned")
            .get(&ticket_type_id)
            .cloned()
            .ok_or(InventoryError::UnknownTicketType(ticket_type_id))
    }

    fn release_token(&self, token: Uuid) -> Result<(), InventoryError> {
        let ticket_type_id = {
            let index = self.token_index.read().expect("token index poisoned");
            match index.get(&token) {
                Some(id) => *id,
                // Unknown token: tolerate duplicate/stale callbacks.
                None => return Ok(()),
            }
        };

        let entry = self.entry(ticket_type_id)?;
        let mut entry = entry.lock().expect("stock entry poisoned");
        let held_quantity = match entry.reservations.get_mut(&token) {
            Some(r) if r.state == ReservationState::Held => {
                r.state = ReservationState::Released;
                Some(r.quantity)
            }
            _ => None,
        };
        if let Some(quantity) = held_quantity {
            entry.ticket_type.stock_remaining += quantity;
        }
        Ok(())
    }

    fn commit_token(&self, token: Uuid) -> Result<(), InventoryError> {
        let ticket_type_id = {
            let index = self.token_index.read().expect("token index poisoned");
            match index.get(&token) {
                Some(id) => *id,
                None => return Ok(()),
            }
        };

        let entry = self.entry(ticket_type_id)?;
        let mut entry = entry.lock().expect("stock entry poisoned");
        if let Some(reservation) = entry.reservations.get_mut(&token) {
            if reservation.state == ReservationState::Held {
                reservation.state = ReservationState::Committed;
            }
        }
        Ok(())
    }

    fn tokens_for_order(&self, order_id: Uuid) -> Vec<Uuid> {
        self.order_index
            .read()
            .expect("order index poisoned")
            .get(&order_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl InventoryLedger for MemoryInventoryLedger {
    async fn reserve(
        &self,
        ticket_type_id: Uuid,
        order_id: Uuid,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> Result<Reservation, InventoryError> {
        // A non-positive quantity would turn the decrement below into an
        // increment and push stock above stock_initial.
        if quantity < 1 {
            return Err(InventoryError::InvalidQuantity(quantity));
        }

        let entry = self.entry(ticket_type_id)?;

        let reservation = {
            let mut entry = entry.lock().expect("stock entry poisoned");
            let tt = &entry.ticket_type;

            if !tt.is_on_sale(now) {
                return Err(InventoryError::OutsideAvailabilityWindow(ticket_type_id));
            }
            if !tt.allows_quantity(quantity) {
                return Err(InventoryError::ExceedsPerPurchaseLimit {
                    requested: quantity,
                    limit: tt.max_per_purchase.unwrap_or(0),
                });
            }
            if quantity > tt.stock_remaining {
                return Err(InventoryError::InsufficientStock {
                    requested: quantity,
                    available: tt.stock_remaining,
                });
            }

            // Check and decrement under the same entry lock: this is the
            // serializing step that makes overselling impossible.
            entry.ticket_type.stock_remaining -= quantity;

            let reservation = Reservation {
                id: Uuid::new_v4(),
                ticket_type_id,
                order_id,
                quantity,
                state: ReservationState::Held,
                expires_at: now + self.hold_window,
            };
            entry.reservations.insert(reservation.id, reservation.clone());
            reservation
        };

        self.token_index
            .write()
            .expect("token index poisoned")
            .insert(reservation.id, ticket_type_id);
        self.order_index
            .write()
            .expect("order index poisoned")
            .entry(order_id)
            .or_default()
            .push(reservation.id);

        Ok(reservation)
    }

    async fn release(&self, token: Uuid) -> Result<(), InventoryError> {
        self.release_token(token)
    }

    async fn commit(&self, token: Uuid) -> Result<(), InventoryError> {
        self.commit_token(token)
    }

    async fn release_order(&self, order_id: Uuid) -> Result<(), InventoryError> {
        for token in self.tokens_for_order(order_id) {
            self.release_token(token)?;
        }
        Ok(())
    }

    async fn commit_order(&self, order_id: Uuid) -> Result<(), InventoryError> {
        for token in self.tokens_for_order(order_id) {
            self.commit_token(token)?;
        }
        Ok(())
    }

    async fn expired_holds(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, InventoryError> {
        let entries: Vec<Arc<Mutex<StockEntry>>> = self
            .entries
            .read()
            .expect("entry map poisoned")
            .values()
            .cloned()
            .collect();

        let mut order_ids = Vec::new();
        for entry in entries {
            let entry = entry.lock().expect("stock entry poisoned");
            for reservation in entry.reservations.values() {
                if reservation.state == ReservationState::Held && reservation.expires_at <= now {
                    order_ids.push(reservation.order_id);
                }
            }
        }
        order_ids.sort_unstable();
        order_ids.dedup();
        Ok(order_ids)
    }

    async fn stock_remaining(&self, ticket_type_id: Uuid) -> Result<i64, InventoryError> {
        let entry = self.entry(ticket_type_id)?;
        let entry = entry.lock().expect("stock entry poisoned");
        Ok(entry.ticket_type.stock_remaining)
    }
}

#[async_trait]
impl TicketTypeRepository for MemoryInventoryLedger {
    async fn ticket_type(&self, id: Uuid) -> Result<Option<TicketType>, BoxError> {
        match self.entry(id) {
            Ok(entry) => {
                let entry = entry.lock().expect("stock entry poisoned");
                Ok(Some(entry.ticket_type.clone()))
            }
            Err(InventoryError::UnknownTicketType(_)) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    async fn ticket_types_for_event(&self, event_id: Uuid) -> Result<Vec<TicketType>, BoxError> {
        let entries: Vec<Arc<Mutex<StockEntry>>> = self
            .entries
            .read()
            .expect("entry map poisoned")
            .values()
            .cloned()
            .collect();

        let mut result = Vec::new();
        for entry in entries {
            let entry = entry.lock().expect("stock entry poisoned");
            if entry.ticket_type.event_id == event_id {
                result.push(entry.ticket_type.clone());
            }
        }
        Ok(result)
    }

    async fn event(&self, id: Uuid) -> Result<Option<EventSummary>, BoxError> {
        Ok(self
            .events
            .read()
            .expect("event map poisoned")
            .get(&id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> MemoryInventoryLedger {
        MemoryInventoryLedger::new(Duration::seconds(900))
    }

    #[tokio::test]
    async fn test_reserve_release_commit_lifecycle() {
        let ledger = ledger();
        let tt = TicketType::new(Uuid::new_v4(), "General", 150_000, 100);
        let tt_id = tt.id;
        ledger.register(tt);

        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let reservation = ledger.reserve(tt_id, order_id, 10, now).await.unwrap();
        assert_eq!(ledger.stock_remaining(tt_id).await.unwrap(), 90);
        assert_eq!(reservation.state, ReservationState::Held);

        ledger.commit(reservation.id).await.unwrap();
        // Commit never restores stock; the decrement happened at reserve time.
        assert_eq!(ledger.stock_remaining(tt_id).await.unwrap(), 90);

        // Release after commit is a no-op, not an error.
        ledger.release(reservation.id).await.unwrap();
        assert_eq!(ledger.stock_remaining(tt_id).await.unwrap(), 90);
    }

    #[tokio::test]
    async fn test_double_release_is_noop() {
        let ledger = ledger();
        let tt = TicketType::new(Uuid::new_v4(), "General", 150_000, 10);
        let tt_id = tt.id;
        ledger.register(tt);

        let now = Utc::now();
        let reservation = ledger.reserve(tt_id, Uuid::new_v4(), 4, now).await.unwrap();
        assert_eq!(ledger.stock_remaining(tt_id).await.unwrap(), 6);

        ledger.release(reservation.id).await.unwrap();
        assert_eq!(ledger.stock_remaining(tt_id).await.unwrap(), 10);

        ledger.release(reservation.id).await.unwrap();
        assert_eq!(ledger.stock_remaining(tt_id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_insufficient_stock_leaves_count_unchanged() {
        let ledger = ledger();
        let tt = TicketType::new(Uuid::new_v4(), "General", 150_000, 10);
        let tt_id = tt.id;
        ledger.register(tt);

        let now = Utc::now();
        ledger.reserve(tt_id, Uuid::new_v4(), 7, now).await.unwrap();
        assert_eq!(ledger.stock_remaining(tt_id).await.unwrap(), 3);

        let err = ledger.reserve(tt_id, Uuid::new_v4(), 5, now).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientStock { requested: 5, available: 3 }
        ));
        assert_eq!(ledger.stock_remaining(tt_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_non_positive_quantity_rejected() {
        let ledger = ledger();
        let tt = TicketType::new(Uuid::new_v4(), "General", 150_000, 10);
        let tt_id = tt.id;
        ledger.register(tt);

        let now = Utc::now();
        for quantity in [0, -5] {
            let err = ledger
                .reserve(tt_id, Uuid::new_v4(), quantity, now)
                .await
                .unwrap_err();
            assert!(matches!(err, InventoryError::InvalidQuantity(q) if q == quantity));
        }
        // A negative reserve must never mint stock.
        assert_eq!(ledger.stock_remaining(tt_id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_window_and_limit_rejections() {
        let ledger = ledger();
        let now = Utc::now();

        let mut tt = TicketType::new(Uuid::new_v4(), "Early Bird", 90_000, 50);
        tt.available_until = Some(now - Duration::hours(1));
        let closed_id = tt.id;
        ledger.register(tt);

        let mut tt = TicketType::new(Uuid::new_v4(), "VIP", 500_000, 50);
        tt.max_per_purchase = Some(4);
        let limited_id = tt.id;
        ledger.register(tt);

        assert!(matches!(
            ledger.reserve(closed_id, Uuid::new_v4(), 1, now).await.unwrap_err(),
            InventoryError::OutsideAvailabilityWindow(_)
        ));
        assert!(matches!(
            ledger.reserve(limited_id, Uuid::new_v4(), 5, now).await.unwrap_err(),
            InventoryError::ExceedsPerPurchaseLimit { requested: 5, limit: 4 }
        ));
        assert_eq!(ledger.stock_remaining(closed_id).await.unwrap(), 50);
        assert_eq!(ledger.stock_remaining(limited_id).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_expired_holds_reported_and_releasable() {
        let ledger = MemoryInventoryLedger::new(Duration::seconds(60));
        let tt = TicketType::new(Uuid::new_v4(), "General", 150_000, 10);
        let tt_id = tt.id;
        ledger.register(tt);

        let order_id = Uuid::new_v4();
        let created = Utc::now() - Duration::seconds(120);
        ledger.reserve(tt_id, order_id, 7, created).await.unwrap();
        assert_eq!(ledger.stock_remaining(tt_id).await.unwrap(), 3);

        let expired = ledger.expired_holds(Utc::now()).await.unwrap();
        assert_eq!(expired, vec![order_id]);

        ledger.release_order(order_id).await.unwrap();
        assert_eq!(ledger.stock_remaining(tt_id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_concurrent_reserves_never_oversell() {
        let ledger = Arc::new(ledger());
        let tt = TicketType::new(Uuid::new_v4(), "General", 150_000, 50);
        let tt_id = tt.id;
        ledger.register(tt);

        let now = Utc::now();
        let mut handles = Vec::new();
        for _ in 0..100 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger.reserve(tt_id, Uuid::new_v4(), 1, now).await.is_ok()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 50);
        assert_eq!(ledger.stock_remaining(tt_id).await.unwrap(), 0);
    }
}
