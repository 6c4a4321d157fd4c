use chrono::{DateTime, Utc};
use std::sync::Arc;
use taquilla_core::BoxError;
use taquilla_catalog::inventory::InventoryLedger;

use crate::models::PaymentStatus;
use crate::repository::OrderRepository;

/// Reclaims stock from abandoned checkouts.
///
/// For each order with expired holds the sweeper first tries the
/// PENDING→EXPIRED transition; only when that compare-and-swap wins does it
/// release the stock. A payment confirming a moment before the sweep takes
/// the order out of PENDING, so its reservations are never touched.
pub struct ReservationSweeper {
    orders: Arc<dyn OrderRepository>,
    ledger: Arc<dyn InventoryLedger>,
}

impl ReservationSweeper {
    pub fn new(orders: Arc<dyn OrderRepository>, ledger: Arc<dyn InventoryLedger>) -> Self {
        Self { orders, ledger }
    }

    /// Run one sweep pass; returns how many orders were expired.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, BoxError> {
        let candidates = self.ledger.expired_holds(now).await?;
        let mut expired = 0;

        for order_id in candidates {
            let applied = self
                .orders
                .transition_status(order_id, PaymentStatus::Pending, PaymentStatus::Expired)
                .await?;
            if !applied {
                // Paid, cancelled, or already expired meanwhile. Skip.
                continue;
            }

            self.ledger.release_order(order_id).await?;
            tracing::info!(order_id = %order_id, "expired abandoned order, stock released");
            expired += 1;
        }

        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::{CheckoutService, RequestedItem};
    use crate::issuer::TicketIssuer;
    use crate::memory::{MemoryOrderRepository, MemoryTicketRepository};
    use crate::models::BuyerInfo;
    use crate::reconciler::{MockPaymentAdapter, PaymentReconciler};
    use chrono::Duration;
    use taquilla_catalog::inventory::MemoryInventoryLedger;
    use taquilla_catalog::ticket_type::{EventSummary, TicketType};
    use taquilla_core::payment::ProviderPaymentStatus;
    use taquilla_core::pii::Masked;
    use uuid::Uuid;

    struct Fixture {
        ledger: Arc<MemoryInventoryLedger>,
        orders: Arc<MemoryOrderRepository>,
        checkout: CheckoutService,
        reconciler: Arc<PaymentReconciler>,
        sweeper: ReservationSweeper,
        event_id: Uuid,
    }

    fn fixture(hold_seconds: i64) -> Fixture {
        let ledger = Arc::new(MemoryInventoryLedger::new(Duration::seconds(hold_seconds)));
        let orders = Arc::new(MemoryOrderRepository::new());
        let event_id = Uuid::new_v4();
        ledger.register_event(EventSummary {
            id: event_id,
            organizer_id: "org-1".to_string(),
            name: "Fiesta Nacional".to_string(),
        });

        let issuer = Arc::new(TicketIssuer::new(
            Arc::new(MemoryTicketRepository::new()),
            orders.clone(),
            ledger.clone(),
        ));
        let reconciler = Arc::new(PaymentReconciler::new(
            orders.clone(),
            ledger.clone(),
            issuer,
        ));
        let checkout = CheckoutService::new(
            ledger.clone(),
            ledger.clone(),
            orders.clone(),
            Arc::new(MockPaymentAdapter::new()),
        );
        let sweeper = ReservationSweeper::new(orders.clone(), ledger.clone());

        Fixture {
            ledger,
            orders,
            checkout,
            reconciler,
            sweeper,
            event_id,
        }
    }

    fn buyer() -> BuyerInfo {
        BuyerInfo {
            full_name: "Ada Lovelace".to_string(),
            email: Masked("ada@example.com".to_string()),
            phone: None,
            id_document: None,
        }
    }

    #[tokio::test]
    async fn test_abandoned_order_returns_stock() {
        // Hold window already elapsed for anything reserved "now".
        let fx = fixture(-1);
        let tt = TicketType::new(fx.event_id, "General", 150_000, 10);
        let tt_id = tt.id;
        fx.ledger.register(tt);

        let order = fx
            .checkout
            .create(
                fx.event_id,
                buyer(),
                vec![RequestedItem { ticket_type_id: tt_id, quantity: 7 }],
            )
            .await
            .unwrap();
        assert_eq!(fx.ledger.stock_remaining(tt_id).await.unwrap(), 3);

        let expired = fx.sweeper.sweep(Utc::now()).await.unwrap();
        assert_eq!(expired, 1);
        assert_eq!(fx.ledger.stock_remaining(tt_id).await.unwrap(), 10);

        let reloaded = fx.orders.order(order.id).await.unwrap().unwrap();
        assert_eq!(reloaded.payment_status, crate::models::PaymentStatus::Expired);

        // A second pass finds nothing left to do.
        assert_eq!(fx.sweeper.sweep(Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_payment_just_before_sweep_wins() {
        let fx = fixture(-1);
        let tt = TicketType::new(fx.event_id, "General", 150_000, 10);
        let tt_id = tt.id;
        fx.ledger.register(tt);

        let order = fx
            .checkout
            .create(
                fx.event_id,
                buyer(),
                vec![RequestedItem { ticket_type_id: tt_id, quantity: 4 }],
            )
            .await
            .unwrap();

        fx.reconciler
            .handle_notification("pay-1", ProviderPaymentStatus::Approved, &order.id.to_string())
            .await
            .unwrap();

        // The hold is past its expiry but the order is PAID: the sweeper
        // must leave it entirely alone.
        let expired = fx.sweeper.sweep(Utc::now()).await.unwrap();
        assert_eq!(expired, 0);
        assert_eq!(fx.ledger.stock_remaining(tt_id).await.unwrap(), 6);

        let reloaded = fx.orders.order(order.id).await.unwrap().unwrap();
        assert_eq!(reloaded.payment_status, crate::models::PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_live_holds_untouched() {
        let fx = fixture(900);
        let tt = TicketType::new(fx.event_id, "General", 150_000, 10);
        let tt_id = tt.id;
        fx.ledger.register(tt);

        fx.checkout
            .create(
                fx.event_id,
                buyer(),
                vec![RequestedItem { ticket_type_id: tt_id, quantity: 2 }],
            )
            .await
            .unwrap();

        let expired = fx.sweeper.sweep(Utc::now()).await.unwrap();
        assert_eq!(expired, 0);
        assert_eq!(fx.ledger.stock_remaining(tt_id).await.unwrap(), 8);
    }
}
