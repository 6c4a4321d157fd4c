use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use taquilla_core::payment::{
    CheckoutSession, PaymentAdapter, ProviderPayment, ProviderPaymentStatus,
};
use taquilla_core::BoxError;
use taquilla_catalog::inventory::{InventoryError, InventoryLedger};
use uuid::Uuid;

use crate::issuer::{IssueError, TicketIssuer};
use crate::models::PaymentStatus;
use crate::repository::OrderRepository;

/// Outcome of a provider notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The notification moved the order into this status.
    Applied(PaymentStatus),
    /// Duplicate or stale notification; acknowledged without effect.
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("no order matches payment reference {0}")]
    UnknownOrder(String),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Issue(#[from] IssueError),

    #[error("storage error: {0}")]
    Store(BoxError),
}

/// Drives order state transitions from asynchronous, possibly duplicated,
/// possibly out-of-order payment-provider notifications.
///
/// Idempotency comes from two layers: a per-order async lock serializes
/// callbacks for the same order, and the repository's compare-and-swap
/// transition only fires from PENDING. Notifications for different orders
/// run fully in parallel.
pub struct PaymentReconciler {
    orders: Arc<dyn OrderRepository>,
    ledger: Arc<dyn InventoryLedger>,
    issuer: Arc<TicketIssuer>,
    order_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl PaymentReconciler {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        ledger: Arc<dyn InventoryLedger>,
        issuer: Arc<TicketIssuer>,
    ) -> Self {
        Self {
            orders,
            ledger,
            issuer,
            order_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn handle_notification(
        &self,
        provider_payment_id: &str,
        reported: ProviderPaymentStatus,
        order_reference: &str,
    ) -> Result<Ack, ReconcileError> {
        let order_id = Uuid::parse_str(order_reference)
            .map_err(|_| ReconcileError::UnknownOrder(order_reference.to_string()))?;

        let lock = self.lock_for(order_id);
        let result = {
            let _guard = lock.lock().await;
            self.apply(order_id, provider_payment_id, reported, order_reference)
                .await
        };
        drop(lock);
        self.prune_lock(order_id);
        result
    }

    async fn apply(
        &self,
        order_id: Uuid,
        provider_payment_id: &str,
        reported: ProviderPaymentStatus,
        order_reference: &str,
    ) -> Result<Ack, ReconcileError> {
        let order = self
            .orders
            .order(order_id)
            .await
            .map_err(ReconcileError::Store)?
            .ok_or_else(|| ReconcileError::UnknownOrder(order_reference.to_string()))?;

        self.orders
            .set_payment_refs(order_id, Some(provider_payment_id), None)
            .await
            .map_err(ReconcileError::Store)?;

        let target = match reported {
            ProviderPaymentStatus::Approved => PaymentStatus::Paid,
            ProviderPaymentStatus::Rejected | ProviderPaymentStatus::Cancelled => {
                PaymentStatus::Failed
            }
            ProviderPaymentStatus::Expired => PaymentStatus::Expired,
            // The provider is still working on it; nothing to transition.
            ProviderPaymentStatus::Pending | ProviderPaymentStatus::InProcess => {
                return Ok(Ack::Ignored)
            }
        };

        if order.payment_status.is_terminal() {
            // Repair path: a PAID order with no tickets means a previous
            // delivery crashed between the transition and issuance. The
            // provider's retry finishes the job; otherwise it's a
            // duplicate or an out-of-order late status, which never
            // regresses a terminal order.
            if order.payment_status == PaymentStatus::Paid && target == PaymentStatus::Paid {
                // Holds may also still be HELD after such a crash, which
                // would keep the order on the sweeper's candidate list.
                self.ledger.commit_order(order_id).await?;
                match self.issuer.issue(&order).await {
                    Ok(_) => return Ok(Ack::Applied(PaymentStatus::Paid)),
                    Err(IssueError::AlreadyIssued(_)) => return Ok(Ack::Ignored),
                    Err(e) => return Err(e.into()),
                }
            }
            tracing::warn!(
                order_id = %order_id,
                current = order.payment_status.as_str(),
                reported = ?reported,
                "ignoring stale payment notification"
            );
            return Ok(Ack::Ignored);
        }

        let applied = self
            .orders
            .transition_status(order_id, PaymentStatus::Pending, target)
            .await
            .map_err(ReconcileError::Store)?;
        if !applied {
            // Lost a race with the sweeper or a cancel; nothing to do.
            return Ok(Ack::Ignored);
        }

        match target {
            PaymentStatus::Paid => {
                self.ledger.commit_order(order_id).await?;
                self.issuer.issue(&order).await?;
                tracing::info!(order_id = %order_id, "payment confirmed, tickets issued");
            }
            PaymentStatus::Failed | PaymentStatus::Expired => {
                self.ledger.release_order(order_id).await?;
                tracing::info!(
                    order_id = %order_id,
                    status = target.as_str(),
                    "payment did not complete, reservations released"
                );
            }
            _ => {}
        }

        Ok(Ack::Applied(target))
    }

    fn lock_for(&self, order_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.order_locks.lock().expect("order lock map poisoned");
        locks.entry(order_id).or_default().clone()
    }

    /// Drop an order's lock entry once no notification holds it, so the
    /// map does not grow one entry per order for the process lifetime.
    /// `lock_for` and this both run under the map mutex, so a concurrent
    /// caller either holds a clone (strong_count > 1, keep) or will
    /// re-create the entry afterwards.
    fn prune_lock(&self, order_id: Uuid) {
        let mut locks = self.order_locks.lock().expect("order lock map poisoned");
        if locks
            .get(&order_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&order_id);
        }
    }

    #[cfg(test)]
    fn order_lock_count(&self) -> usize {
        self.order_locks.lock().expect("order lock map poisoned").len()
    }
}

/// Adapter used in tests and local runs; real deployments plug a provider
/// SDK behind the same trait.
pub struct MockPaymentAdapter {
    checkout_base_url: String,
    payments: Mutex<HashMap<String, ProviderPayment>>,
}

impl MockPaymentAdapter {
    pub fn new() -> Self {
        Self::with_checkout_base("https://checkout.invalid/pay")
    }

    /// Base URL buyers are redirected to, normally taken from
    /// `payment.checkout_base_url` in the app config.
    pub fn with_checkout_base(base_url: impl Into<String>) -> Self {
        Self {
            checkout_base_url: base_url.into(),
            payments: Mutex::new(HashMap::new()),
        }
    }

    /// Script what the provider will report for a payment id.
    pub fn script_payment(
        &self,
        provider_payment_id: &str,
        status: ProviderPaymentStatus,
        order_reference: &str,
    ) {
        self.payments.lock().expect("mock payment map poisoned").insert(
            provider_payment_id.to_string(),
            ProviderPayment {
                id: provider_payment_id.to_string(),
                status,
                order_reference: order_reference.to_string(),
            },
        );
    }
}

impl Default for MockPaymentAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentAdapter for MockPaymentAdapter {
    async fn create_checkout(
        &self,
        order_id: Uuid,
        _total_cents: i64,
        _description: &str,
    ) -> Result<CheckoutSession, BoxError> {
        // Encode the order id in the preference so the mock can resolve it.
        let preference_id = format!("mock_pref_{}", order_id.simple());
        Ok(CheckoutSession {
            redirect_url: format!("{}/{}", self.checkout_base_url, preference_id),
            preference_id,
        })
    }

    async fn get_payment(&self, provider_payment_id: &str) -> Result<ProviderPayment, BoxError> {
        self.payments
            .lock()
            .expect("mock payment map poisoned")
            .get(provider_payment_id)
            .cloned()
            .ok_or_else(|| format!("unknown payment id: {}", provider_payment_id).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::{CheckoutService, RequestedItem};
    use crate::memory::{MemoryOrderRepository, MemoryTicketRepository};
    use crate::models::{BuyerInfo, Order};
    use chrono::Duration;
    use taquilla_catalog::inventory::MemoryInventoryLedger;
    use taquilla_catalog::ticket_type::{EventSummary, TicketType};
    use taquilla_core::pii::Masked;

    struct Fixture {
        ledger: Arc<MemoryInventoryLedger>,
        orders: Arc<MemoryOrderRepository>,
        issuer: Arc<TicketIssuer>,
        reconciler: Arc<PaymentReconciler>,
        checkout: CheckoutService,
        event_id: Uuid,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(MemoryInventoryLedger::new(Duration::seconds(900)));
        let orders = Arc::new(MemoryOrderRepository::new());
        let tickets = Arc::new(MemoryTicketRepository::new());
        let event_id = Uuid::new_v4();
        ledger.register_event(EventSummary {
            id: event_id,
            organizer_id: "org-1".to_string(),
            name: "Fiesta Nacional".to_string(),
        });

        let issuer = Arc::new(TicketIssuer::new(tickets, orders.clone(), ledger.clone()));
        let reconciler = Arc::new(PaymentReconciler::new(
            orders.clone(),
            ledger.clone(),
            issuer.clone(),
        ));
        let checkout = CheckoutService::new(
            ledger.clone(),
            ledger.clone(),
            orders.clone(),
            Arc::new(MockPaymentAdapter::new()),
        );

        Fixture {
            ledger,
            orders,
            issuer,
            reconciler,
            checkout,
            event_id,
        }
    }

    async fn pending_order(fx: &Fixture, ticket_type_id: Uuid, quantity: i64) -> Order {
        let buyer = BuyerInfo {
            full_name: "Ada Lovelace".to_string(),
            email: Masked("ada@example.com".to_string()),
            phone: None,
            id_document: None,
        };
        fx.checkout
            .create(
                fx.event_id,
                buyer,
                vec![RequestedItem { ticket_type_id, quantity }],
            )
            .await
            .unwrap()
    }

    fn seed(fx: &Fixture, stock: i64) -> Uuid {
        let tt = TicketType::new(fx.event_id, "General", 150_000, stock);
        let id = tt.id;
        fx.ledger.register(tt);
        id
    }

    #[tokio::test]
    async fn test_approved_notification_pays_and_issues() {
        let fx = fixture();
        let tt = seed(&fx, 10);
        let order = pending_order(&fx, tt, 3).await;
        let reference = order.id.to_string();

        let ack = fx
            .reconciler
            .handle_notification("pay-1", ProviderPaymentStatus::Approved, &reference)
            .await
            .unwrap();
        assert_eq!(ack, Ack::Applied(PaymentStatus::Paid));

        let reloaded = fx.orders.order(order.id).await.unwrap().unwrap();
        assert_eq!(reloaded.payment_status, PaymentStatus::Paid);
        assert_eq!(reloaded.provider_payment_id.as_deref(), Some("pay-1"));

        let tickets = fx.issuer.tickets_for_order(order.id).await.unwrap();
        assert_eq!(tickets.len(), 3);

        // Committed stock stays decremented, even if a stray release lands.
        fx.ledger.release_order(order.id).await.unwrap();
        assert_eq!(fx.ledger.stock_remaining(tt).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_duplicate_approved_issues_once() {
        let fx = fixture();
        let tt = seed(&fx, 10);
        let order = pending_order(&fx, tt, 2).await;
        let reference = order.id.to_string();

        for _ in 0..3 {
            fx.reconciler
                .handle_notification("pay-1", ProviderPaymentStatus::Approved, &reference)
                .await
                .unwrap();
        }

        let tickets = fx.issuer.tickets_for_order(order.id).await.unwrap();
        assert_eq!(tickets.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_issue_once() {
        let fx = fixture();
        let tt = seed(&fx, 10);
        let order = pending_order(&fx, tt, 2).await;
        let reference = order.id.to_string();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let reconciler = fx.reconciler.clone();
            let reference = reference.clone();
            handles.push(tokio::spawn(async move {
                reconciler
                    .handle_notification("pay-1", ProviderPaymentStatus::Approved, &reference)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let tickets = fx.issuer.tickets_for_order(order.id).await.unwrap();
        assert_eq!(tickets.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_after_paid_does_not_regress() {
        let fx = fixture();
        let tt = seed(&fx, 10);
        let order = pending_order(&fx, tt, 2).await;
        let reference = order.id.to_string();

        fx.reconciler
            .handle_notification("pay-1", ProviderPaymentStatus::Approved, &reference)
            .await
            .unwrap();
        let ack = fx
            .reconciler
            .handle_notification("pay-1", ProviderPaymentStatus::Rejected, &reference)
            .await
            .unwrap();
        assert_eq!(ack, Ack::Ignored);

        let reloaded = fx.orders.order(order.id).await.unwrap().unwrap();
        assert_eq!(reloaded.payment_status, PaymentStatus::Paid);
        // Paid stock stays consumed.
        assert_eq!(fx.ledger.stock_remaining(tt).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_rejection_releases_stock() {
        let fx = fixture();
        let tt = seed(&fx, 10);
        let order = pending_order(&fx, tt, 4).await;
        assert_eq!(fx.ledger.stock_remaining(tt).await.unwrap(), 6);

        let ack = fx
            .reconciler
            .handle_notification("pay-1", ProviderPaymentStatus::Rejected, &order.id.to_string())
            .await
            .unwrap();
        assert_eq!(ack, Ack::Applied(PaymentStatus::Failed));
        assert_eq!(fx.ledger.stock_remaining(tt).await.unwrap(), 10);
        assert!(fx
            .issuer
            .tickets_for_order(order.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_in_process_keeps_order_pending() {
        let fx = fixture();
        let tt = seed(&fx, 10);
        let order = pending_order(&fx, tt, 1).await;

        let ack = fx
            .reconciler
            .handle_notification("pay-1", ProviderPaymentStatus::InProcess, &order.id.to_string())
            .await
            .unwrap();
        assert_eq!(ack, Ack::Ignored);

        let reloaded = fx.orders.order(order.id).await.unwrap().unwrap();
        assert_eq!(reloaded.payment_status, PaymentStatus::Pending);
        assert_eq!(reloaded.provider_payment_id.as_deref(), Some("pay-1"));
    }

    #[tokio::test]
    async fn test_repair_commits_stranded_holds() {
        // Short hold window so the stranded holds show up as expired.
        let ledger = Arc::new(MemoryInventoryLedger::new(Duration::seconds(-1)));
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
        let reconciler = PaymentReconciler::new(orders.clone(), ledger.clone(), issuer.clone());
        let checkout = CheckoutService::new(
            ledger.clone(),
            ledger.clone(),
            orders.clone(),
            Arc::new(MockPaymentAdapter::new()),
        );

        let tt = TicketType::new(event_id, "General", 150_000, 10);
        let tt_id = tt.id;
        ledger.register(tt);
        let buyer = BuyerInfo {
            full_name: "Ada Lovelace".to_string(),
            email: Masked("ada@example.com".to_string()),
            phone: None,
            id_document: None,
        };
        let order = checkout
            .create(
                event_id,
                buyer,
                vec![RequestedItem { ticket_type_id: tt_id, quantity: 2 }],
            )
            .await
            .unwrap();

        // Simulate a crash after the PAID transition but before commit
        // and issuance: order is PAID, reservations still HELD.
        assert!(orders
            .transition_status(order.id, PaymentStatus::Pending, PaymentStatus::Paid)
            .await
            .unwrap());
        assert_eq!(
            ledger.expired_holds(chrono::Utc::now()).await.unwrap(),
            vec![order.id]
        );

        let ack = reconciler
            .handle_notification("pay-1", ProviderPaymentStatus::Approved, &order.id.to_string())
            .await
            .unwrap();
        assert_eq!(ack, Ack::Applied(PaymentStatus::Paid));

        // The retry finished the job: tickets exist and the holds are
        // committed, so the sweeper's candidate list drains.
        assert_eq!(issuer.tickets_for_order(order.id).await.unwrap().len(), 2);
        assert!(ledger.expired_holds(chrono::Utc::now()).await.unwrap().is_empty());
        assert_eq!(ledger.stock_remaining(tt_id).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_order_locks_dropped_after_notification() {
        let fx = fixture();
        let tt = seed(&fx, 10);
        let order = pending_order(&fx, tt, 2).await;
        let reference = order.id.to_string();

        for _ in 0..3 {
            fx.reconciler
                .handle_notification("pay-1", ProviderPaymentStatus::Approved, &reference)
                .await
                .unwrap();
        }
        assert_eq!(fx.reconciler.order_lock_count(), 0);

        // Contended notifications also leave nothing behind once done.
        let mut handles = Vec::new();
        for _ in 0..8 {
            let reconciler = fx.reconciler.clone();
            let reference = reference.clone();
            handles.push(tokio::spawn(async move {
                reconciler
                    .handle_notification("pay-1", ProviderPaymentStatus::Approved, &reference)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(fx.reconciler.order_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_checkout_redirect_uses_configured_base() {
        let adapter = MockPaymentAdapter::with_checkout_base("https://pay.example.com/checkout");
        let session = adapter
            .create_checkout(Uuid::new_v4(), 150_000, "Order")
            .await
            .unwrap();
        assert_eq!(
            session.redirect_url,
            format!("https://pay.example.com/checkout/{}", session.preference_id)
        );
    }

    #[tokio::test]
    async fn test_unknown_reference_is_an_error() {
        let fx = fixture();
        let err = fx
            .reconciler
            .handle_notification(
                "pay-1",
                ProviderPaymentStatus::Approved,
                &Uuid::new_v4().to_string(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownOrder(_)));

        let err = fx
            .reconciler
            .handle_notification("pay-1", ProviderPaymentStatus::Approved, "not-a-uuid")
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownOrder(_)));
    }
}
