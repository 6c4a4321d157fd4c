use std::sync::Arc;
use taquilla_core::payment::PaymentAdapter;
use taquilla_order::{CheckoutService, PaymentReconciler, TicketIssuer};

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub checkout: Arc<CheckoutService>,
    pub reconciler: Arc<PaymentReconciler>,
    pub issuer: Arc<TicketIssuer>,
    pub payments: Arc<dyn PaymentAdapter>,
    pub auth: AuthConfig,
}
