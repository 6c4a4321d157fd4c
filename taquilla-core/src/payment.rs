use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BoxError;

/// Payment status as reported by the external provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderPaymentStatus {
    Approved,
    Pending,
    InProcess,
    Rejected,
    Cancelled,
    Expired,
}

/// Checkout session created with the provider before redirecting the buyer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub preference_id: String,
    pub redirect_url: String,
}

/// A payment as resolved from the provider, keyed by its own payment id.
///
/// `order_reference` is whatever we handed the provider at checkout time;
/// here it carries the order id as a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPayment {
    pub id: String,
    pub status: ProviderPaymentStatus,
    pub order_reference: String,
}

#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    /// Create a checkout session for an order with the provider.
    async fn create_checkout(
        &self,
        order_id: Uuid,
        total_cents: i64,
        description: &str,
    ) -> Result<CheckoutSession, BoxError>;

    /// Resolve a provider payment id to its current status and order reference.
    async fn get_payment(&self, provider_payment_id: &str) -> Result<ProviderPayment, BoxError>;
}
