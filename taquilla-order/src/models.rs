use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taquilla_core::pii::Masked;
use uuid::Uuid;

/// Payment status of an order over its lifecycle.
///
/// PENDING is the only non-terminal state. PAID is one-way terminal with
/// respect to provider notifications: nothing regresses a paid order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Expired,
    Cancelled,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Expired => "EXPIRED",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(PaymentStatus::Pending),
            "PAID" => Some(PaymentStatus::Paid),
            "FAILED" => Some(PaymentStatus::Failed),
            "EXPIRED" => Some(PaymentStatus::Expired),
            "CANCELLED" => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }
}

/// Buyer contact details captured at checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyerInfo {
    pub full_name: String,
    pub email: Masked<String>,
    pub phone: Option<String>,
    pub id_document: Option<String>,
}

/// One order line: a snapshot of quantity and unit price taken at order
/// creation. Prices are never re-derived from the live catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub ticket_type_id: Uuid,
    pub ticket_type_name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

impl OrderItem {
    pub fn line_total_cents(&self) -> i64 {
        self.unit_price_cents * self.quantity
    }
}

/// A buyer's purchase intent for one event. Never deleted once PAID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub event_id: Uuid,
    pub buyer: BuyerInfo,
    pub items: Vec<OrderItem>,
    pub total_cents: i64,
    pub payment_status: PaymentStatus,
    pub provider_payment_id: Option<String>,
    pub preference_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(event_id: Uuid, buyer: BuyerInfo, items: Vec<OrderItem>) -> Self {
        let now = Utc::now();
        let total_cents = items.iter().map(OrderItem::line_total_cents).sum();
        Self {
            id: Uuid::new_v4(),
            event_id,
            buyer,
            items,
            total_cents,
            payment_status: PaymentStatus::Pending,
            provider_payment_id: None,
            preference_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Total number of admission units across all lines.
    pub fn unit_count(&self) -> i64 {
        self.items.iter().map(|item| item.quantity).sum()
    }
}

/// One materialized admission, created strictly after the order is PAID.
/// Immutable except for the single `validated_at` write at scan time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchasedTicket {
    pub id: Uuid,
    pub order_id: Uuid,
    pub ticket_type_id: Uuid,
    pub redemption_code: String,
    pub validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PurchasedTicket {
    pub fn new(order_id: Uuid, ticket_type_id: Uuid, redemption_code: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            ticket_type_id,
            redemption_code,
            validated_at: None,
            created_at: Utc::now(),
        }
    }

    /// Scannable QR payload for this ticket.
    pub fn qr_payload(&self) -> String {
        serde_json::json!({
            "code": self.redemption_code,
            "order_id": self.order_id,
            "ticket_type_id": self.ticket_type_id,
        })
        .to_string()
    }
}
