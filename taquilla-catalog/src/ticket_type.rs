use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taquilla_core::BoxError;
use uuid::Uuid;

/// Minimal projection of an event, carried only for ownership checks and
/// organizer-scoped queries. Full event management lives with the admin
/// collaborator, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: Uuid,
    pub organizer_id: String,
    pub name: String,
}

/// A purchasable category of admission for one event ("General", "VIP").
///
/// This is a read model: `stock_remaining` is authoritative only inside the
/// inventory ledger and must never be written outside of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketType {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub stock_initial: i64,
    pub stock_remaining: i64,
    pub max_per_purchase: Option<i64>,
    pub available_from: Option<DateTime<Utc>>,
    pub available_until: Option<DateTime<Utc>>,
    pub valid_any_event_day: bool,
}

impl TicketType {
    pub fn new(event_id: Uuid, name: impl Into<String>, price_cents: i64, stock_initial: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            name: name.into(),
            description: None,
            price_cents,
            stock_initial,
            stock_remaining: stock_initial,
            max_per_purchase: None,
            available_from: None,
            available_until: None,
            valid_any_event_day: false,
        }
    }

    /// Whether this ticket type can be sold at `now` (availability window).
    pub fn is_on_sale(&self, now: DateTime<Utc>) -> bool {
        if let Some(from) = self.available_from {
            if now < from {
                return false;
            }
        }
        if let Some(until) = self.available_until {
            if now > until {
                return false;
            }
        }
        true
    }

    /// Whether `quantity` respects the per-purchase limit, when one is set.
    pub fn allows_quantity(&self, quantity: i64) -> bool {
        match self.max_per_purchase {
            Some(limit) => quantity <= limit,
            None => true,
        }
    }
}

/// Read access to ticket types and their events.
#[async_trait]
pub trait TicketTypeRepository: Send + Sync {
    async fn ticket_type(&self, id: Uuid) -> Result<Option<TicketType>, BoxError>;

    async fn ticket_types_for_event(&self, event_id: Uuid) -> Result<Vec<TicketType>, BoxError>;

    async fn event(&self, id: Uuid) -> Result<Option<EventSummary>, BoxError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_availability_window() {
        let now = Utc::now();
        let mut tt = TicketType::new(Uuid::new_v4(), "General", 150_000, 100);
        assert!(tt.is_on_sale(now));

        tt.available_from = Some(now + Duration::hours(1));
        assert!(!tt.is_on_sale(now));

        tt.available_from = Some(now - Duration::hours(2));
        tt.available_until = Some(now - Duration::hours(1));
        assert!(!tt.is_on_sale(now));

        tt.available_until = Some(now + Duration::hours(1));
        assert!(tt.is_on_sale(now));
    }

    #[test]
    fn test_per_purchase_limit() {
        let mut tt = TicketType::new(Uuid::new_v4(), "VIP", 500_000, 20);
        assert!(tt.allows_quantity(20));

        tt.max_per_purchase = Some(4);
        assert!(tt.allows_quantity(4));
        assert!(!tt.allows_quantity(5));
    }
}
