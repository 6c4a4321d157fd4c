use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use taquilla_core::BoxError;
use taquilla_catalog::ticket_type::{EventSummary, TicketType, TicketTypeRepository};
use uuid::Uuid;

pub struct PgCatalogRepository {
    pool: PgPool,
}

impl PgCatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TicketTypeRow {
    id: Uuid,
    event_id: Uuid,
    name: String,
    description: Option<String>,
    price_cents: i64,
    stock_initial: i64,
    stock_remaining: i64,
    max_per_purchase: Option<i64>,
    available_from: Option<DateTime<Utc>>,
    available_until: Option<DateTime<Utc>>,
    valid_any_event_day: bool,
}

impl From<TicketTypeRow> for TicketType {
    fn from(row: TicketTypeRow) -> Self {
        TicketType {
            id: row.id,
            event_id: row.event_id,
            name: row.name,
            description: row.description,
            price_cents: row.price_cents,
            stock_initial: row.stock_initial,
            stock_remaining: row.stock_remaining,
            max_per_purchase: row.max_per_purchase,
            available_from: row.available_from,
            available_until: row.available_until,
            valid_any_event_day: row.valid_any_event_day,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    organizer_id: String,
    name: String,
}

const TICKET_TYPE_COLUMNS: &str = "id, event_id, name, description, price_cents, stock_initial, \
     stock_remaining, max_per_purchase, available_from, available_until, valid_any_event_day";

#[async_trait]
impl TicketTypeRepository for PgCatalogRepository {
    async fn ticket_type(&self, id: Uuid) -> Result<Option<TicketType>, BoxError> {
        let row = sqlx::query_as::<_, TicketTypeRow>(&format!(
            "SELECT {} FROM ticket_types WHERE id = $1",
            TICKET_TYPE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(TicketType::from))
    }

    async fn ticket_types_for_event(&self, event_id: Uuid) -> Result<Vec<TicketType>, BoxError> {
        let rows = sqlx::query_as::<_, TicketTypeRow>(&format!(
            "SELECT {} FROM ticket_types WHERE event_id = $1 ORDER BY created_at",
            TICKET_TYPE_COLUMNS
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TicketType::from).collect())
    }

    async fn event(&self, id: Uuid) -> Result<Option<EventSummary>, BoxError> {
        let row =
            sqlx::query_as::<_, EventRow>("SELECT id, organizer_id, name FROM events WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|r| EventSummary {
            id: r.id,
            organizer_id: r.organizer_id,
            name: r.name,
        }))
    }
}
