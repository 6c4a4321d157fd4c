use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use taquilla_core::BoxError;
use taquilla_order::models::PurchasedTicket;
use taquilla_order::repository::TicketRepository;
use uuid::Uuid;

pub struct PgTicketRepository {
    pool: PgPool,
}

impl PgTicketRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    order_id: Uuid,
    ticket_type_id: Uuid,
    redemption_code: String,
    validated_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<TicketRow> for PurchasedTicket {
    fn from(row: TicketRow) -> Self {
        PurchasedTicket {
            id: row.id,
            order_id: row.order_id,
            ticket_type_id: row.ticket_type_id,
            redemption_code: row.redemption_code,
            validated_at: row.validated_at,
            created_at: row.created_at,
        }
    }
}

const TICKET_COLUMNS: &str =
    "id, order_id, ticket_type_id, redemption_code, validated_at, created_at";

#[async_trait]
impl TicketRepository for PgTicketRepository {
    async fn insert_tickets(&self, tickets: &[PurchasedTicket]) -> Result<(), BoxError> {
        let mut tx = self.pool.begin().await?;

        for ticket in tickets {
            sqlx::query(
                "INSERT INTO purchased_tickets \
                 (id, order_id, ticket_type_id, redemption_code, validated_at, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(ticket.id)
            .bind(ticket.order_id)
            .bind(ticket.ticket_type_id)
            .bind(&ticket.redemption_code)
            .bind(ticket.validated_at)
            .bind(ticket.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<PurchasedTicket>, BoxError> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM purchased_tickets WHERE order_id = $1 ORDER BY created_at",
            TICKET_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PurchasedTicket::from).collect())
    }

    async fn ticket_by_code(&self, code: &str) -> Result<Option<PurchasedTicket>, BoxError> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM purchased_tickets WHERE redemption_code = $1",
            TICKET_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PurchasedTicket::from))
    }

    async fn mark_validated(&self, code: &str, at: DateTime<Utc>) -> Result<bool, BoxError> {
        // Two simultaneous scans race on this guarded UPDATE; exactly one
        // matches the IS NULL predicate.
        let result = sqlx::query(
            "UPDATE purchased_tickets SET validated_at = $2 \
             WHERE redemption_code = $1 AND validated_at IS NULL",
        )
        .bind(code)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
