use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use taquilla_core::pii::Masked;
use taquilla_core::BoxError;
use taquilla_order::models::{BuyerInfo, Order, OrderItem, PaymentStatus};
use taquilla_order::repository::OrderRepository;
use uuid::Uuid;

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    event_id: Uuid,
    buyer_full_name: String,
    buyer_email: String,
    buyer_phone: Option<String>,
    buyer_id_document: Option<String>,
    items_data: serde_json::Value,
    total_cents: i64,
    payment_status: String,
    provider_payment_id: Option<String>,
    preference_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self) -> Result<Order, BoxError> {
        let items: Vec<OrderItem> = serde_json::from_value(self.items_data)?;
        let payment_status = PaymentStatus::parse(&self.payment_status)
            .ok_or_else(|| format!("unknown payment status: {}", self.payment_status))?;

        Ok(Order {
            id: self.id,
            event_id: self.event_id,
            buyer: BuyerInfo {
                full_name: self.buyer_full_name,
                email: Masked(self.buyer_email),
                phone: self.buyer_phone,
                id_document: self.buyer_id_document,
            },
            items,
            total_cents: self.total_cents,
            payment_status,
            provider_payment_id: self.provider_payment_id,
            preference_id: self.preference_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const ORDER_COLUMNS: &str = "id, event_id, buyer_full_name, buyer_email, buyer_phone, \
     buyer_id_document, items_data, total_cents, payment_status, provider_payment_id, \
     preference_id, created_at, updated_at";

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert_order(&self, order: &Order) -> Result<(), BoxError> {
        let items_data = serde_json::to_value(&order.items)?;

        sqlx::query(
            "INSERT INTO orders (id, event_id, buyer_full_name, buyer_email, buyer_phone, \
             buyer_id_document, items_data, total_cents, payment_status, provider_payment_id, \
             preference_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(order.id)
        .bind(order.event_id)
        .bind(&order.buyer.full_name)
        .bind(&order.buyer.email.0)
        .bind(&order.buyer.phone)
        .bind(&order.buyer.id_document)
        .bind(items_data)
        .bind(order.total_cents)
        .bind(order.payment_status.as_str())
        .bind(&order.provider_payment_id)
        .bind(&order.preference_id)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>, BoxError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OrderRow::into_order).transpose()
    }

    async fn orders_for_event(&self, event_id: Uuid) -> Result<Vec<Order>, BoxError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE event_id = $1 ORDER BY created_at",
            ORDER_COLUMNS
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OrderRow::into_order).collect()
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<bool, BoxError> {
        // Single guarded UPDATE: the transition applies only if the order
        // is still in `from`, and rows_affected says who won.
        let result = sqlx::query(
            "UPDATE orders SET payment_status = $3, updated_at = $4 \
             WHERE id = $1 AND payment_status = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_payment_refs(
        &self,
        id: Uuid,
        provider_payment_id: Option<&str>,
        preference_id: Option<&str>,
    ) -> Result<(), BoxError> {
        sqlx::query(
            "UPDATE orders SET \
             provider_payment_id = COALESCE($2, provider_payment_id), \
             preference_id = COALESCE($3, preference_id), \
             updated_at = $4 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(provider_payment_id)
        .bind(preference_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
