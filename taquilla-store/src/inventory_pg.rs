use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use taquilla_catalog::inventory::{
    InventoryError, InventoryLedger, Reservation, ReservationState,
};
use uuid::Uuid;

/// Postgres-backed inventory ledger.
///
/// `SELECT ... FOR UPDATE` on the ticket-type row scopes the serialization
/// to exactly one row: concurrent reserves on the same type queue behind
/// the lock, reserves on different types proceed in parallel, and the
/// stock check plus decrement commit in the same transaction.
pub struct PgInventoryLedger {
    pool: PgPool,
    hold_window: Duration,
}

impl PgInventoryLedger {
    pub fn new(pool: PgPool, hold_window: Duration) -> Self {
        Self { pool, hold_window }
    }

    fn store_err(e: impl std::fmt::Display) -> InventoryError {
        InventoryError::Store(e.to_string())
    }
}

#[derive(sqlx::FromRow)]
struct StockRow {
    stock_remaining: i64,
    max_per_purchase: Option<i64>,
    available_from: Option<DateTime<Utc>>,
    available_until: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct HeldRow {
    ticket_type_id: Uuid,
    quantity: i64,
}

#[async_trait]
impl InventoryLedger for PgInventoryLedger {
    async fn reserve(
        &self,
        ticket_type_id: Uuid,
        order_id: Uuid,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> Result<Reservation, InventoryError> {
        // Same guard as the in-memory ledger; without it a negative
        // quantity only dies on the CHECK constraint as an opaque error.
        if quantity < 1 {
            return Err(InventoryError::InvalidQuantity(quantity));
        }

        let mut tx = self.pool.begin().await.map_err(Self::store_err)?;

        let row = sqlx::query_as::<_, StockRow>(
            "SELECT stock_remaining, max_per_purchase, available_from, available_until \
             FROM ticket_types WHERE id = $1 FOR UPDATE",
        )
        .bind(ticket_type_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Self::store_err)?
        .ok_or(InventoryError::UnknownTicketType(ticket_type_id))?;

        if row.available_from.is_some_and(|from| now < from)
            || row.available_until.is_some_and(|until| now > until)
        {
            return Err(InventoryError::OutsideAvailabilityWindow(ticket_type_id));
        }
        if let Some(limit) = row.max_per_purchase {
            if quantity > limit {
                return Err(InventoryError::ExceedsPerPurchaseLimit {
                    requested: quantity,
                    limit,
                });
            }
        }
        if quantity > row.stock_remaining {
            return Err(InventoryError::InsufficientStock {
                requested: quantity,
                available: row.stock_remaining,
            });
        }

        sqlx::query("UPDATE ticket_types SET stock_remaining = stock_remaining - $2 WHERE id = $1")
            .bind(ticket_type_id)
            .bind(quantity)
            .execute(&mut *tx)
            .await
            .map_err(Self::store_err)?;

        let reservation = Reservation {
            id: Uuid::new_v4(),
            ticket_type_id,
            order_id,
            quantity,
            state: ReservationState::Held,
            expires_at: now + self.hold_window,
        };

        sqlx::query(
            "INSERT INTO reservations (id, ticket_type_id, order_id, quantity, state, expires_at) \
             VALUES ($1, $2, $3, $4, 'HELD', $5)",
        )
        .bind(reservation.id)
        .bind(ticket_type_id)
        .bind(order_id)
        .bind(quantity)
        .bind(reservation.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(Self::store_err)?;

        tx.commit().await.map_err(Self::store_err)?;
        Ok(reservation)
    }

    async fn release(&self, token: Uuid) -> Result<(), InventoryError> {
        let mut tx = self.pool.begin().await.map_err(Self::store_err)?;

        // Flipping HELD -> RELEASED and restoring stock in one transaction
        // keeps duplicate release callbacks harmless: the guard matches at
        // most once per token.
        let released = sqlx::query_as::<_, HeldRow>(
            "UPDATE reservations SET state = 'RELEASED' \
             WHERE id = $1 AND state = 'HELD' \
             RETURNING ticket_type_id, quantity",
        )
        .bind(token)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Self::store_err)?;

        if let Some(row) = released {
            sqlx::query(
                "UPDATE ticket_types SET stock_remaining = stock_remaining + $2 WHERE id = $1",
            )
            .bind(row.ticket_type_id)
            .bind(row.quantity)
            .execute(&mut *tx)
            .await
            .map_err(Self::store_err)?;
        }

        tx.commit().await.map_err(Self::store_err)?;
        Ok(())
    }

    async fn commit(&self, token: Uuid) -> Result<(), InventoryError> {
        sqlx::query("UPDATE reservations SET state = 'COMMITTED' WHERE id = $1 AND state = 'HELD'")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(Self::store_err)?;
        Ok(())
    }

    async fn release_order(&self, order_id: Uuid) -> Result<(), InventoryError> {
        let mut tx = self.pool.begin().await.map_err(Self::store_err)?;

        let mut released = sqlx::query_as::<_, HeldRow>(
            "UPDATE reservations SET state = 'RELEASED' \
             WHERE order_id = $1 AND state = 'HELD' \
             RETURNING ticket_type_id, quantity",
        )
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(Self::store_err)?;

        // Ascending ticket_type_id, same order reserves lock in.
        released.sort_by_key(|row| row.ticket_type_id);
        for row in released {
            sqlx::query(
                "UPDATE ticket_types SET stock_remaining = stock_remaining + $2 WHERE id = $1",
            )
            .bind(row.ticket_type_id)
            .bind(row.quantity)
            .execute(&mut *tx)
            .await
            .map_err(Self::store_err)?;
        }

        tx.commit().await.map_err(Self::store_err)?;
        Ok(())
    }

    async fn commit_order(&self, order_id: Uuid) -> Result<(), InventoryError> {
        sqlx::query(
            "UPDATE reservations SET state = 'COMMITTED' WHERE order_id = $1 AND state = 'HELD'",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(Self::store_err)?;
        Ok(())
    }

    async fn expired_holds(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, InventoryError> {
        #[derive(sqlx::FromRow)]
        struct OrderIdRow {
            order_id: Uuid,
        }

        let rows = sqlx::query_as::<_, OrderIdRow>(
            "SELECT DISTINCT order_id FROM reservations \
             WHERE state = 'HELD' AND expires_at <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::store_err)?;

        Ok(rows.into_iter().map(|r| r.order_id).collect())
    }

    async fn stock_remaining(&self, ticket_type_id: Uuid) -> Result<i64, InventoryError> {
        let remaining: Option<i64> =
            sqlx::query_scalar("SELECT stock_remaining FROM ticket_types WHERE id = $1")
                .bind(ticket_type_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Self::store_err)?;

        remaining.ok_or(InventoryError::UnknownTicketType(ticket_type_id))
    }
}
