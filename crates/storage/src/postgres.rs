use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use common::{BookingId, ConcertId, TierId};

use crate::model::{Booking, NewBooking, TicketTier};
use crate::store::{
    LedgerInsert, ReservationStore, ReservationUnit, StockReservation, validate_quantity,
};
use crate::{Result, StorageError};

/// Name of the unique constraint guarding the idempotency key column.
const IDEMPOTENCY_KEY_CONSTRAINT: &str = "uq_bookings_idempotency_key";

/// PostgreSQL-backed inventory store and booking ledger.
///
/// Concurrency control is delegated entirely to Postgres: the
/// conditional `UPDATE` takes the row lock on the tier, so concurrent
/// reservations of the same tier are linearized by the database.
#[derive(Clone)]
pub struct PostgresReservationStore {
    pool: PgPool,
}

impl PostgresReservationStore {
    /// Creates a new store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_tier(row: PgRow) -> Result<TicketTier> {
        Ok(TicketTier {
            id: TierId::from_uuid(row.try_get::<Uuid, _>("id")?),
            concert_id: ConcertId::from_uuid(row.try_get::<Uuid, _>("concert_id")?),
            name: row.try_get("name")?,
            price_cents: row.try_get("price_cents")?,
            total_quantity: row.try_get("total_quantity")?,
            available_quantity: row.try_get("available_quantity")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        })
    }

    fn row_to_booking(row: PgRow) -> Result<Booking> {
        Ok(Booking {
            id: BookingId::from_uuid(row.try_get::<Uuid, _>("id")?),
            tier_id: TierId::from_uuid(row.try_get::<Uuid, _>("tier_id")?),
            user_email: row.try_get("user_email")?,
            quantity: row.try_get("quantity")?,
            total_price_cents: row.try_get("total_price_cents")?,
            idempotency_key: row.try_get("idempotency_key")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        })
    }
}

#[async_trait]
impl ReservationStore for PostgresReservationStore {
    async fn begin(&self) -> Result<Box<dyn ReservationUnit + '_>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresUnit { tx }))
    }

    async fn find_tier(&self, tier_id: TierId) -> Result<Option<TicketTier>> {
        let row = sqlx::query(
            r#"
            SELECT id, concert_id, name, price_cents, total_quantity, available_quantity, created_at
            FROM ticket_tiers
            WHERE id = $1
            "#,
        )
        .bind(tier_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_tier).transpose()
    }

    async fn find_booking_by_key(&self, key: &str) -> Result<Option<Booking>> {
        let row = sqlx::query(
            r#"
            SELECT id, tier_id, user_email, quantity, total_price_cents, idempotency_key, created_at
            FROM bookings
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_booking).transpose()
    }

    async fn release_stock(&self, tier_id: TierId, quantity: i32) -> Result<()> {
        validate_quantity(quantity)?;

        let result = sqlx::query(
            "UPDATE ticket_tiers SET available_quantity = available_quantity + $1 WHERE id = $2",
        )
        .bind(quantity)
        .bind(tier_id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(%tier_id, quantity, "tier missing during stock release");
        }
        Ok(())
    }

    async fn delete_booking(&self, booking_id: BookingId) -> Result<()> {
        sqlx::query("DELETE FROM bookings WHERE id = $1")
            .bind(booking_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// One open Postgres transaction covering reserve-and-record.
struct PostgresUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ReservationUnit for PostgresUnit {
    async fn reserve_stock(&mut self, tier_id: TierId, quantity: i32) -> Result<StockReservation> {
        validate_quantity(quantity)?;

        // The WHERE clause carries the precondition; zero matched rows
        // means remaining stock was insufficient and nothing changed.
        let row = sqlx::query(
            r#"
            UPDATE ticket_tiers
            SET available_quantity = available_quantity - $1
            WHERE id = $2 AND available_quantity >= $1
            RETURNING available_quantity
            "#,
        )
        .bind(quantity)
        .bind(tier_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => Ok(StockReservation::Reserved {
                available_quantity: row.try_get("available_quantity")?,
            }),
            None => Ok(StockReservation::Insufficient),
        }
    }

    async fn insert_booking(&mut self, booking: NewBooking) -> Result<LedgerInsert> {
        let id = BookingId::new();

        let row = sqlx::query(
            r#"
            INSERT INTO bookings (id, tier_id, user_email, quantity, total_price_cents, idempotency_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, tier_id, user_email, quantity, total_price_cents, idempotency_key, created_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(booking.tier_id.as_uuid())
        .bind(&booking.user_email)
        .bind(booking.quantity)
        .bind(booking.total_price_cents)
        .bind(&booking.idempotency_key)
        .fetch_one(&mut *self.tx)
        .await;

        match row {
            Ok(row) => Ok(LedgerInsert::Created(PostgresReservationStore::row_to_booking(row)?)),
            Err(sqlx::Error::Database(db_err))
                if db_err.constraint() == Some(IDEMPOTENCY_KEY_CONSTRAINT) =>
            {
                Ok(LedgerInsert::DuplicateKey)
            }
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
