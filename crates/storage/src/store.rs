use async_trait::async_trait;

use common::{BookingId, TierId};

use crate::model::{Booking, NewBooking, TicketTier};
use crate::{Result, StorageError};

/// Outcome of the conditional stock decrement.
///
/// Insufficiency is a value, not an error: the caller must branch on it
/// explicitly rather than pattern-match an error tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockReservation {
    /// The decrement matched; `available_quantity` is the counter value
    /// after the decrement, as returned by the update itself.
    Reserved { available_quantity: i32 },
    /// Zero rows matched the guard: remaining stock was below the
    /// requested quantity and nothing changed.
    Insufficient,
}

/// Outcome of inserting a booking row.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerInsert {
    Created(Booking),
    /// The unique constraint on the idempotency key rejected the row: a
    /// concurrent caller already recorded this purchase attempt.
    DuplicateKey,
}

/// One transaction scope covering the reserve-and-record step.
///
/// Acquired once per booking attempt via [`ReservationStore::begin`] and
/// handed to both the stock decrement and the ledger insert, so the two
/// writes commit or roll back together. Dropping a unit without calling
/// [`commit`](Self::commit) discards its writes.
#[async_trait]
pub trait ReservationUnit: Send {
    /// Conditionally decrements a tier's stock.
    ///
    /// Equivalent to
    /// `UPDATE ticket_tiers SET available_quantity = available_quantity - qty
    ///  WHERE id = tier_id AND available_quantity >= qty`.
    /// Implementations must decide success from the affected-row count,
    /// not from the absence of an error. The store's row lock serializes
    /// concurrent decrements on the same tier; no other lock is needed.
    async fn reserve_stock(&mut self, tier_id: TierId, quantity: i32) -> Result<StockReservation>;

    /// Inserts a booking row, reporting a duplicate idempotency key as
    /// [`LedgerInsert::DuplicateKey`] rather than an error.
    async fn insert_booking(&mut self, booking: NewBooking) -> Result<LedgerInsert>;

    /// Commits the unit, making its writes visible.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rolls the unit back, discarding its writes.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Combined inventory store and booking ledger.
///
/// All implementations must be thread-safe; any number of booking
/// attempts may run concurrently against one store.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Opens a transaction scope for one reserve-and-record attempt.
    async fn begin(&self) -> Result<Box<dyn ReservationUnit + '_>>;

    /// Fetches a ticket tier by id. Absence is not an error.
    async fn find_tier(&self, tier_id: TierId) -> Result<Option<TicketTier>>;

    /// Looks a booking up by its idempotency key.
    ///
    /// This is the durable backstop behind the idempotency cache: the
    /// cache may miss or expire, the unique ledger row cannot.
    async fn find_booking_by_key(&self, key: &str) -> Result<Option<Booking>>;

    /// Unconditionally restores stock released by a failed attempt.
    ///
    /// Compensation only. Callers must invoke this at most once per
    /// failed attempt; the increment is not guarded.
    async fn release_stock(&self, tier_id: TierId, quantity: i32) -> Result<()>;

    /// Hard-deletes a booking row. Compensation only.
    async fn delete_booking(&self, booking_id: BookingId) -> Result<()>;
}

/// Rejects quantities the stock updates cannot be trusted with.
///
/// A zero or negative quantity would turn the decrement into a no-op or
/// an increment, so both mutation entry points refuse it up front.
pub(crate) fn validate_quantity(quantity: i32) -> Result<()> {
    if quantity <= 0 {
        return Err(StorageError::InvalidQuantity(quantity));
    }
    Ok(())
}
