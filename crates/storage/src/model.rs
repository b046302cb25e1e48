use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::{BookingId, ConcertId, TierId};

/// A sellable ticket tier with a remaining-stock counter.
///
/// The invariant `0 <= available_quantity <= total_quantity` holds at
/// every commit point. `available_quantity` is mutated only through the
/// conditional decrement in [`crate::ReservationUnit::reserve_stock`]
/// and the compensating increment in
/// [`crate::ReservationStore::release_stock`]; no code path reads the
/// counter and writes it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketTier {
    pub id: TierId,
    pub concert_id: ConcertId,
    pub name: String,
    /// Unit price in minor currency units (cents).
    pub price_cents: i64,
    pub total_quantity: i32,
    pub available_quantity: i32,
    pub created_at: DateTime<Utc>,
}

/// A confirmed reservation in the ledger.
///
/// Immutable once committed. The one exception is the compensating
/// hard-delete when the payment step fails, which reverses the row
/// before any success response referenced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub tier_id: TierId,
    pub user_email: String,
    pub quantity: i32,
    pub total_price_cents: i64,
    /// Client-supplied dedup key, unique across the ledger.
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

/// Input for inserting a booking row inside a reservation unit.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub tier_id: TierId,
    pub user_email: String,
    pub quantity: i32,
    pub total_price_cents: i64,
    pub idempotency_key: String,
}

impl NewBooking {
    /// Materializes the booking row that an insert of this input creates.
    pub fn into_booking(self, id: BookingId, created_at: DateTime<Utc>) -> Booking {
        Booking {
            id,
            tier_id: self.tier_id,
            user_email: self.user_email,
            quantity: self.quantity,
            total_price_cents: self.total_price_cents,
            idempotency_key: self.idempotency_key,
            created_at,
        }
    }
}
