//! Persistence layer for the ticket reservation system.
//!
//! Two stores live behind one trait: the ticket-tier inventory (per-tier
//! stock counters) and the booking ledger (confirmed reservations with a
//! unique idempotency key). The combined reserve-and-record step runs
//! inside a [`ReservationUnit`], an explicit transaction scope handed to
//! both operations and resolved on a single commit-or-rollback exit.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use common::{BookingId, ConcertId, TierId};
pub use error::{Result, StorageError};
pub use memory::InMemoryReservationStore;
pub use model::{Booking, NewBooking, TicketTier};
pub use postgres::PostgresReservationStore;
pub use store::{LedgerInsert, ReservationStore, ReservationUnit, StockReservation};
