//! Shared identifier types used across the reservation system.

mod types;

pub use types::{BookingId, ConcertId, TierId};
