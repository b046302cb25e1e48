//! Reservation engine for ticket sales.
//!
//! The workflow for one purchase:
//! 1. Replay checks (idempotency cache, then the booking ledger).
//! 2. Conditional stock decrement and ledger insert in one unit of work.
//! 3. Payment charge outside the transaction, under a timeout.
//! 4. On payment failure, compensate: delete the booking, release the
//!    stock.
//!
//! Committed bookings are announced on a broadcast bus carrying the
//! post-decrement stock level.

pub mod bus;
pub mod cache;
pub mod engine;
pub mod error;
pub mod gateway;

pub use bus::{StockChangeBus, StockChangeEvent};
pub use cache::{
    CacheError, DEFAULT_TTL, IdempotencyCache, IdempotencyRecord, InMemoryIdempotencyCache,
    RedisIdempotencyCache,
};
pub use engine::{BookingEngine, CreateBookingRequest, DEFAULT_PAYMENT_TIMEOUT};
pub use error::BookingError;
pub use gateway::{
    ChargeResult, GatewayError, InMemoryPaymentGateway, PaymentGateway, SimulatedPaymentGateway,
};
