//! Booking workflow error types.

use common::TierId;
use storage::StorageError;
use thiserror::Error;

/// Errors that can occur while creating a booking.
#[derive(Debug, Error)]
pub enum BookingError {
    /// The requested ticket tier does not exist.
    #[error("Ticket tier not found: {0}")]
    TierNotFound(TierId),

    /// The claimed total does not match the server-side price.
    #[error("Invalid payment amount: expected {expected_cents} cents, got {claimed_cents} cents")]
    InvalidPayment {
        expected_cents: i64,
        claimed_cents: i64,
    },

    /// The tier has fewer tickets remaining than requested.
    #[error("Not enough tickets available for tier {0}")]
    OutOfStock(TierId),

    /// The payment gateway declined, errored, or timed out.
    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    /// A concurrent request with the same key won and its booking has
    /// since disappeared. Safe to retry.
    #[error("Conflicting request in flight: {0}")]
    Conflict(String),

    /// Compensation after a failed payment did not complete. The stock
    /// counter or the ledger may be inconsistent until repaired.
    #[error("Compensation failed for booking {booking_id}: {reason}")]
    CompensationFailed { booking_id: String, reason: String },

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Convenience type alias for booking results.
pub type Result<T> = std::result::Result<T, BookingError>;
