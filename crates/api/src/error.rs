//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use booking::BookingError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Booking workflow error.
    Booking(BookingError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Booking(err) => booking_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn booking_error_to_response(err: BookingError) -> (StatusCode, String) {
    match &err {
        BookingError::TierNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        BookingError::InvalidPayment { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
        BookingError::OutOfStock(_) => (StatusCode::CONFLICT, err.to_string()),
        BookingError::PaymentFailed(_) => (StatusCode::PAYMENT_REQUIRED, err.to_string()),
        BookingError::Conflict(_) => (StatusCode::CONFLICT, err.to_string()),
        BookingError::CompensationFailed { .. } | BookingError::Storage(_) => {
            tracing::error!(error = %err, "booking workflow internal error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        ApiError::Booking(err)
    }
}
